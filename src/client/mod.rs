//! Optimistic board client.
//!
//! Drags are applied to local state at once and reconciled with the server's
//! answer afterwards:
//!
//! | Module         | Responsibility                                          |
//! |----------------|---------------------------------------------------------|
//! | `state`        | `BoardState`: tasks, pending moves and deletes, notices |
//! | `inflight`     | `InFlightRegistry`: one request at a time per task key  |
//! | `transport`    | `TaskTransport` trait and its `reqwest` implementation  |
//! | `board_client` | `BoardClient`: drives the above over a transport        |

pub mod board_client;
pub mod inflight;
pub mod state;
pub mod transport;

pub use board_client::{BoardClient, DEFAULT_UNDO_WINDOW, DeleteResolution};
pub use state::{BoardState, MoveOutcome, Notice};
pub use transport::{HttpTransport, TaskTransport, TransportError};
