//! Types shared by the taskboard server and its optimistic client.
//!
//! `models` holds the wire/domain records; `ordering` holds the sparse
//! fractional ordering arithmetic both sides must agree on.

pub mod models;
pub mod ordering;

pub use models::*;
