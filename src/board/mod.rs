//! Board server: projects, members and ordered task columns over HTTP.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘          │         │  auth.rs (ActingUser extractor)        │
//!                       │         │  permissions.rs (Capability checks)    │
//!                       │         v                                        │
//!                       │  db.rs  (BoardDb, DbHandle, SQLite schema)       │
//!                       │    └─ reorder.rs (one-transaction task moves)    │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Typical Request Flow (drag a task to another column)
//!
//! 1. `POST /api/projects/{id}/tasks/reorder` → `api::reorder_tasks()`
//! 2. `ActingUser` resolves the session token; `BoardDb::authorize()` checks
//!    the caller may edit tasks in the project.
//! 3. `BoardDb::reorder_task()` opens a `BEGIN IMMEDIATE` transaction, loads
//!    the task, places it in the destination column under the configured
//!    `ReorderStrategy`, and commits.
//! 4. The updated task is returned as the authoritative record.
//!
//! Task and entity types live in the `taskboard-common` crate so the client
//! module shares them with the server.

pub mod api;
pub mod auth;
pub mod db;
pub mod permissions;
pub mod reorder;
pub mod server;
