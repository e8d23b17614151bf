//! Local board state with optimistic moves and deferred deletes.
//!
//! Everything here is synchronous; `BoardClient` holds it behind a mutex and
//! never across an await. Reconciliation is keyed by task id and a per-task
//! move generation, never by the order responses arrive in.

use std::collections::{HashMap, VecDeque};

use taskboard_common::ordering;
use taskboard_common::{ReorderRequest, Task, TaskStatus};
use tokio_util::sync::CancellationToken;

use super::transport::TransportError;
use crate::errors::ClientError;

/// A user-visible error raised by a failed optimistic operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub task_id: String,
    pub message: String,
}

/// A move applied locally and waiting to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMove {
    pub generation: u64,
    pub request: ReorderRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// The drop position equals the current one; nothing was sent.
    Unchanged,
    /// The server's record replaced the local guess.
    Confirmed(Task),
    /// The move failed and the task went back to this record.
    RolledBack(Task),
    /// A newer move of the same task owns the outcome.
    Superseded,
}

struct PendingMove {
    generation: u64,
    /// Last record known to match the server.
    baseline: Task,
}

struct PendingDelete {
    generation: u64,
    snapshot: Task,
    cancel: CancellationToken,
}

pub struct BoardState {
    tasks: HashMap<String, Task>,
    moves: HashMap<String, PendingMove>,
    deletes: HashMap<String, PendingDelete>,
    next_generation: u64,
    notices: VecDeque<Notice>,
}

impl Default for BoardState {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardState {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            moves: HashMap::new(),
            deletes: HashMap::new(),
            next_generation: 1,
            notices: VecDeque::new(),
        }
    }

    /// Replace the board with a fresh server listing. Tasks hidden by a
    /// pending delete stay hidden.
    pub fn load(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks
            .into_iter()
            .filter(|t| !self.deletes.contains_key(&t.id))
            .map(|t| (t.id.clone(), t))
            .collect();
        self.moves.clear();
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// One column, in display order.
    pub fn column(&self, status: TaskStatus) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by(Task::cmp_position);
        tasks
    }

    /// Every visible task, column by column.
    pub fn snapshot(&self) -> Vec<Task> {
        TaskStatus::ALL
            .iter()
            .flat_map(|status| self.column(*status))
            .collect()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    fn notify(&mut self, task_id: &str, message: String) {
        tracing::warn!(task_id, %message, "Board operation failed");
        self.notices.push_back(Notice {
            task_id: task_id.to_string(),
            message,
        });
    }

    fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    // ── Moves ─────────────────────────────────────────────────────────

    /// Apply a drop of `task_id` at `index` of column `status` locally and
    /// return the request to send. `None` when the task is already there.
    pub fn begin_move(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        index: usize,
    ) -> Result<Option<PlannedMove>, ClientError> {
        let current = self
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| ClientError::UnknownTask(task_id.to_string()))?;

        let neighbours: Vec<f64> = self
            .column(status)
            .iter()
            .filter(|t| t.id != task_id)
            .map(|t| t.order)
            .collect();
        let index = index.min(neighbours.len());

        if current.status == status {
            let position = self
                .column(status)
                .iter()
                .position(|t| t.id == task_id);
            if position == Some(index) {
                return Ok(None);
            }
        }

        let order = ordering::assign_order(&neighbours, index);
        let generation = self.next_generation();
        let baseline = match self.moves.remove(task_id) {
            Some(previous) => previous.baseline,
            None => current.clone(),
        };
        self.moves.insert(
            task_id.to_string(),
            PendingMove {
                generation,
                baseline,
            },
        );

        if let Some(task) = self.tasks.get_mut(task_id) {
            task.status = status;
            task.order = order;
        }

        Ok(Some(PlannedMove {
            generation,
            request: ReorderRequest {
                task_id: task_id.to_string(),
                status,
                order,
                updated_at: Some(current.updated_at),
            },
        }))
    }

    /// Whether `generation` is still the newest move of the task.
    pub fn is_current_move(&self, task_id: &str, generation: u64) -> bool {
        self.moves
            .get(task_id)
            .is_some_and(|m| m.generation == generation)
    }

    /// Reconcile the server's answer for one move.
    pub fn settle_move(
        &mut self,
        task_id: &str,
        generation: u64,
        result: Result<Task, TransportError>,
    ) -> MoveOutcome {
        if !self.is_current_move(task_id, generation) {
            // A newer move is in charge. A stale success is still the latest
            // server state, so it becomes that move's rollback target.
            if let (Ok(server), Some(pending)) = (result, self.moves.get_mut(task_id)) {
                pending.baseline = server;
            }
            return MoveOutcome::Superseded;
        }

        let Some(pending) = self.moves.remove(task_id) else {
            return MoveOutcome::Superseded;
        };
        let visible = self.tasks.contains_key(task_id);
        if !visible && !self.deletes.contains_key(task_id) {
            tracing::debug!(task_id, generation, "Move settled after the task was deleted");
            return MoveOutcome::Superseded;
        }

        match result {
            Ok(server) => {
                if visible {
                    self.tasks.insert(task_id.to_string(), server.clone());
                } else if let Some(delete) = self.deletes.get_mut(task_id) {
                    delete.snapshot = server.clone();
                }
                MoveOutcome::Confirmed(server)
            }
            Err(err) => {
                let baseline = pending.baseline;
                if visible {
                    self.tasks.insert(task_id.to_string(), baseline.clone());
                } else if let Some(delete) = self.deletes.get_mut(task_id) {
                    delete.snapshot = baseline.clone();
                }
                self.notify(task_id, format!("Could not move \"{}\": {}", baseline.title, err));
                MoveOutcome::RolledBack(baseline)
            }
        }
    }

    // ── Deferred deletes ──────────────────────────────────────────────

    /// Hide the task and register a pending delete for it.
    pub fn begin_delete(&mut self, task_id: &str) -> Result<(u64, CancellationToken), ClientError> {
        if self.deletes.contains_key(task_id) {
            return Err(ClientError::DeletePending(task_id.to_string()));
        }
        let snapshot = self
            .tasks
            .remove(task_id)
            .ok_or_else(|| ClientError::UnknownTask(task_id.to_string()))?;
        let generation = self.next_generation();
        let cancel = CancellationToken::new();
        self.deletes.insert(
            task_id.to_string(),
            PendingDelete {
                generation,
                snapshot,
                cancel: cancel.clone(),
            },
        );
        Ok((generation, cancel))
    }

    pub fn is_delete_pending(&self, task_id: &str) -> bool {
        self.deletes.contains_key(task_id)
    }

    /// Undo a pending delete. Returns `false` when there is nothing left to
    /// undo because the delete already fired.
    pub fn cancel_delete(&mut self, task_id: &str) -> bool {
        let Some(pending) = self.deletes.remove(task_id) else {
            return false;
        };
        pending.cancel.cancel();
        self.tasks.insert(task_id.to_string(), pending.snapshot);
        true
    }

    /// Claim a pending delete for sending. Only the registration that
    /// started the timer can claim it, and only once.
    pub fn claim_delete(&mut self, task_id: &str, generation: u64) -> Option<Task> {
        match self.deletes.get(task_id) {
            Some(pending) if pending.generation == generation => {
                self.deletes.remove(task_id).map(|p| p.snapshot)
            }
            _ => None,
        }
    }

    /// Put a task back after its delete call failed.
    pub fn delete_failed(&mut self, snapshot: Task, err: &TransportError) {
        let task_id = snapshot.id.clone();
        let title = snapshot.title.clone();
        self.moves.remove(&task_id);
        self.tasks.insert(task_id.clone(), snapshot);
        self.notify(&task_id, format!("Could not delete \"{}\": {}", title, err));
    }

    /// Drop all trace of a task the server confirmed deleted.
    pub fn delete_confirmed(&mut self, task_id: &str) {
        self.moves.remove(task_id);
        self.tasks.remove(task_id);
    }
}
