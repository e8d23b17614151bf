//! Moving a task within or across board columns.
//!
//! Every reorder runs as one `BEGIN IMMEDIATE` transaction: the task row, any
//! neighbour rows touched by the chosen [`ReorderStrategy`] and, when needed,
//! a renumbered destination partition all commit together or not at all.
//! SQLite takes the write lock at `BEGIN`, so two reorders on the same
//! database serialise there instead of failing halfway through.

use std::fmt;
use std::str::FromStr;

use rusqlite::{Transaction, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use taskboard_common::ordering;
use taskboard_common::{ReorderRequest, Task, TaskStatus};

use super::db::{self, BoardDb};
use crate::errors::BoardError;

/// How neighbour orders react to a move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReorderStrategy {
    /// Only the moved row changes. Its order is recomputed from the
    /// destination partition, renumbering the partition if bisection has run
    /// out of precision.
    #[default]
    Fractional,
    /// Neighbours are shifted by one unit around the old and new positions
    /// and the client's order is stored as given.
    Shift,
}

impl ReorderStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fractional => "fractional",
            Self::Shift => "shift",
        }
    }
}

impl fmt::Display for ReorderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReorderStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fractional" => Ok(Self::Fractional),
            "shift" => Ok(Self::Shift),
            _ => Err(format!("Invalid reorder strategy: {}", s)),
        }
    }
}

/// What a committed reorder did.
#[derive(Debug, Clone)]
pub struct ReorderOutcome {
    pub task: Task,
    pub from_status: TaskStatus,
    pub from_order: f64,
    /// Neighbour rows whose order was shifted (shift strategy only).
    pub shifted: usize,
    /// Whether the destination partition was respaced first.
    pub renumbered: bool,
}

impl BoardDb {
    /// Move a task to `req.status` at the position `req.order` describes.
    ///
    /// Validation happens before the transaction starts. A task that is
    /// missing or belongs to another project yields `TaskNotFound` without
    /// any write. Busy or locked databases surface as `TransientStore`.
    pub fn reorder_task(
        &self,
        project_id: &str,
        req: &ReorderRequest,
        strategy: ReorderStrategy,
    ) -> Result<ReorderOutcome, BoardError> {
        if !req.order.is_finite() {
            return Err(BoardError::Validation("Order must be a finite number".into()));
        }
        let kept_updated_at = req
            .updated_at
            .as_deref()
            .map(db::parse_timestamp)
            .transpose()?;

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let task = db::load_task(&tx, &req.task_id)?
            .filter(|t| t.project_id == project_id)
            .ok_or_else(|| BoardError::TaskNotFound {
                id: req.task_id.clone(),
            })?;

        let (order, shifted, renumbered) = match strategy {
            ReorderStrategy::Fractional => place_fractional(&tx, &task, req)?,
            ReorderStrategy::Shift => (req.order, shift_neighbours(&tx, &task, req)?, false),
        };

        tx.execute(
            "UPDATE tasks SET status = ?1, sort_order = ?2, updated_at = COALESCE(?3, updated_at)
             WHERE id = ?4",
            params![req.status.as_str(), order, kept_updated_at, task.id],
        )?;

        let moved = db::load_task(&tx, &task.id)?.ok_or_else(|| BoardError::TaskNotFound {
            id: task.id.clone(),
        })?;
        tx.commit()?;

        Ok(ReorderOutcome {
            task: moved,
            from_status: task.status,
            from_order: task.order,
            shifted,
            renumbered,
        })
    }
}

/// Compute the moved task's order from the authoritative destination
/// partition. The client's order only picks the slot.
fn place_fractional(
    tx: &Transaction<'_>,
    task: &Task,
    req: &ReorderRequest,
) -> Result<(f64, usize, bool), BoardError> {
    let dest = db::partition(tx, &task.project_id, req.status, Some(&task.id))?;
    let orders: Vec<f64> = dest.iter().map(|(_, order)| *order).collect();

    let index = ordering::index_for_order(&orders, req.order);
    let order = ordering::assign_order(&orders, index);
    if ordering::fits_between(&orders, index, order) {
        return Ok((order, 0, false));
    }

    let fresh = ordering::spread(orders.len());
    for ((id, _), value) in dest.iter().zip(&fresh) {
        tx.execute(
            "UPDATE tasks SET sort_order = ?1 WHERE id = ?2",
            params![value, id],
        )?;
    }
    tracing::info!(
        project_id = %task.project_id,
        status = %req.status,
        tasks = fresh.len(),
        "Renumbered partition after order precision ran out"
    );
    Ok((ordering::assign_order(&fresh, index), 0, true))
}

/// Close the gap in the source column and open one in the destination by
/// shifting neighbours a unit at a time. The moving task is never shifted.
fn shift_neighbours(
    tx: &Transaction<'_>,
    task: &Task,
    req: &ReorderRequest,
) -> Result<usize, BoardError> {
    let old = task.order;
    let target = req.order;
    let mut shifted = 0;

    if task.status != req.status {
        shifted += tx.execute(
            "UPDATE tasks SET sort_order = sort_order - 1
             WHERE project_id = ?1 AND status = ?2 AND sort_order > ?3 AND id != ?4",
            params![task.project_id, task.status.as_str(), old, task.id],
        )?;
        shifted += tx.execute(
            "UPDATE tasks SET sort_order = sort_order + 1
             WHERE project_id = ?1 AND status = ?2 AND sort_order >= ?3 AND id != ?4",
            params![task.project_id, req.status.as_str(), target, task.id],
        )?;
    } else if target > old {
        shifted += tx.execute(
            "UPDATE tasks SET sort_order = sort_order - 1
             WHERE project_id = ?1 AND status = ?2 AND sort_order > ?3 AND sort_order <= ?4
               AND id != ?5",
            params![task.project_id, task.status.as_str(), old, target, task.id],
        )?;
    } else if target < old {
        shifted += tx.execute(
            "UPDATE tasks SET sort_order = sort_order + 1
             WHERE project_id = ?1 AND status = ?2 AND sort_order >= ?3 AND sort_order < ?4
               AND id != ?5",
            params![task.project_id, task.status.as_str(), target, old, task.id],
        )?;
    }

    Ok(shifted)
}
