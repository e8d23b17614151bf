use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use taskboard_common::{Task, TaskStatus};
use tokio::task::JoinHandle;

use super::inflight::{InFlightRegistry, OperationKey, OperationKind};
use super::state::{BoardState, MoveOutcome, Notice};
use super::transport::TaskTransport;
use crate::errors::ClientError;

/// How long a delete can be undone before the request is sent.
pub const DEFAULT_UNDO_WINDOW: Duration = Duration::from_secs(5);

/// How a deferred delete ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResolution {
    /// The server deleted the task.
    Deleted,
    /// The delete was undone before it fired.
    Restored,
    /// The server call failed; the task is back on the board.
    Failed,
}

/// Optimistic board client for one project.
///
/// Cheap to clone; clones share state, the in-flight registry and the
/// transport.
pub struct BoardClient<T: TaskTransport> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    transport: T,
    project_id: String,
    state: Mutex<BoardState>,
    inflight: InFlightRegistry<OperationKey>,
    undo_window: Duration,
}

impl<T: TaskTransport> Clone for BoardClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: TaskTransport> BoardClient<T> {
    pub fn new(transport: T, project_id: impl Into<String>) -> Self {
        Self::with_undo_window(transport, project_id, DEFAULT_UNDO_WINDOW)
    }

    pub fn with_undo_window(transport: T, project_id: impl Into<String>, undo_window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                project_id: project_id.into(),
                state: Mutex::new(BoardState::new()),
                inflight: InFlightRegistry::new(),
                undo_window,
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reload every task from the server.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let tasks = self.inner.transport.list_tasks(&self.inner.project_id).await?;
        self.state().load(tasks);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.state().snapshot()
    }

    pub fn column(&self, status: TaskStatus) -> Vec<Task> {
        self.state().column(status)
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.state().get(task_id).cloned()
    }

    /// Errors raised since the last call, each reported once.
    pub fn take_notices(&self) -> Vec<Notice> {
        self.state().take_notices()
    }

    /// Drop `task_id` at `index` of column `status`.
    ///
    /// The board changes immediately. The request is sent once any earlier
    /// request for the same task has finished; a move overtaken while it
    /// waited is never sent.
    pub async fn move_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        index: usize,
    ) -> Result<MoveOutcome, ClientError> {
        let Some(planned) = self.state().begin_move(task_id, status, index)? else {
            return Ok(MoveOutcome::Unchanged);
        };
        let generation = planned.generation;

        let _guard = self
            .inner
            .inflight
            .acquire((OperationKind::Move, task_id.to_string()))
            .await;
        if !self.state().is_current_move(task_id, generation) {
            tracing::debug!(task_id, generation, "Skipping superseded move");
            return Ok(MoveOutcome::Superseded);
        }

        let result = self
            .inner
            .transport
            .reorder(&self.inner.project_id, &planned.request)
            .await;
        let outcome = self.state().settle_move(task_id, generation, result);
        tracing::debug!(task_id, generation, ?outcome, "Move settled");
        Ok(outcome)
    }

    /// Hide `task_id` now and delete it on the server once the undo window
    /// passes without [`undo_delete`](Self::undo_delete).
    ///
    /// A task with a delete already pending is refused. The returned handle
    /// resolves when the delete has been sent or undone.
    pub fn delete_with_undo(&self, task_id: &str) -> Result<JoinHandle<DeleteResolution>, ClientError> {
        let (generation, cancel) = self.state().begin_delete(task_id)?;
        let client = self.clone();
        let task_id = task_id.to_string();
        let window = self.inner.undo_window;

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => DeleteResolution::Restored,
                _ = tokio::time::sleep(window) => client.fire_delete(&task_id, generation).await,
            }
        }))
    }

    /// Undo a pending delete. `false` when the delete already fired.
    pub fn undo_delete(&self, task_id: &str) -> bool {
        self.state().cancel_delete(task_id)
    }

    async fn fire_delete(&self, task_id: &str, generation: u64) -> DeleteResolution {
        // A move already on the wire settles before the delete is sent.
        let _delete_slot = self
            .inner
            .inflight
            .acquire((OperationKind::Delete, task_id.to_string()))
            .await;
        let _move_slot = self
            .inner
            .inflight
            .acquire((OperationKind::Move, task_id.to_string()))
            .await;

        // Claiming under the state lock is what decides the race with undo.
        let Some(snapshot) = self.state().claim_delete(task_id, generation) else {
            return DeleteResolution::Restored;
        };

        match self
            .inner
            .transport
            .delete_task(&self.inner.project_id, task_id)
            .await
        {
            Ok(()) => {
                self.state().delete_confirmed(task_id);
                tracing::info!(task_id, "Deleted task");
                DeleteResolution::Deleted
            }
            Err(err) => {
                self.state().delete_failed(snapshot, &err);
                DeleteResolution::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::TransportError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use taskboard_common::{Priority, ReorderRequest};
    use tokio::sync::{mpsc, oneshot};

    type PendingReorder = (ReorderRequest, oneshot::Sender<Result<Task, TransportError>>);

    /// Transport whose reorder answers are supplied by the test.
    struct ScriptedTransport {
        tasks: Vec<Task>,
        reorders: mpsc::UnboundedSender<PendingReorder>,
        deletes: Mutex<Vec<String>>,
        fail_deletes: AtomicBool,
    }

    #[async_trait]
    impl TaskTransport for ScriptedTransport {
        async fn list_tasks(&self, _project_id: &str) -> Result<Vec<Task>, TransportError> {
            Ok(self.tasks.clone())
        }

        async fn reorder(&self, _project_id: &str, req: &ReorderRequest) -> Result<Task, TransportError> {
            let (tx, rx) = oneshot::channel();
            self.reorders
                .send((req.clone(), tx))
                .map_err(|_| TransportError::Network("script closed".into()))?;
            rx.await
                .map_err(|_| TransportError::Network("no answer".into()))?
        }

        async fn delete_task(&self, _project_id: &str, task_id: &str) -> Result<(), TransportError> {
            self.deletes.lock().unwrap().push(task_id.to_string());
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(TransportError::Status {
                    status: 500,
                    message: "boom".into(),
                });
            }
            Ok(())
        }
    }

    fn task(id: &str, status: TaskStatus, order: f64) -> Task {
        Task {
            id: id.to_string(),
            project_id: "p".to_string(),
            title: id.to_string(),
            description: String::new(),
            status,
            priority: Priority::Medium,
            order,
            assignee: None,
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            updated_at: "2024-01-01T00:00:00.000Z".to_string(),
        }
    }

    /// The server's answer to a reorder: the task at the requested place.
    fn applied(req: &ReorderRequest) -> Task {
        let mut t = task(&req.task_id, req.status, req.order);
        if let Some(ts) = &req.updated_at {
            t.updated_at = ts.clone();
        }
        t
    }

    async fn client(
        window: Duration,
    ) -> (BoardClient<ScriptedTransport>, mpsc::UnboundedReceiver<PendingReorder>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = ScriptedTransport {
            tasks: vec![
                task("a1", TaskStatus::Todo, 1000.0),
                task("t", TaskStatus::Todo, 2000.0),
                task("u", TaskStatus::Todo, 3000.0),
                task("b1", TaskStatus::InProgress, 500.0),
                task("b2", TaskStatus::InProgress, 1500.0),
            ],
            reorders: tx,
            deletes: Mutex::new(Vec::new()),
            fail_deletes: AtomicBool::new(false),
        };
        let client = BoardClient::with_undo_window(transport, "p", window);
        client.refresh().await.unwrap();
        (client, rx)
    }

    /// Give spawned tasks a chance to reach their next await point.
    async fn let_others_run() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn ids(tasks: &[Task]) -> Vec<String> {
        tasks.iter().map(|t| t.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_move_confirmed_with_server_record() {
        let (client, mut rx) = client(DEFAULT_UNDO_WINDOW).await;
        let mover = {
            let client = client.clone();
            tokio::spawn(async move { client.move_task("t", TaskStatus::InProgress, 1).await })
        };

        let (req, reply) = rx.recv().await.unwrap();
        assert_eq!(req.order, 1000.0);
        // Optimistic state is visible while the request is in flight.
        assert_eq!(ids(&client.column(TaskStatus::InProgress)), vec!["b1", "t", "b2"]);

        let mut server = applied(&req);
        server.order = 1001.0;
        reply.send(Ok(server.clone())).unwrap();

        let outcome = mover.await.unwrap().unwrap();
        assert_eq!(outcome, MoveOutcome::Confirmed(server.clone()));
        assert_eq!(client.task("t"), Some(server));
        assert!(client.take_notices().is_empty());
    }

    #[tokio::test]
    async fn test_failed_move_rolls_back_to_pre_move_snapshot() {
        let (client, mut rx) = client(DEFAULT_UNDO_WINDOW).await;
        let before = client.snapshot();

        let mover = {
            let client = client.clone();
            tokio::spawn(async move { client.move_task("t", TaskStatus::InProgress, 0).await })
        };
        let (_, reply) = rx.recv().await.unwrap();
        assert_ne!(client.snapshot(), before);
        reply
            .send(Err(TransportError::Network("connection reset".into())))
            .unwrap();

        let outcome = mover.await.unwrap().unwrap();
        assert!(matches!(outcome, MoveOutcome::RolledBack(_)));
        assert_eq!(client.snapshot(), before);
        assert_eq!(client.take_notices().len(), 1);
        assert!(client.take_notices().is_empty());
    }

    #[tokio::test]
    async fn test_same_task_moves_are_serialised_and_superseded() {
        let (client, mut rx) = client(DEFAULT_UNDO_WINDOW).await;
        let before = client.snapshot();

        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.move_task("t", TaskStatus::InProgress, 0).await })
        };
        let (first_req, first_reply) = rx.recv().await.unwrap();

        let second = {
            let client = client.clone();
            tokio::spawn(async move { client.move_task("t", TaskStatus::Done, 0).await })
        };
        let_others_run().await;
        // The newer move is applied locally but waits to be sent.
        assert_eq!(client.task("t").unwrap().status, TaskStatus::Done);
        assert!(rx.try_recv().is_err());

        first_reply
            .send(Err(TransportError::Network("timeout".into())))
            .unwrap();
        assert_eq!(first.await.unwrap().unwrap(), MoveOutcome::Superseded);
        assert_eq!(first_req.status, TaskStatus::InProgress);
        assert_eq!(client.task("t").unwrap().status, TaskStatus::Done);
        assert!(client.take_notices().is_empty());

        let (second_req, second_reply) = rx.recv().await.unwrap();
        assert_eq!(second_req.status, TaskStatus::Done);
        second_reply
            .send(Err(TransportError::Status {
                status: 503,
                message: "busy".into(),
            }))
            .unwrap();
        assert!(matches!(
            second.await.unwrap().unwrap(),
            MoveOutcome::RolledBack(_)
        ));
        assert_eq!(client.snapshot(), before);
        assert_eq!(client.take_notices().len(), 1);
    }

    #[tokio::test]
    async fn test_move_overtaken_before_sending_is_skipped() {
        let (client, mut rx) = client(DEFAULT_UNDO_WINDOW).await;

        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.move_task("t", TaskStatus::InProgress, 0).await })
        };
        let (req1, reply1) = rx.recv().await.unwrap();

        let second = {
            let client = client.clone();
            tokio::spawn(async move { client.move_task("t", TaskStatus::Done, 0).await })
        };
        let_others_run().await;
        let third = {
            let client = client.clone();
            tokio::spawn(async move { client.move_task("t", TaskStatus::Todo, 0).await })
        };
        let_others_run().await;

        reply1.send(Ok(applied(&req1))).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), MoveOutcome::Superseded);
        assert_eq!(second.await.unwrap().unwrap(), MoveOutcome::Superseded);

        let (req3, reply3) = rx.recv().await.unwrap();
        assert_eq!(req3.status, TaskStatus::Todo);
        reply3.send(Ok(applied(&req3))).unwrap();
        assert!(matches!(third.await.unwrap().unwrap(), MoveOutcome::Confirmed(_)));
        assert!(rx.try_recv().is_err(), "the overtaken move was never sent");
    }

    #[tokio::test]
    async fn test_unrelated_tasks_are_not_blocked() {
        let (client, mut rx) = client(DEFAULT_UNDO_WINDOW).await;

        let slow = {
            let client = client.clone();
            tokio::spawn(async move { client.move_task("t", TaskStatus::Done, 0).await })
        };
        let (_, slow_reply) = rx.recv().await.unwrap();

        let fast = {
            let client = client.clone();
            tokio::spawn(async move { client.move_task("u", TaskStatus::Done, 0).await })
        };
        let (fast_req, fast_reply) = rx.recv().await.unwrap();
        assert_eq!(fast_req.task_id, "u");
        fast_reply.send(Ok(applied(&fast_req))).unwrap();
        assert!(matches!(fast.await.unwrap().unwrap(), MoveOutcome::Confirmed(_)));
        assert!(!slow.is_finished());

        drop(slow_reply);
        assert!(matches!(slow.await.unwrap().unwrap(), MoveOutcome::RolledBack(_)));
    }

    #[tokio::test]
    async fn test_unchanged_drop_sends_nothing() {
        let (client, mut rx) = client(DEFAULT_UNDO_WINDOW).await;
        let outcome = client.move_task("t", TaskStatus::Todo, 1).await.unwrap();
        assert_eq!(outcome, MoveOutcome::Unchanged);
        assert!(rx.try_recv().is_err());

        assert!(matches!(
            client.move_task("nope", TaskStatus::Todo, 0).await,
            Err(ClientError::UnknownTask(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_within_window_restores_without_network() {
        let (client, _rx) = client(Duration::from_secs(5)).await;
        let before = client.snapshot();

        let handle = client.delete_with_undo("t").unwrap();
        assert!(client.task("t").is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(client.undo_delete("t"));
        assert_eq!(handle.await.unwrap(), DeleteResolution::Restored);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(client.snapshot(), before);
        assert!(client.transport().deletes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_fires_after_window() {
        let (client, _rx) = client(Duration::from_secs(5)).await;
        let handle = client.delete_with_undo("t").unwrap();

        assert_eq!(handle.await.unwrap(), DeleteResolution::Deleted);
        assert!(!client.undo_delete("t"), "too late to undo");
        assert!(client.task("t").is_none());
        assert_eq!(*client.transport().deletes.lock().unwrap(), vec!["t".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_delete_is_refused() {
        let (client, _rx) = client(Duration::from_secs(5)).await;
        let handle = client.delete_with_undo("t").unwrap();
        assert!(matches!(
            client.delete_with_undo("t"),
            Err(ClientError::DeletePending(_))
        ));

        assert_eq!(handle.await.unwrap(), DeleteResolution::Deleted);
        assert_eq!(client.transport().deletes.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_restores_task() {
        let (client, _rx) = client(Duration::from_secs(5)).await;
        client.transport().fail_deletes.store(true, Ordering::SeqCst);
        let before = client.snapshot();

        let handle = client.delete_with_undo("t").unwrap();
        assert_eq!(handle.await.unwrap(), DeleteResolution::Failed);
        assert_eq!(client.snapshot(), before);
        let notices = client.take_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].message.contains("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_racing_timer_has_exactly_one_winner() {
        let (client, _rx) = client(Duration::from_secs(5)).await;
        let handle = client.delete_with_undo("t").unwrap();

        // Reach the deadline, then undo before the timer task gets to run.
        tokio::time::advance(Duration::from_secs(5)).await;
        let undone = client.undo_delete("t");
        let resolution = handle.await.unwrap();

        let visible = client.snapshot().iter().filter(|t| t.id == "t").count();
        let sent = client.transport().deletes.lock().unwrap().len();
        if undone {
            assert_eq!(resolution, DeleteResolution::Restored);
            assert_eq!((visible, sent), (1, 0));
        } else {
            assert_eq!(resolution, DeleteResolution::Deleted);
            assert_eq!((visible, sent), (0, 1));
        }
        assert!(!client.undo_delete("t"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waits_for_in_flight_move() {
        let (client, mut rx) = client(Duration::from_secs(5)).await;
        let mover = {
            let client = client.clone();
            tokio::spawn(async move { client.move_task("t", TaskStatus::Done, 0).await })
        };
        let (req, reply) = rx.recv().await.unwrap();

        let handle = client.delete_with_undo("t").unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(
            client.transport().deletes.lock().unwrap().is_empty(),
            "delete must not overtake the move"
        );

        reply.send(Ok(applied(&req))).unwrap();
        assert!(matches!(mover.await.unwrap().unwrap(), MoveOutcome::Confirmed(_)));
        assert_eq!(handle.await.unwrap(), DeleteResolution::Deleted);
        assert_eq!(*client.transport().deletes.lock().unwrap(), vec!["t".to_string()]);
        assert!(client.take_notices().is_empty());
    }
}
