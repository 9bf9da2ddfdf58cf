//! Entity handlers: the backend side of the sync executor.

use crate::error::{EngineError, EngineResult, HandlerError};
use async_trait::async_trait;
use flowsync_protocol::{EntityPayload, EntityType, Operation};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the backend made of a submitted operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The backend applied the operation.
    Accepted,
    /// The backend holds a diverging version of the entity.
    Conflict {
        /// Local snapshot reported by the handler. The operation's payload
        /// is used when absent.
        local: Option<EntityPayload>,
        /// Backend snapshot.
        remote: Option<EntityPayload>,
    },
}

impl SubmitOutcome {
    /// Creates a conflict outcome carrying the backend's version.
    pub fn conflict(remote: EntityPayload) -> Self {
        SubmitOutcome::Conflict {
            local: None,
            remote: Some(remote),
        }
    }
}

/// Submits operations of one entity type to the backend.
///
/// Handlers are external collaborators: the engine only awaits `submit` and
/// never cancels it mid-flight.
#[async_trait]
pub trait EntityHandler: Send + Sync {
    /// Submits an operation.
    ///
    /// Returns `Err` on transport failure; the engine retries retryable
    /// errors with backoff.
    async fn submit(&self, operation: &Operation) -> Result<SubmitOutcome, HandlerError>;

    /// Merges a conflict's payloads. Defaults to local fields overwriting
    /// remote fields.
    fn merge(&self, local: &EntityPayload, remote: &EntityPayload) -> EntityPayload {
        local
            .merged_over(remote)
            .unwrap_or_else(|| local.clone())
    }
}

/// Maps entity types to their handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EntityType, Arc<dyn EntityHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().map(EntityType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("HandlerRegistry").field("types", &types).finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `entity_type`, replacing any previous one.
    pub fn register(mut self, entity_type: EntityType, handler: Arc<dyn EntityHandler>) -> Self {
        self.handlers.insert(entity_type, handler);
        self
    }

    /// Registers the same handler for every entity type.
    pub fn register_all(mut self, handler: Arc<dyn EntityHandler>) -> Self {
        for entity_type in EntityType::ALL {
            self.handlers.insert(entity_type, Arc::clone(&handler));
        }
        self
    }

    /// Returns the handler for `entity_type`.
    pub fn get(&self, entity_type: EntityType) -> Option<Arc<dyn EntityHandler>> {
        self.handlers.get(&entity_type).cloned()
    }

    /// Returns true if a handler is registered for `entity_type`.
    pub fn contains(&self, entity_type: EntityType) -> bool {
        self.handlers.contains_key(&entity_type)
    }

    /// Checks that every type in `required` has a handler.
    pub fn require(&self, required: &[EntityType]) -> EngineResult<()> {
        let missing: Vec<EntityType> = required
            .iter()
            .copied()
            .filter(|t| !self.contains(*t))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::MissingHandlers(missing))
        }
    }
}

/// A scripted handler for testing.
///
/// Responses are consumed in order; once the script is empty every
/// submission is accepted.
#[derive(Debug)]
pub struct MockHandler {
    connected: AtomicBool,
    latency: Mutex<Duration>,
    script: Mutex<VecDeque<Result<SubmitOutcome, HandlerError>>>,
    calls: Mutex<Vec<Operation>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandler {
    /// Creates a handler that accepts everything.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Makes every submission take `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    /// Queues a scripted response.
    pub fn push_response(&self, response: Result<SubmitOutcome, HandlerError>) {
        self.script.lock().push_back(response);
    }

    /// Queues `n` retryable transport failures.
    pub fn push_failures(&self, n: usize) {
        let mut script = self.script.lock();
        for _ in 0..n {
            script.push_back(Err(HandlerError::transport_retryable("connection reset")));
        }
    }

    /// Queues a conflict with the given backend version.
    pub fn push_conflict(&self, remote: EntityPayload) {
        self.push_response(Ok(SubmitOutcome::conflict(remote)));
    }

    /// Sets the connected state. A disconnected handler fails every
    /// submission with a retryable transport error.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Operations submitted so far, in order.
    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().clone()
    }

    /// Number of submissions so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of concurrently running submissions observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityHandler for MockHandler {
    async fn submit(&self, operation: &Operation) -> Result<SubmitOutcome, HandlerError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        self.calls.lock().push(operation.clone());

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if !self.connected.load(Ordering::SeqCst) {
            return Err(HandlerError::transport_retryable("not connected"));
        }

        self.script
            .lock()
            .pop_front()
            .unwrap_or(Ok(SubmitOutcome::Accepted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsync_protocol::{OperationKind, TaskRecord};

    fn task_op() -> Operation {
        Operation::new(
            OperationKind::Create,
            EntityType::Task,
            "t1",
            EntityPayload::Task(TaskRecord::with_id("t1")),
        )
    }

    #[tokio::test]
    async fn mock_follows_script_then_accepts() {
        let handler = MockHandler::new();
        handler.push_failures(1);
        handler.push_conflict(EntityPayload::Task(TaskRecord::with_id("t1")));

        let op = task_op();
        assert!(handler.submit(&op).await.is_err());
        assert!(matches!(
            handler.submit(&op).await,
            Ok(SubmitOutcome::Conflict { remote: Some(_), .. })
        ));
        assert_eq!(handler.submit(&op).await, Ok(SubmitOutcome::Accepted));
        assert_eq!(handler.call_count(), 3);
        assert_eq!(handler.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn disconnected_mock_fails_retryably() {
        let handler = MockHandler::new();
        handler.set_connected(false);

        let err = handler.submit(&task_op()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn default_merge_prefers_local() {
        let handler = MockHandler::new();
        let local = EntityPayload::Task(TaskRecord {
            id: "t1".into(),
            title: Some("mine".into()),
            ..TaskRecord::default()
        });
        let remote = EntityPayload::Task(TaskRecord {
            id: "t1".into(),
            title: Some("theirs".into()),
            priority: Some(2),
            ..TaskRecord::default()
        });

        let merged = handler.merge(&local, &remote);
        let record = merged.as_task().unwrap();
        assert_eq!(record.title.as_deref(), Some("mine"));
        assert_eq!(record.priority, Some(2));
    }

    #[test]
    fn registry_reports_missing_types() {
        let registry =
            HandlerRegistry::new().register(EntityType::Task, Arc::new(MockHandler::new()));

        assert!(registry.contains(EntityType::Task));
        assert!(registry.require(&[EntityType::Task]).is_ok());

        match registry.require(&EntityType::ALL) {
            Err(EngineError::MissingHandlers(missing)) => {
                assert_eq!(missing.len(), 3);
                assert!(!missing.contains(&EntityType::Task));
            }
            other => panic!("expected MissingHandlers, got {other:?}"),
        }
    }

    #[test]
    fn register_all_covers_every_type() {
        let registry = HandlerRegistry::new().register_all(Arc::new(MockHandler::new()));
        assert!(registry.require(&EntityType::ALL).is_ok());
    }
}
