//! Demo command implementation.
//!
//! Drives the data layer against an in-memory snapshot and a simulated
//! backend: writes are made offline, then connectivity returns and the
//! queue drains.

use flowsync_data::UnifiedDataLayer;
use flowsync_engine::{
    BusEvent, EngineConfig, HandlerRegistry, MemoryStateStore, MockHandler, RetryConfig,
    SyncEngine, Topic,
};
use flowsync_protocol::{Module, TaskRecord, TimeBlockRecord, UpdateData};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs the demo command.
pub async fn run(failures: usize, retry_delay_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    let backend = Arc::new(MockHandler::new());
    backend.push_failures(failures);

    let config = EngineConfig::new("demo")
        .with_initially_online(false)
        .with_retry(RetryConfig::default().with_base_delay(Duration::from_millis(retry_delay_ms)));
    let engine = SyncEngine::new(
        config,
        Arc::new(MemoryStateStore::new()),
        HandlerRegistry::new().register_all(backend.clone()),
    );
    let layer = UnifiedDataLayer::new(Arc::clone(&engine))?;

    let _events = engine.subscribe(
        Topic::All,
        Arc::new(|event: &BusEvent| match event {
            BusEvent::Sync(e) => info!(kind = ?e.kind, entity_id = ?e.entity_id, "engine event"),
            BusEvent::Update(u) => info!(
                source = %u.source_module,
                entity_id = %u.entity_id,
                hops = u.hops,
                "cross-module update"
            ),
        }),
    );
    let mut subscriptions = Vec::new();
    for module in [Module::TimeBlocks, Module::Energy, Module::TimeTracking] {
        subscriptions.push(layer.subscribe_module(module, move |update| {
            if let UpdateData::Action(action) = &update.data {
                println!("  [{}] {}", module, action.name());
            }
        }));
    }

    println!("Offline:");
    let task = layer.create_task(TaskRecord {
        title: Some("Write quarterly report".into()),
        estimated_minutes: Some(90),
        ..TaskRecord::default()
    })?;
    let block = layer.create_time_block(TimeBlockRecord {
        title: Some("Report writing".into()),
        task_id: Some(task.id.clone()),
        ..TimeBlockRecord::default()
    })?;
    layer.update_task(
        &task.id,
        TaskRecord {
            completed: Some(true),
            ..TaskRecord::default()
        },
    )?;
    println!(
        "  task {} with block {}, {} operation(s) queued",
        task.id,
        block.id,
        engine.count()
    );

    println!("Online:");
    engine.set_online(true);

    let started = Instant::now();
    loop {
        let parked = engine.parked_operations().len();
        if engine.count() == parked && !engine.is_syncing() {
            break;
        }
        if started.elapsed() > DRAIN_TIMEOUT {
            return Err("Queue did not drain in time".into());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let stats = engine.stats();
    println!("  submissions: {}", backend.call_count());
    println!(
        "  synced: {}, parked: {}, conflicts: {}",
        stats.success_count,
        stats.failure_count,
        engine.conflicts().len()
    );

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    Ok(())
}
