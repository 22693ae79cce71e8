use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use spool_core::{
    BoxError, EventStatus, ManagerConfig, Priority, QueueManager, QueueOptions, TaskFn,
    TaskOptions, TaskResult, listener, sync_task_fn, task_fn,
};
use tokio::time::{Duration, sleep};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "spool")]
#[command(about = "Run a demo queue with mixed priorities and a flaky task", long_about = None)]
struct Args {
    /// Path to a ManagerConfig JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of hello tasks to submit
    #[arg(short, long, default_value = "6")]
    tasks: usize,

    /// Concurrency of the demo queue (overrides the config file)
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// How many times the flaky task fails before it succeeds
    #[arg(long, default_value = "2")]
    failures: u32,
}

#[derive(Debug, Deserialize)]
struct HelloPayload {
    name: String,
}

/// 指定回数だけ失敗してから成功するタスク（retry の確認用）
struct FlakyHello {
    remaining_failures: AtomicU32,
}

impl FlakyHello {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }

    fn run(&self, data: Option<serde_json::Value>) -> TaskResult {
        let p: HelloPayload = serde_json::from_value(data.unwrap_or_default())
            .map_err(|e| format!("json decode: {e}"))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(format!("intentional failure (left={left})").into());
        }

        info!(name = %p.name, "hello from the flaky task");
        Ok(Some(json!({ "greeted": p.name })))
    }
}

fn hello() -> TaskFn {
    task_fn(|data| async move {
        let p: HelloPayload = serde_json::from_value(data.unwrap_or_default())?;
        sleep(Duration::from_millis(100)).await;
        Ok(Some(json!(format!("Hello, {}!", p.name))))
    })
}

fn priority_for(i: usize) -> Priority {
    match i % 4 {
        0 => Priority::Low,
        1 => Priority::Normal,
        2 => Priority::High,
        _ => Priority::Urgent,
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = match &args.config {
        Some(path) => ManagerConfig::from_json_file(path)?,
        None => ManagerConfig {
            retry_interval_ms: 200,
            ..ManagerConfig::default()
        },
    };
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }

    // (A) manager と queue を用意
    let manager = QueueManager::new(config);
    manager.add_queue("hello", QueueOptions::new())?;

    let subscriptions = manager.on_all(listener(|event| match event.status {
        EventStatus::Completed => info!(
            queue = %event.queue_name,
            task_id = %event.task_id,
            retry_count = event.retry_count,
            duration_ms = event.duration.as_millis() as u64,
            result = ?event.result,
            "task completed"
        ),
        EventStatus::Failed => error!(
            queue = %event.queue_name,
            task_id = %event.task_id,
            retry_count = event.retry_count,
            error = ?event.error,
            "task failed"
        ),
    }));

    // (B) priority を混ぜて投入。同時実行数を超えた分は priority 順に待つ
    for i in 0..args.tasks {
        let priority = priority_for(i);
        let id = manager
            .submit(
                "hello",
                hello(),
                TaskOptions::new()
                    .priority(priority)
                    .data(json!({ "name": format!("spool-{i}") })),
            )
            .await?;
        info!(task_id = %id, %priority, "submitted");
    }

    // (C) 失敗してから成功するタスク
    let flaky = Arc::new(FlakyHello::new(args.failures));
    let id = manager
        .submit(
            "hello",
            sync_task_fn(move |data| flaky.run(data)),
            TaskOptions::new()
                .id("flaky")
                .data(json!({ "name": "flaky" })),
        )
        .await?;
    info!(task_id = %id, "submitted flaky task");

    // (D) running が無くなり pending も空になるまで待つ
    loop {
        let status = manager.get_queue_status("hello").await?;
        if status.pending == 0 && status.running == 0 {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    // (E) graceful shutdown
    manager.stop().await;
    manager.off_all(&subscriptions);
    for status in manager.get_all_queues_status().await? {
        info!(
            queue = %status.name,
            completed = status.completed,
            failed = status.failed,
            "final counts"
        );
    }
    Ok(())
}
