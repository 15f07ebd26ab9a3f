//! `patchwright dispatch` command: run the worker pool against all pending
//! builds until interrupted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use patchwright_core::contract::AgentRegistry;
use patchwright_core::dispatcher::{Dispatcher, DispatcherConfig};

/// Run the dispatch command: spin up `worker_count` worker loops and drive
/// every build's task chain to completion until `Ctrl-C`.
///
/// This repo ships no production agent bodies (spec Non-goals), so the
/// registry passed in is normally empty: any leased task immediately fails
/// closed with `NO_AGENT_REGISTERED`. Wiring real agents is left to the
/// operator embedding this crate.
pub async fn run_dispatch(
    pool: &PgPool,
    registry: AgentRegistry,
    worker_count: usize,
    task_timeout_secs: u64,
) -> Result<()> {
    println!("Dispatching with {worker_count} worker(s)");
    println!("  Task timeout: {task_timeout_secs}s");
    if registry.is_empty() {
        println!("  Warning: no agents registered; leased tasks will fail closed.");
    }

    let config = DispatcherConfig {
        worker_count,
        agent_timeout: Duration::from_secs(task_timeout_secs),
        ..DispatcherConfig::default()
    };

    let dispatcher = Dispatcher::new(pool.clone(), registry, config);

    // First signal requests graceful shutdown, second forces exit.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    dispatcher.run(cancel, Duration::from_secs(30)).await;

    println!("\nDispatcher stopped. In-flight task leases expire naturally if any were left running.");

    Ok(())
}
