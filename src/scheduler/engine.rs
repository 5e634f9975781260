use crate::scheduler::Scheduler;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Main scheduler execution loop.
/// Polls for due tasks every `poll_interval`; store errors skip the iteration.
pub async fn run_scheduler_loop(scheduler: Scheduler) {
    info!(interval_secs = scheduler.poll_interval().as_secs(), "Scheduler engine started");

    let mut interval = tokio::time::interval(scheduler.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match scheduler.poll_once(Utc::now()).await {
            Ok(started) => {
                if !started.is_empty() {
                    info!(count = started.len(), "Dispatched tasks");
                }
                // Handles dropped: executions run detached.
            }
            Err(e) => {
                error!("Failed to check due tasks: {}", e);
            }
        }
    }
}
