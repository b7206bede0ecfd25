//! Long-lived tasks: per-mission executors and their companion flights.

pub mod charging;
pub mod mission_loop;
pub mod replacement_flight;
pub mod return_flight;

use std::time::Duration;
use tokio::sync::broadcast;

/// Sleep one tick unless shutdown arrives first. Returns false on shutdown.
pub(crate) async fn sleep_or_shutdown(
    duration: Duration,
    shutdown: &mut broadcast::Receiver<()>,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.recv() => false,
    }
}
