//! Background task publishing rotation snapshots to collaborator clients.

use crate::state::RotationState;
use std::time::Duration;

/// How often the read-only snapshot goes out to overlays and consoles.
const SNAPSHOT_PERIOD: Duration = Duration::from_millis(250);

/// Spawn the task that broadcasts rotation snapshots at a fixed cadence.
pub fn spawn_snapshot_broadcaster(state: RotationState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown = state.shutdown_rx();
        let mut seq = 0u64;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(SNAPSHOT_PERIOD) => {
                    seq += 1;
                    let snapshot = state.snapshot(seq).await;
                    // No receivers connected is fine
                    let _ = state.broadcast.send(snapshot);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("snapshot broadcaster exited");
    })
}
