use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, Semaphore};

use crate::store::AppState;

/// In-process build scheduler state. The durable queue is the `images`
/// table itself (spec §9 — "the Image row is the queue entry"); this struct
/// only tracks which projects currently have a build in flight, so triggers
/// can be serialized per-project and coalesced.
pub struct BuildState {
    concurrency: Arc<Semaphore>,
    pending: Mutex<HashSet<String>>,
    in_flight: Mutex<HashSet<String>>,
    wake: Notify,
}

impl BuildState {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: Arc::new(Semaphore::new(concurrency.max(1))),
            pending: Mutex::new(HashSet::new()),
            in_flight: Mutex::new(HashSet::new()),
            wake: Notify::new(),
        }
    }
}

/// Request a build for a project. Builds are deduplicated by the pipeline
/// itself (same commit hash, already `building`/`ready` — spec §4.4); this
/// function only ensures the project is scheduled for a pass.
pub async fn enqueue(state: &AppState, project_id: String) {
    state.build_state.pending.lock().await.insert(project_id);
    state.build_state.wake.notify_one();
}

/// The dispatcher loop, spawned once at startup: pulls pending project ids
/// and runs bounded-concurrency build workers. Builds for different
/// projects run in parallel, up to `build_concurrency` (spec §4.4); at most
/// one build per project is ever in flight at a time (spec §5).
pub async fn run(state: AppState, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        let pending: Vec<String> = state.build_state.pending.lock().await.drain().collect();

        for project_id in pending {
            let already_running = state
                .build_state
                .in_flight
                .lock()
                .await
                .contains(&project_id);

            if already_running {
                // A trigger arrived mid-build — handled on the next cycle,
                // once the in-flight build for this project completes.
                state.build_state.pending.lock().await.insert(project_id);
                continue;
            }

            let Ok(permit) = state.build_state.concurrency.clone().try_acquire_owned() else {
                // No worker capacity right now; try again next pass.
                state.build_state.pending.lock().await.insert(project_id);
                continue;
            };

            state
                .build_state
                .in_flight
                .lock()
                .await
                .insert(project_id.clone());

            let worker_state = state.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = super::pipeline::run_build(&worker_state, &project_id).await {
                    tracing::error!(error = %e, %project_id, "build pipeline failed");
                }
                worker_state
                    .build_state
                    .in_flight
                    .lock()
                    .await
                    .remove(&project_id);
            });
        }

        tokio::select! {
            () = state.build_state.wake.notified() => {}
            () = tokio::time::sleep(Duration::from_secs(2)) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
