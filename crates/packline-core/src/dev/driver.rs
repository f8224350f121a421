use super::hmr::{classify, Notification};
use super::queue::RebuildQueue;
use super::session::{DevSession, Publication, ServerState};
use crate::bundler::{Build, Pipeline};
use crate::error::BuildError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Runs builds for a dev session, one at a time.
///
/// Pipeline runs are blocking and go to the blocking pool; the driver
/// publishes their results and broadcasts the classified change.
pub struct DevDriver {
    pipeline: Arc<Pipeline>,
    session: Arc<DevSession>,
    queue: Arc<RebuildQueue>,
}

impl DevDriver {
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, session: Arc<DevSession>, queue: Arc<RebuildQueue>) -> Self {
        Self {
            pipeline,
            session,
            queue,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<DevSession> {
        &self.session
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<RebuildQueue> {
        &self.queue
    }

    /// Initial full build. On failure the session stops and the error is
    /// returned.
    pub async fn start(&self) -> Result<(), BuildError> {
        self.session.transition(ServerState::Building)?;
        let ticket = self.session.next_ticket();
        let pipeline = Arc::clone(&self.pipeline);
        match run_blocking(move || pipeline.build()).await {
            Ok(build) => {
                self.session.publish(ticket, build);
                self.session.transition(ServerState::Serving)?;
                info!(ticket, "serving");
                Ok(())
            }
            Err(e) => {
                self.session.transition(ServerState::Stopped)?;
                Err(e)
            }
        }
    }

    /// One incremental rebuild. Failures keep the previous build published
    /// and are broadcast as an `error` notification.
    pub async fn rebuild(&self, changed: Vec<PathBuf>) -> Option<Notification> {
        if let Err(e) = self.session.transition(ServerState::Rebuilding) {
            error!(error = %e, "rebuild requested while not serving");
            return None;
        }
        let ticket = self.session.next_ticket();
        let pipeline = Arc::clone(&self.pipeline);
        let files = changed.len();
        let result = run_blocking(move || pipeline.rebuild(&changed)).await;

        let notification = match result {
            Ok(build) => match self.session.publish(ticket, build) {
                Publication::Published { previous } => {
                    let next = self.session.build();
                    match (previous, next) {
                        (Some(prev), Some(next)) => classify(&prev, &next, ticket),
                        _ => Some(Notification::FullReload {
                            build: ticket,
                            reason: "first build".to_string(),
                        }),
                    }
                }
                Publication::Discarded => None,
            },
            Err(e) => {
                error!(code = e.code(), error = %e, files, "rebuild failed");
                Some(Notification::error(&e))
            }
        };

        if let Err(e) = self.session.transition(ServerState::Serving) {
            error!(error = %e, "cannot resume serving");
        }
        if let Some(n) = &notification {
            self.session.notify(n.clone());
        }
        notification
    }

    /// Process queued rebuilds until the queue closes, then stop.
    pub async fn run(&self) {
        while let Some(batch) = self.queue.next().await {
            self.rebuild(batch).await;
        }
        let _ = self.session.transition(ServerState::Stopped);
    }
}

/// Run a pipeline call on the blocking pool; a panicked worker becomes
/// [`BuildError::Internal`].
async fn run_blocking<F>(f: F) -> Result<Build, BuildError>
where
    F: FnOnce() -> Result<Build, BuildError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BuildError::Internal(format!("build worker failed: {e}")))?
}
