//! Live sensor session lifecycle

use crate::{ArchiveError, ArchiveResult, LiveBuffer};
use clima_ingest::{IngestError, SensorDriver};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters for one session run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub accepted: usize,
    pub rejected: usize,
}

/// A running reader task feeding a [`LiveBuffer`]
pub struct LiveSession {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<SessionSummary>,
}

impl LiveSession {
    /// Start the driver and spawn the read loop
    pub async fn start(
        mut driver: Box<dyn SensorDriver>,
        buffer: Arc<LiveBuffer>,
    ) -> ArchiveResult<Self> {
        driver.start().await?;
        info!(driver = driver.name(), "live session started");

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(read_loop(driver, buffer, stop_rx));
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle,
        })
    }

    /// True once the read loop has exited on its own
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the read loop to stop and wait for the driver to close
    pub async fn stop(mut self) -> ArchiveResult<SessionSummary> {
        if let Some(tx) = self.stop_tx.take() {
            // The loop may already be gone if the source closed
            let _ = tx.send(());
        }
        self.handle
            .await
            .map_err(|e| ArchiveError::TaskFailed(e.to_string()))
    }
}

async fn read_loop(
    mut driver: Box<dyn SensorDriver>,
    buffer: Arc<LiveBuffer>,
    mut stop_rx: oneshot::Receiver<()>,
) -> SessionSummary {
    let mut summary = SessionSummary::default();

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            next = driver.next_sample() => match next {
                Ok(sample) => match buffer.push(sample).await {
                    Ok(()) => summary.accepted += 1,
                    Err(e) => {
                        summary.rejected += 1;
                        warn!(error = %e, "dropping live sample");
                    }
                },
                Err(IngestError::InvalidPacket(reason)) => {
                    summary.rejected += 1;
                    warn!(%reason, "dropping malformed sensor line");
                }
                Err(IngestError::Closed) => {
                    info!("sensor stream closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "sensor read failed, ending session");
                    break;
                }
            },
        }
    }

    if let Err(e) = driver.stop().await {
        debug!(error = %e, "driver stop reported an error");
    }
    info!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        "live session ended"
    );
    summary
}

/// At most one live session at a time
#[derive(Default)]
pub struct SessionControl {
    current: Mutex<Option<LiveSession>>,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session unless one is already reading.
    ///
    /// A previous session whose source closed on its own is reaped first.
    pub async fn start(
        &self,
        driver: Box<dyn SensorDriver>,
        buffer: Arc<LiveBuffer>,
    ) -> ArchiveResult<()> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.take() {
            if !session.is_finished() {
                *current = Some(session);
                return Err(ArchiveError::SessionActive);
            }
            session.stop().await?;
        }
        *current = Some(LiveSession::start(driver, buffer).await?);
        Ok(())
    }

    /// Stop the current session
    pub async fn stop(&self) -> ArchiveResult<SessionSummary> {
        let session = self
            .current
            .lock()
            .await
            .take()
            .ok_or(ArchiveError::SessionInactive)?;
        session.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.is_finished())
    }
}
