//! Request/response queue pair derived from one base name.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::IpcConfig;
use crate::error::IpcError;
use crate::ipc::queue::SharedQueue;

/// Segment name of the request queue for `base`.
pub fn request_segment_name(base: &str) -> String {
    format!("{base}_req")
}

/// Segment name of the response queue for `base`.
pub fn response_segment_name(base: &str) -> String {
    format!("{base}_resp")
}

/// The two queues a front end and a backend share.
///
/// Requests flow front end → backend, responses the other way. Dropping a
/// channel does not remove the segments; call [`Channel::unlink`] on the
/// owning side.
#[derive(Debug)]
pub struct Channel {
    name: String,
    pub requests: SharedQueue,
    pub responses: SharedQueue,
}

impl Channel {
    /// Create both segments (front-end side).
    pub fn create(config: &IpcConfig) -> Result<Self, IpcError> {
        let dir = config.shm_dir.as_path();
        let requests =
            SharedQueue::create(dir, &request_segment_name(&config.name), config.segment_size)?;
        let responses =
            SharedQueue::create(dir, &response_segment_name(&config.name), config.segment_size)?;
        info!(
            ipc = %config.name,
            dir = %dir.display(),
            size = config.segment_size,
            "Created IPC channel"
        );
        Ok(Self {
            name: config.name.clone(),
            requests,
            responses,
        })
    }

    /// Attach to segments created elsewhere.
    pub fn attach(dir: &Path, name: &str) -> Result<Self, IpcError> {
        Ok(Self {
            name: name.to_string(),
            requests: SharedQueue::attach(dir, &request_segment_name(name))?,
            responses: SharedQueue::attach(dir, &response_segment_name(name))?,
        })
    }

    /// Attach, retrying while the segments do not exist yet or are still
    /// being sized by their creator.
    pub async fn attach_with_retry(
        dir: &Path,
        name: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, IpcError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::attach(dir, name) {
                Ok(channel) => {
                    info!(ipc = %name, attempt, "Attached to IPC channel");
                    return Ok(channel);
                }
                Err(e @ (IpcError::SegmentNotFound(_) | IpcError::SegmentTooSmall { .. }))
                    if attempt < attempts =>
                {
                    warn!(
                        ipc = %name,
                        error = %e,
                        attempt,
                        attempts,
                        "Segment not ready, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flush both segments and leave them in place.
    pub fn close(&self) -> Result<(), IpcError> {
        self.requests.close()?;
        self.responses.close()?;
        info!(ipc = %self.name, "Closed IPC channel");
        Ok(())
    }

    /// Remove both segments.
    pub fn unlink(&self) -> Result<(), IpcError> {
        self.requests.unlink()?;
        self.responses.unlink()?;
        info!(ipc = %self.name, "Unlinked IPC channel");
        Ok(())
    }
}
