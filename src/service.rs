//! Backend service loop: serve requests from the IPC channel.
//!
//! The loop peeks the request queue, handles the head message, then
//! dequeues it. For each request a `processing` envelope with the same id is
//! written to the response queue and patched in place as the reply grows,
//! ending as `completed` or `error`.

use std::future::Future;

use tracing::{debug, error, info, warn};

use crate::agent::dispatcher::{Dispatcher, Disposition, ProgressSink, TurnInput, TurnOutcome};
use crate::config::{DispatcherConfig, IpcConfig, ServiceConfig};
use crate::conversation::ThreadId;
use crate::error::IpcError;
use crate::ipc::{Channel, IpcMessage, MessageKind, MessagePatch, MessageStatus, SharedQueue};

const INTERNAL_ERROR_REPLY: &str = "Sorry, something went wrong on my side. Please try again.";

/// Whether the loop keeps going after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Continue,
    Stop,
}

/// Serves one channel with one dispatcher. Requests are handled one at a time.
pub struct BackendService {
    config: ServiceConfig,
    channel: Channel,
    dispatcher: Dispatcher,
}

impl BackendService {
    pub fn new(config: ServiceConfig, channel: Channel, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            channel,
            dispatcher,
        }
    }

    /// Attach to the front end's segments, waiting for them to appear.
    pub async fn connect(
        ipc: &IpcConfig,
        config: ServiceConfig,
        dispatcher: Dispatcher,
    ) -> Result<Self, IpcError> {
        let channel = Channel::attach_with_retry(
            &ipc.shm_dir,
            &ipc.name,
            config.attach_retries,
            config.attach_delay,
        )
        .await?;
        Ok(Self::new(config, channel, dispatcher))
    }

    /// Serve `ipc` with offline collaborators and settings read from the
    /// environment. `create` makes fresh segments instead of attaching to a
    /// front end's.
    pub async fn serve_offline<F>(ipc: &IpcConfig, create: bool, stop: F) -> crate::error::Result<()>
    where
        F: Future<Output = ()>,
    {
        let dispatcher = Dispatcher::offline(DispatcherConfig::from_env()?);
        let config = ServiceConfig::from_env()?;
        let service = if create {
            Self::new(config, Channel::create(ipc)?, dispatcher)
        } else {
            Self::connect(ipc, config, dispatcher).await?
        };
        service.run_until(stop).await?;
        Ok(())
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Serve until a shutdown request arrives or `stop` resolves.
    ///
    /// The channel is closed on exit, never unlinked. A request that cannot
    /// be answered is logged and dropped; only an unreadable request segment
    /// ends the loop with an error.
    pub async fn run_until<F>(&self, stop: F) -> Result<(), IpcError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);
        info!(ipc = %self.channel.name(), "Backend service started");

        let result = loop {
            let head = match self.channel.requests.peek() {
                Ok(head) => head,
                Err(e) => {
                    error!(error = %e, "Request queue unreadable, stopping");
                    break Err(e);
                }
            };

            let Some(msg) = head else {
                tokio::select! {
                    _ = &mut stop => {
                        info!("Stop signal received");
                        break Ok(());
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            };

            let control = self.handle(&msg).await;
            if let Err(e) = self.channel.requests.receive() {
                break Err(e);
            }
            if control == Control::Stop {
                info!("Shutdown requested");
                break Ok(());
            }
        };

        self.channel.close()?;
        info!(ipc = %self.channel.name(), "Backend service stopped");
        result
    }

    async fn handle(&self, msg: &IpcMessage) -> Control {
        debug!(id = %msg.id, kind = %msg.kind, thread_id = %msg.thread_id, "Handling request");
        let (control, result) = match msg.kind {
            MessageKind::ServiceRequest => (Control::Continue, self.serve_turn(msg).await),
            MessageKind::ClearHistory => (Control::Continue, self.clear_history(msg).await),
            MessageKind::Shutdown => (
                Control::Stop,
                self.send_with_retry(&IpcMessage::response_to(msg, MessageStatus::Completed))
                    .await,
            ),
        };
        if let Err(e) = result {
            error!(id = %msg.id, kind = %msg.kind, error = %e, "Could not answer request, dropping it");
        }
        control
    }

    async fn clear_history(&self, msg: &IpcMessage) -> Result<(), IpcError> {
        let thread_id = ThreadId::from(msg.thread_id.as_str());
        let reply = match self.dispatcher.clear_history(&thread_id).await {
            Ok(()) => IpcMessage::response_to(msg, MessageStatus::Completed),
            Err(e) => {
                let mut reply = IpcMessage::response_to(msg, MessageStatus::Error);
                reply.error_message = e.to_string();
                reply
            }
        };
        self.send_with_retry(&reply).await
    }

    async fn serve_turn(&self, msg: &IpcMessage) -> Result<(), IpcError> {
        self.send_with_retry(&IpcMessage::response_to(msg, MessageStatus::Processing))
            .await?;

        let input = match decode_turn(msg) {
            Ok(input) => input,
            Err(e) => {
                warn!(id = %msg.id, error = %e, "Rejecting request with bad payload");
                let patch = MessagePatch::status(MessageStatus::Error)
                    .with_text("Sorry, I couldn't read the media you sent.")
                    .with_error(e.to_string());
                return self.finish(&msg.id, patch).await;
            }
        };

        let sink = QueueProgress {
            queue: &self.channel.responses,
            id: &msg.id,
        };
        let thread_id = ThreadId::from(msg.thread_id.as_str());
        let patch = match self.dispatcher.handle_turn(&thread_id, input, &sink).await {
            Ok(outcome) => terminal_patch(outcome),
            Err(e) => {
                error!(id = %msg.id, thread_id = %thread_id, error = %e, "Turn failed");
                MessagePatch::status(MessageStatus::Error)
                    .with_text(INTERNAL_ERROR_REPLY)
                    .with_error(e.to_string())
            }
        };
        self.finish(&msg.id, patch).await
    }

    /// Move the response envelope to its terminal status.
    ///
    /// A reply that still does not fit after the retries is replaced by a
    /// bare error naming the capacity failure. If even that does not fit,
    /// the envelope is removed so the response queue keeps moving.
    async fn finish(&self, id: &str, patch: MessagePatch) -> Result<(), IpcError> {
        let full = match self.patch_with_retry(id, &patch).await {
            Err(e @ IpcError::CapacityExceeded { .. }) => e,
            other => return other,
        };
        warn!(id, error = %full, "Reply does not fit the response queue, answering with an error");

        let fallback = MessagePatch {
            response_audio: Some(String::new()),
            ..MessagePatch::status(MessageStatus::Error)
                .with_text("")
                .with_error(format!("reply too large for the response queue: {full}"))
        };
        match self.channel.responses.update_by_id(id, &fallback) {
            Err(IpcError::CapacityExceeded { .. }) => {
                warn!(id, "Error envelope does not fit either, removing the response");
                self.channel.responses.remove_by_id(id).map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }

    /// Send to the response queue, waiting out a full segment.
    async fn send_with_retry(&self, msg: &IpcMessage) -> Result<(), IpcError> {
        let mut attempt = 1;
        loop {
            match self.channel.responses.send(msg) {
                Err(e) if e.is_recoverable() && attempt < self.config.send_retries => {
                    warn!(id = %msg.id, attempt, error = %e, "Response queue full, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                other => return other,
            }
        }
    }

    async fn patch_with_retry(&self, id: &str, patch: &MessagePatch) -> Result<(), IpcError> {
        let mut attempt = 1;
        loop {
            match self.channel.responses.update_by_id(id, patch) {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    warn!(id, "Response envelope is gone, dropping update");
                    return Ok(());
                }
                Err(e) if e.is_recoverable() && attempt < self.config.send_retries => {
                    warn!(id, attempt, error = %e, "Response queue full, retrying update");
                    attempt += 1;
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Turns reply increments into `processing` updates of one envelope.
struct QueueProgress<'a> {
    queue: &'a SharedQueue,
    id: &'a str,
}

impl ProgressSink for QueueProgress<'_> {
    fn partial(&self, text: &str) {
        let patch = MessagePatch::status(MessageStatus::Processing).with_text(text);
        if let Err(e) = self.queue.update_by_id(self.id, &patch) {
            warn!(id = %self.id, error = %e, "Could not publish partial reply");
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    Some(s.to_string()).filter(|s| !s.is_empty())
}

fn decode_turn(msg: &IpcMessage) -> Result<TurnInput, IpcError> {
    Ok(TurnInput {
        text: msg.text.clone(),
        image: msg.image_bytes()?,
        audio: msg.audio_bytes()?,
        video: msg.video_bytes()?,
        system_prompt: non_empty(&msg.system_prompt),
        voice: non_empty(&msg.voice),
    })
}

fn terminal_patch(outcome: TurnOutcome) -> MessagePatch {
    if let Disposition::Failed { reason, .. } = &outcome.disposition {
        return MessagePatch::status(MessageStatus::Error)
            .with_text(outcome.reply.clone())
            .with_error(reason.clone());
    }
    let patch = MessagePatch::status(MessageStatus::Completed).with_text(outcome.reply);
    match outcome.audio {
        Some(audio) => patch.with_audio(&audio),
        None => patch,
    }
}
