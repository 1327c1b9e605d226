//! Front-end side of the channel: submit requests, wait for their responses.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::IpcError;
use crate::ipc::channel::Channel;
use crate::ipc::envelope::{IpcMessage, MessageStatus};

/// Submits requests and polls the response queue head for matching ids.
pub struct IpcClient {
    channel: Channel,
    poll_interval: Duration,
    /// Ids nobody listens for anymore. Their terminal responses are dropped
    /// when they reach the head of the queue.
    abandoned: Mutex<HashSet<String>>,
}

impl IpcClient {
    pub fn new(channel: Channel, poll_interval: Duration) -> Self {
        Self {
            channel,
            poll_interval,
            abandoned: Mutex::new(HashSet::new()),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Enqueue a request and return its id.
    pub fn submit(&self, msg: &IpcMessage) -> Result<String, IpcError> {
        self.channel.requests.send(msg)?;
        debug!(id = %msg.id, kind = %msg.kind, "Submitted request");
        Ok(msg.id.clone())
    }

    /// Poll until the response for `id` is terminal.
    ///
    /// `on_partial` sees each new partial text while the backend reports
    /// `processing`. The terminal envelope is dequeued and returned. On
    /// timeout the id is abandoned, so its late response cannot block the
    /// queue head; awaiting the id again takes it back.
    pub async fn await_response<F>(
        &self,
        id: &str,
        timeout: Duration,
        mut on_partial: F,
    ) -> Result<IpcMessage, IpcError>
    where
        F: FnMut(&str),
    {
        let deadline = Instant::now() + timeout;
        let mut last_partial = String::new();
        self.abandoned.lock().await.remove(id);

        loop {
            self.drop_abandoned_heads().await?;

            let responses = &self.channel.responses;
            if let Some(done) = responses.receive_if(|m| m.id == id && m.status.is_terminal())? {
                debug!(id, status = %done.status, "Received response");
                return Ok(done);
            }

            if let Some(head) = responses.peek()? {
                if head.id == id
                    && head.status == MessageStatus::Processing
                    && head.response_text != last_partial
                {
                    on_partial(&head.response_text);
                    last_partial = head.response_text;
                }
            }

            if Instant::now() >= deadline {
                self.abandon(id).await;
                return Err(IpcError::Timeout {
                    id: id.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Stop listening for `id`. The backend still finishes the request; its
    /// response is discarded once it reaches the head.
    pub async fn abandon(&self, id: &str) {
        self.abandoned.lock().await.insert(id.to_string());
        info!(id, "Abandoned request");
    }

    /// Submit `msg` and wait for its terminal response.
    pub async fn request<F>(
        &self,
        msg: &IpcMessage,
        timeout: Duration,
        on_partial: F,
    ) -> Result<IpcMessage, IpcError>
    where
        F: FnMut(&str),
    {
        let id = self.submit(msg)?;
        self.await_response(&id, timeout, on_partial).await
    }

    async fn drop_abandoned_heads(&self) -> Result<(), IpcError> {
        let mut abandoned = self.abandoned.lock().await;
        if abandoned.is_empty() {
            return Ok(());
        }
        while let Some(dropped) = self
            .channel
            .responses
            .receive_if(|m| m.status.is_terminal() && abandoned.contains(&m.id))?
        {
            debug!(id = %dropped.id, "Dropped response of abandoned request");
            abandoned.remove(&dropped.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpcConfig;
    use crate::ipc::envelope::MessagePatch;

    fn client(dir: &tempfile::TempDir) -> IpcClient {
        let channel = Channel::create(&IpcConfig {
            name: "client_test".into(),
            shm_dir: dir.path().to_path_buf(),
            segment_size: 8192,
        })
        .unwrap();
        IpcClient::new(channel, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn returns_terminal_response_and_reports_partials() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        let request = IpcMessage::service_request("t1", "hello");
        let id = client.submit(&request).unwrap();

        let responses = &client.channel().responses;
        responses
            .send(&IpcMessage::response_to(&request, MessageStatus::Processing))
            .unwrap();
        responses
            .update_by_id(
                &id,
                &MessagePatch::status(MessageStatus::Processing).with_text("Hel"),
            )
            .unwrap();

        let mut partials = Vec::new();
        let pending = client.await_response(&id, Duration::from_millis(20), |p| {
            partials.push(p.to_string())
        });
        // Nothing terminal yet.
        assert!(matches!(pending.await, Err(IpcError::Timeout { .. })));
        assert_eq!(partials, ["Hel"]);

        responses
            .update_by_id(
                &id,
                &MessagePatch::status(MessageStatus::Completed).with_text("Hello!"),
            )
            .unwrap();
        let done = client
            .await_response(&id, Duration::from_secs(1), |_| {})
            .await
            .unwrap();
        assert_eq!(done.response_text, "Hello!");
        assert!(responses.is_empty().unwrap());
    }

    #[tokio::test]
    async fn late_response_after_timeout_does_not_block_the_next() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        let slow = IpcMessage::service_request("t1", "slow");
        let err = client
            .request(&slow, Duration::from_millis(20), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::Timeout { .. }));

        let next = IpcMessage::service_request("t1", "next");
        client.submit(&next).unwrap();
        let responses = &client.channel().responses;
        responses
            .send(&IpcMessage::response_to(&slow, MessageStatus::Completed))
            .unwrap();
        responses
            .send(&IpcMessage::response_to(&next, MessageStatus::Completed))
            .unwrap();

        let done = client
            .await_response(&next.id, Duration::from_secs(1), |_| {})
            .await
            .unwrap();
        assert_eq!(done.id, next.id);
        assert!(responses.is_empty().unwrap());
    }

    #[tokio::test]
    async fn abandoned_responses_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir);
        let first = IpcMessage::service_request("t1", "first");
        let second = IpcMessage::service_request("t1", "second");
        client.submit(&first).unwrap();
        client.submit(&second).unwrap();
        client.abandon(&first.id).await;

        let responses = &client.channel().responses;
        responses
            .send(&IpcMessage::response_to(&first, MessageStatus::Completed))
            .unwrap();
        responses
            .send(&IpcMessage::response_to(&second, MessageStatus::Completed))
            .unwrap();

        let done = client
            .await_response(&second.id, Duration::from_secs(1), |_| {})
            .await
            .unwrap();
        assert_eq!(done.id, second.id);
        assert!(responses.is_empty().unwrap());
    }
}
