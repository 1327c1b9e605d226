//! FIFO message queue over a shared-memory segment.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::IpcError;
use crate::ipc::envelope::{IpcMessage, MessagePatch};
use crate::ipc::layout::{self, FrameError, Record};
use crate::ipc::segment::Segment;

/// Queue of [`IpcMessage`] records in one segment.
///
/// Every operation holds the segment lock for exactly its own read/modify of
/// the buffer.
#[derive(Debug)]
pub struct SharedQueue {
    segment: Segment,
}

/// Decodes only the correlation id of a record.
#[derive(Deserialize)]
struct EnvelopeId<'a> {
    #[serde(borrow)]
    id: std::borrow::Cow<'a, str>,
}

impl SharedQueue {
    pub fn create(dir: &Path, name: &str, size: usize) -> Result<Self, IpcError> {
        Ok(Self {
            segment: Segment::create(dir, name, size)?,
        })
    }

    pub fn attach(dir: &Path, name: &str) -> Result<Self, IpcError> {
        Ok(Self {
            segment: Segment::attach(dir, name)?,
        })
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    /// Append a message. A full segment is left untouched.
    pub fn send(&self, msg: &IpcMessage) -> Result<(), IpcError> {
        let bytes = msg.to_bytes()?;
        let mut buf = self.segment.lock()?;
        layout::push_back(&mut buf, &bytes).map_err(|e| self.frame_error(e))?;
        debug!(queue = %self.name(), id = %msg.id, bytes = bytes.len(), "Queued message");
        Ok(())
    }

    /// The head message without removing it.
    pub fn peek(&self) -> Result<Option<IpcMessage>, IpcError> {
        let buf = self.segment.lock()?;
        match layout::front(&buf).map_err(|e| self.frame_error(e))? {
            Some(payload) => self.decode(payload, layout::HEADER_LEN).map(Some),
            None => Ok(None),
        }
    }

    /// Remove and return the head message.
    pub fn receive(&self) -> Result<Option<IpcMessage>, IpcError> {
        let mut buf = self.segment.lock()?;
        match layout::pop_front(&mut buf).map_err(|e| self.frame_error(e))? {
            Some(payload) => self.decode(&payload, layout::HEADER_LEN).map(Some),
            None => Ok(None),
        }
    }

    /// Remove the head message only if `pred` accepts it. Peek and removal
    /// happen under one lock.
    pub fn receive_if<F>(&self, pred: F) -> Result<Option<IpcMessage>, IpcError>
    where
        F: FnOnce(&IpcMessage) -> bool,
    {
        let mut buf = self.segment.lock()?;
        let head = match layout::front(&buf).map_err(|e| self.frame_error(e))? {
            Some(payload) => self.decode(payload, layout::HEADER_LEN)?,
            None => return Ok(None),
        };
        if !pred(&head) {
            return Ok(None);
        }
        layout::pop_front(&mut buf).map_err(|e| self.frame_error(e))?;
        Ok(Some(head))
    }

    /// Apply `patch` to the first record whose id is `id`.
    ///
    /// Returns `Ok(false)` when no record carries that id. Records other than
    /// the target keep their bytes unless the target grows, in which case the
    /// ones after it shift right.
    pub fn update_by_id(&self, id: &str, patch: &MessagePatch) -> Result<bool, IpcError> {
        let mut buf = self.segment.lock()?;
        let Some(record) = self.find(&buf, id)? else {
            return Ok(false);
        };

        let mut msg = self.decode(&buf[record.payload_range()], record.offset)?;
        msg.apply(patch)?;
        let bytes = msg.to_bytes()?;
        layout::replace(&mut buf, record, &bytes).map_err(|e| self.frame_error(e))?;
        debug!(queue = %self.name(), id, status = %msg.status, "Updated message in place");
        Ok(true)
    }

    /// Drop the first record whose id is `id`, wherever it sits in the queue.
    /// Returns `Ok(false)` when no record carries that id.
    pub fn remove_by_id(&self, id: &str) -> Result<bool, IpcError> {
        let mut buf = self.segment.lock()?;
        let Some(record) = self.find(&buf, id)? else {
            return Ok(false);
        };
        layout::remove(&mut buf, record).map_err(|e| self.frame_error(e))?;
        debug!(queue = %self.name(), id, "Removed message");
        Ok(true)
    }

    /// First record carrying `id`. Only the id field of each record is decoded.
    fn find(&self, buf: &[u8], id: &str) -> Result<Option<Record>, IpcError> {
        let records = layout::records(buf).map_err(|e| self.frame_error(e))?;
        for record in records {
            let head: EnvelopeId<'_> = serde_json::from_slice(&buf[record.payload_range()])
                .map_err(|e| IpcError::Corrupt {
                    name: self.name().to_string(),
                    offset: record.offset,
                    reason: format!("unreadable record id: {e}"),
                })?;
            if head.id == id {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub fn len(&self) -> Result<usize, IpcError> {
        let buf = self.segment.lock()?;
        layout::count(&buf).map_err(|e| self.frame_error(e))
    }

    pub fn is_empty(&self) -> Result<bool, IpcError> {
        Ok(self.len()? == 0)
    }

    /// Bytes occupied by the header and all records.
    pub fn used_bytes(&self) -> Result<usize, IpcError> {
        let buf = self.segment.lock()?;
        layout::used_end(&buf).map_err(|e| self.frame_error(e))
    }

    pub fn capacity(&self) -> Result<usize, IpcError> {
        Ok(self.segment.lock()?.len())
    }

    /// Drop every queued message.
    pub fn clear(&self) -> Result<(), IpcError> {
        let mut buf = self.segment.lock()?;
        layout::init(&mut buf);
        Ok(())
    }

    pub fn close(&self) -> Result<(), IpcError> {
        self.segment.close()
    }

    pub fn unlink(&self) -> Result<(), IpcError> {
        self.segment.unlink()
    }

    fn decode(&self, payload: &[u8], offset: usize) -> Result<IpcMessage, IpcError> {
        serde_json::from_slice(payload).map_err(|e| IpcError::Corrupt {
            name: self.name().to_string(),
            offset,
            reason: format!("unparseable payload: {e}"),
        })
    }

    fn frame_error(&self, err: FrameError) -> IpcError {
        let name = self.name().to_string();
        match err {
            FrameError::Capacity { needed, available } => IpcError::CapacityExceeded {
                name,
                needed,
                available,
            },
            FrameError::Corrupt { offset, reason } => IpcError::Corrupt {
                name,
                offset,
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::envelope::MessageStatus;

    fn queue(dir: &tempfile::TempDir, size: usize) -> SharedQueue {
        SharedQueue::create(dir.path(), "test_queue", size).unwrap()
    }

    fn request(id: &str, text: &str) -> IpcMessage {
        IpcMessage::service_request("t1", text).with_id(id)
    }

    #[test]
    fn fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(&dir, 4096);
        for id in ["a", "b", "c"] {
            q.send(&request(id, "hello")).unwrap();
        }
        assert_eq!(q.len().unwrap(), 3);
        let ids: Vec<_> = std::iter::from_fn(|| q.receive().unwrap())
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(q.is_empty().unwrap());
    }

    #[test]
    fn peek_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(&dir, 4096);
        assert!(q.peek().unwrap().is_none());
        q.send(&request("a", "hi")).unwrap();
        let used = q.used_bytes().unwrap();

        let first = q.peek().unwrap().unwrap();
        let second = q.peek().unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(q.len().unwrap(), 1);
        assert_eq!(q.used_bytes().unwrap(), used);
    }

    #[test]
    fn full_segment_rejects_and_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(&dir, 512);
        q.send(&request("a", "small")).unwrap();
        let used = q.used_bytes().unwrap();

        let big = request("b", &"x".repeat(1024));
        let err = q.send(&big).unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, IpcError::CapacityExceeded { .. }));
        assert_eq!(q.len().unwrap(), 1);
        assert_eq!(q.used_bytes().unwrap(), used);
    }

    #[test]
    fn shrinking_update_leaves_neighbours_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(&dir, 8192);
        let mut long = IpcMessage::response_to(&request("b", ""), MessageStatus::Processing);
        long.response_text = "a fairly long partial reply that will shrink".into();
        q.send(&request("a", "first")).unwrap();
        q.send(&long).unwrap();
        q.send(&request("c", "third")).unwrap();
        let used = q.used_bytes().unwrap();

        let patch = MessagePatch::status(MessageStatus::Completed).with_text("ok");
        assert!(q.update_by_id("b", &patch).unwrap());
        assert_eq!(q.used_bytes().unwrap(), used);

        let a = q.receive().unwrap().unwrap();
        let b = q.receive().unwrap().unwrap();
        let c = q.receive().unwrap().unwrap();
        assert_eq!((a.id.as_str(), a.text.as_str()), ("a", "first"));
        assert_eq!(b.status, MessageStatus::Completed);
        assert_eq!(b.response_text, "ok");
        assert_eq!((c.id.as_str(), c.text.as_str()), ("c", "third"));
    }

    #[test]
    fn growing_update_shifts_later_records() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(&dir, 8192);
        q.send(&request("a", "first")).unwrap();
        q.send(&IpcMessage::response_to(&request("b", ""), MessageStatus::Processing))
            .unwrap();
        q.send(&request("c", "third")).unwrap();
        let used = q.used_bytes().unwrap();

        let reply = "a much longer reply than before ".repeat(4);
        let patch = MessagePatch::status(MessageStatus::Completed).with_text(reply.clone());
        assert!(q.update_by_id("b", &patch).unwrap());
        assert!(q.used_bytes().unwrap() > used);

        assert_eq!(q.receive().unwrap().unwrap().text, "first");
        assert_eq!(q.receive().unwrap().unwrap().response_text, reply);
        assert_eq!(q.receive().unwrap().unwrap().text, "third");
    }

    #[test]
    fn growing_update_that_does_not_fit_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(&dir, 400);
        q.send(&request("a", "first")).unwrap();
        let before = q.peek().unwrap().unwrap();
        let used = q.used_bytes().unwrap();

        let patch = MessagePatch::status(MessageStatus::Processing).with_text("y".repeat(600));
        let err = q.update_by_id("a", &patch).unwrap_err();
        assert!(matches!(err, IpcError::CapacityExceeded { .. }));
        assert_eq!(q.used_bytes().unwrap(), used);
        assert_eq!(q.peek().unwrap().unwrap(), before);
    }

    #[test]
    fn update_unknown_id_and_backward_status() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(&dir, 4096);
        q.send(&IpcMessage::response_to(&request("a", ""), MessageStatus::Completed))
            .unwrap();
        assert!(
            !q.update_by_id("zzz", &MessagePatch::status(MessageStatus::Error))
                .unwrap()
        );
        let err = q
            .update_by_id("a", &MessagePatch::status(MessageStatus::Processing))
            .unwrap_err();
        assert!(matches!(err, IpcError::InvalidTransition { .. }));
    }

    #[test]
    fn remove_by_id_drops_one_record_anywhere() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(&dir, 4096);
        q.send(&request("a", "first")).unwrap();
        q.send(&request("b", "second")).unwrap();
        q.send(&request("c", "third")).unwrap();

        assert!(q.remove_by_id("b").unwrap());
        assert!(!q.remove_by_id("b").unwrap());
        assert_eq!(q.len().unwrap(), 2);
        assert_eq!(q.receive().unwrap().unwrap().id, "a");
        assert_eq!(q.receive().unwrap().unwrap().id, "c");
    }

    #[test]
    fn receive_if_only_takes_matching_head() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(&dir, 4096);
        q.send(&request("a", "first")).unwrap();
        assert!(q.receive_if(|m| m.id == "b").unwrap().is_none());
        assert_eq!(q.len().unwrap(), 1);
        assert_eq!(q.receive_if(|m| m.id == "a").unwrap().unwrap().id, "a");
        assert!(q.is_empty().unwrap());
    }

    #[test]
    fn garbage_payload_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(&dir, 256);
        {
            let mut buf = q.segment.lock().unwrap();
            layout::push_back(&mut buf, b"not json").unwrap();
        }
        assert!(matches!(q.peek(), Err(IpcError::Corrupt { .. })));
    }

    #[test]
    fn clear_empties_queue() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(&dir, 4096);
        q.send(&request("a", "x")).unwrap();
        q.clear().unwrap();
        assert!(q.is_empty().unwrap());
        assert_eq!(q.used_bytes().unwrap(), layout::HEADER_LEN);
        assert_eq!(q.capacity().unwrap(), 4096);
    }
}
