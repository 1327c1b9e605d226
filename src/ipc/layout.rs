//! Byte layout of a queue segment.
//!
//! ```text
//! [count: i32 LE][len: i32 LE][payload ...][len: i32 LE][payload ...] ... [unused]
//! ```
//!
//! Records are packed contiguously in FIFO order. These functions operate on
//! plain byte slices and know nothing about locking or message encoding; the
//! caller holds the segment lock for the whole call.

use std::ops::Range;

/// Bytes used by the message-count header.
pub const HEADER_LEN: usize = 4;

/// Bytes used by each record's length prefix.
pub const LEN_PREFIX: usize = 4;

/// Framing failure, mapped to `IpcError` by the queue with the segment name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    Capacity { needed: usize, available: usize },
    Corrupt { offset: usize, reason: String },
}

/// Location of one record inside the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    /// Offset of the length prefix.
    pub offset: usize,
    /// Payload length in bytes.
    pub len: usize,
}

impl Record {
    pub fn payload_range(&self) -> Range<usize> {
        let start = self.offset + LEN_PREFIX;
        start..start + self.len
    }

    /// Offset one past the payload.
    pub fn end(&self) -> usize {
        self.offset + LEN_PREFIX + self.len
    }
}

/// Reset the buffer to an empty queue.
pub fn init(buf: &mut [u8]) {
    buf.fill(0);
}

/// Number of queued records according to the header.
pub fn count(buf: &[u8]) -> Result<usize, FrameError> {
    let raw = read_i32(buf, 0)?;
    usize::try_from(raw).map_err(|_| FrameError::Corrupt {
        offset: 0,
        reason: format!("negative message count {raw}"),
    })
}

fn write_count(buf: &mut [u8], count: usize) -> Result<(), FrameError> {
    let raw = i32::try_from(count).map_err(|_| FrameError::Corrupt {
        offset: 0,
        reason: format!("message count {count} does not fit in i32"),
    })?;
    buf[..HEADER_LEN].copy_from_slice(&raw.to_le_bytes());
    Ok(())
}

fn read_i32(buf: &[u8], offset: usize) -> Result<i32, FrameError> {
    let bytes = buf
        .get(offset..offset + 4)
        .ok_or_else(|| FrameError::Corrupt {
            offset,
            reason: format!("length field runs past segment end ({} bytes)", buf.len()),
        })?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Ok(i32::from_le_bytes(raw))
}

/// Read and bounds-check the record whose length prefix starts at `offset`.
fn record_at(buf: &[u8], offset: usize) -> Result<Record, FrameError> {
    let raw = read_i32(buf, offset)?;
    let len = usize::try_from(raw).map_err(|_| FrameError::Corrupt {
        offset,
        reason: format!("negative record length {raw}"),
    })?;
    let record = Record { offset, len };
    if record.end() > buf.len() {
        return Err(FrameError::Corrupt {
            offset,
            reason: format!(
                "record of {len} bytes overruns segment of {} bytes",
                buf.len()
            ),
        });
    }
    Ok(record)
}

/// Scan every record. O(n) in the number of records.
pub fn records(buf: &[u8]) -> Result<Vec<Record>, FrameError> {
    let count = count(buf)?;
    let mut out = Vec::with_capacity(count.min(64));
    let mut pos = HEADER_LEN;
    for _ in 0..count {
        let record = record_at(buf, pos)?;
        pos = record.end();
        out.push(record);
    }
    Ok(out)
}

/// Offset one past the last record.
pub fn used_end(buf: &[u8]) -> Result<usize, FrameError> {
    Ok(records(buf)?.last().map_or(HEADER_LEN, Record::end))
}

/// Append a record. On capacity failure the buffer is untouched.
pub fn push_back(buf: &mut [u8], payload: &[u8]) -> Result<(), FrameError> {
    let count = count(buf)?;
    let end = used_end(buf)?;
    let needed = LEN_PREFIX + payload.len();
    let available = buf.len() - end;
    let len = i32::try_from(payload.len()).map_err(|_| FrameError::Capacity {
        needed,
        available,
    })?;
    if needed > available {
        return Err(FrameError::Capacity { needed, available });
    }

    buf[end..end + LEN_PREFIX].copy_from_slice(&len.to_le_bytes());
    buf[end + LEN_PREFIX..end + needed].copy_from_slice(payload);
    write_count(buf, count + 1)
}

/// Payload of the head record without scanning the rest. O(1).
pub fn front(buf: &[u8]) -> Result<Option<&[u8]>, FrameError> {
    if count(buf)? == 0 {
        return Ok(None);
    }
    let record = record_at(buf, HEADER_LEN)?;
    Ok(Some(&buf[record.payload_range()]))
}

/// Remove the head record, shifting the remaining records left in order.
pub fn pop_front(buf: &mut [u8]) -> Result<Option<Vec<u8>>, FrameError> {
    if count(buf)? == 0 {
        return Ok(None);
    }
    let head = record_at(buf, HEADER_LEN)?;
    let payload = buf[head.payload_range()].to_vec();
    remove(buf, head)?;
    Ok(Some(payload))
}

/// Remove `record`, shifting every later record left and zeroing the
/// vacated tail.
pub fn remove(buf: &mut [u8], record: Record) -> Result<(), FrameError> {
    let all = records(buf)?;
    if !all.contains(&record) {
        return Err(FrameError::Corrupt {
            offset: record.offset,
            reason: "no record starts at this offset".into(),
        });
    }
    let end = all.last().map_or(HEADER_LEN, Record::end);

    let shift = record.end() - record.offset;
    buf.copy_within(record.end()..end, record.offset);
    buf[end - shift..end].fill(0);
    write_count(buf, all.len() - 1)
}

/// Replace the payload of `record`.
///
/// A payload that is not longer is written in place and padded with ASCII
/// spaces, so the record keeps its length and no other byte moves. A longer
/// payload shifts every later record right by the difference.
pub fn replace(buf: &mut [u8], record: Record, payload: &[u8]) -> Result<(), FrameError> {
    if payload.len() <= record.len {
        let range = record.payload_range();
        let (body, pad) = buf[range].split_at_mut(payload.len());
        body.copy_from_slice(payload);
        pad.fill(b' ');
        return Ok(());
    }

    let delta = payload.len() - record.len;
    let end = used_end(buf)?;
    let available = buf.len() - end;
    if delta > available {
        return Err(FrameError::Capacity {
            needed: delta,
            available,
        });
    }
    let len = i32::try_from(payload.len()).map_err(|_| FrameError::Capacity {
        needed: delta,
        available,
    })?;

    buf.copy_within(record.end()..end, record.end() + delta);
    buf[record.offset..record.offset + LEN_PREFIX].copy_from_slice(&len.to_le_bytes());
    let start = record.offset + LEN_PREFIX;
    buf[start..start + payload.len()].copy_from_slice(payload);
    Ok(())
}
