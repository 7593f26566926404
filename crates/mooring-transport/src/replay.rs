//! Bounded replay buffer for WebSocket reconnection.
//!
//! Holds recently sent frames tagged with client UUIDs so the
//! unacknowledged suffix can be resent in order after a transient
//! disconnect. Best-effort: the buffer is a fixed-capacity ring and the
//! oldest entries are evicted first, so delivery is not guaranteed.

use bytes::Bytes;
use std::collections::VecDeque;
use uuid::Uuid;

/// One buffered frame.
#[derive(Debug, Clone)]
pub struct ReplayEntry {
    /// Client-assigned tag
    pub tag: Uuid,
    /// The frame payload as it went over the wire
    pub payload: Bytes,
}

/// Fixed-capacity ring of recently sent frames, oldest evicted first.
#[derive(Debug)]
pub struct ReplayBuffer {
    entries: VecDeque<ReplayEntry>,
    capacity: usize,
}

impl ReplayBuffer {
    /// Create a buffer holding at most `capacity` frames. A zero capacity
    /// is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest when full.
    pub fn push(&mut self, tag: Uuid, payload: Bytes) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ReplayEntry { tag, payload });
    }

    /// The ordered suffix strictly after `tag`. When `tag` is `None` or
    /// not present in the buffer, everything is returned: the peer has
    /// acknowledged nothing we still hold.
    pub fn after(&self, tag: Option<Uuid>) -> Vec<ReplayEntry> {
        let start = match tag {
            Some(tag) => match self.entries.iter().position(|e| e.tag == tag) {
                Some(index) => index + 1,
                None => 0,
            },
            None => 0,
        };
        self.entries.iter().skip(start).cloned().collect()
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all buffered frames.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame(n: usize) -> (Uuid, Bytes) {
        (Uuid::new_v4(), Bytes::from(format!("frame-{n}")))
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut buffer = ReplayBuffer::new(4);
        for n in 0..10 {
            let (tag, payload) = frame(n);
            buffer.push(tag, payload);
            assert!(buffer.len() <= 4);
        }
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn overflow_evicts_exactly_the_oldest() {
        let mut buffer = ReplayBuffer::new(3);
        let frames: Vec<_> = (0..5).map(frame).collect();
        for (tag, payload) in &frames {
            buffer.push(*tag, payload.clone());
        }
        // Inserting 2 beyond capacity evicted exactly frames 0 and 1.
        let remaining = buffer.after(None);
        assert_eq!(remaining.len(), 3);
        for (entry, (tag, payload)) in remaining.iter().zip(&frames[2..]) {
            assert_eq!(entry.tag, *tag);
            assert_eq!(entry.payload, payload);
        }
    }

    #[test]
    fn after_returns_ordered_suffix() {
        let mut buffer = ReplayBuffer::new(8);
        let frames: Vec<_> = (0..5).map(frame).collect();
        for (tag, payload) in &frames {
            buffer.push(*tag, payload.clone());
        }
        // Server reports having the first two; exactly the last three replay.
        let suffix = buffer.after(Some(frames[1].0));
        assert_eq!(suffix.len(), 3);
        for (entry, (tag, _)) in suffix.iter().zip(&frames[2..]) {
            assert_eq!(entry.tag, *tag);
        }
    }

    #[test]
    fn unknown_tag_replays_everything() {
        let mut buffer = ReplayBuffer::new(8);
        for n in 0..3 {
            let (tag, payload) = frame(n);
            buffer.push(tag, payload);
        }
        assert_eq!(buffer.after(Some(Uuid::new_v4())).len(), 3);
        assert_eq!(buffer.after(None).len(), 3);
    }

    #[test]
    fn last_tag_replays_nothing() {
        let mut buffer = ReplayBuffer::new(8);
        let mut last = None;
        for n in 0..3 {
            let (tag, payload) = frame(n);
            buffer.push(tag, payload);
            last = Some(tag);
        }
        assert!(buffer.after(last).is_empty());
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut buffer = ReplayBuffer::new(2);
        let (tag, payload) = frame(0);
        buffer.push(tag, payload);
        assert!(!buffer.is_empty());
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
