use crate::error::WriteError;

use bytes::{Buf, BytesMut};
use std::io;

/// Ordered bytes waiting to be written to a socket.
///
/// Bytes are appended at the back by [`push`](Self::push) and leave from
/// the front as the socket accepts them, so a partial write keeps the
/// unsent tail in order.
#[derive(Debug, Default)]
pub(crate) struct OutboundQueue {
    bytes: BytesMut,
}

impl OutboundQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Drops the first `n` queued bytes.
    pub(crate) fn consume(&mut self, n: usize) {
        self.bytes.advance(n.min(self.bytes.len()));
    }

    /// Offers the whole queue to `write` once and drops what it accepted.
    ///
    /// `write` is not called when the queue is empty. A would-block result
    /// counts as zero bytes written; any other failure is classified and
    /// returned with the queue untouched.
    pub(crate) fn write_to<F>(&mut self, write: F) -> Result<usize, WriteError>
    where
        F: FnOnce(&[u8]) -> io::Result<usize>,
    {
        if self.bytes.is_empty() {
            return Ok(0);
        }

        match write(&self.bytes[..]) {
            Ok(n) => {
                self.consume(n);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(WriteError::from_io(e)),
        }
    }
}

/// Reusable receive buffer.
///
/// Memory is only allocated on the first receive, at the configured
/// capacity. The buffer is lent out for the duration of a receive and its
/// delivery, then handed back for the next one.
#[derive(Debug)]
pub(crate) struct InboundScratch {
    capacity: usize,
    buffer: Vec<u8>,
}

impl InboundScratch {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: Vec::new(),
        }
    }

    /// Takes the buffer out, sized to the full capacity.
    pub(crate) fn take(&mut self) -> Vec<u8> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.resize(self.capacity, 0);
        buffer
    }

    /// Hands back a buffer obtained from [`take`](Self::take).
    pub(crate) fn restore(&mut self, buffer: Vec<u8>) {
        self.buffer = buffer;
    }

    /// Releases the buffer memory.
    pub(crate) fn clear(&mut self) {
        self.buffer = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_partial_write_keeps_tail() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let mut queue = OutboundQueue::new();
        queue.push(&data);

        let written = queue
            .write_to(|bytes| {
                assert_eq!(bytes.len(), 10_000);
                Ok(4_096)
            })
            .expect("Write failed");

        assert_eq!(written, 4_096);
        assert_eq!(queue.len(), 5_904);
        assert_eq!(&queue.bytes[..], &data[4_096..]);

        let written = queue
            .write_to(|bytes| Ok(bytes.len()))
            .expect("Write failed");

        assert_eq!(written, 5_904);
        assert!(queue.is_empty());

        let mut called = false;
        queue
            .write_to(|_| {
                called = true;
                Ok(0)
            })
            .expect("Write failed");
        assert!(!called, "empty queue must not attempt a send");
    }

    #[test]
    fn test_would_block_is_not_an_error() {
        let mut queue = OutboundQueue::new();
        queue.push(b"pending");

        let written = queue
            .write_to(|_| Err(io::Error::from(io::ErrorKind::WouldBlock)))
            .expect("Would-block must not fail");

        assert_eq!(written, 0);
        assert_eq!(queue.len(), 7);
    }

    #[test]
    fn test_broken_pipe_is_classified() {
        let mut queue = OutboundQueue::new();
        queue.push(b"lost");

        let err = queue
            .write_to(|_| Err(io::Error::from(io::ErrorKind::BrokenPipe)))
            .expect_err("Broken pipe must fail");

        assert!(matches!(err, WriteError::BrokenPipe));
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_scratch_allocates_lazily() {
        let mut scratch = InboundScratch::new(64 * 1024);
        assert_eq!(scratch.buffer.capacity(), 0);

        let buffer = scratch.take();
        assert_eq!(buffer.len(), 64 * 1024);
        scratch.restore(buffer);
        assert_eq!(scratch.buffer.len(), 64 * 1024);

        scratch.clear();
        assert_eq!(scratch.buffer.capacity(), 0);
        assert_eq!(scratch.capacity, 64 * 1024);
    }

    proptest! {
        #[test]
        fn prop_write_drops_exactly_the_accepted_prefix(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..8),
            accepted in 0usize..2048,
        ) {
            let mut queue = OutboundQueue::new();
            let mut expected = Vec::new();
            for chunk in &chunks {
                queue.push(chunk);
                expected.extend_from_slice(chunk);
            }

            let n = accepted.min(expected.len());
            queue.write_to(|_| Ok(n)).expect("Write failed");

            prop_assert_eq!(&queue.bytes[..], &expected[n..]);
        }
    }
}
