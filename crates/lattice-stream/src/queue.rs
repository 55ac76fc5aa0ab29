use std::collections::VecDeque;
use std::io::{self, Write};

/// FIFO of outgoing slices.
///
/// Invariant: the queue is empty or every slice in it is non-empty — a
/// slice that empties from a partial write is removed immediately rather
/// than left as a zero-length entry.
#[derive(Default)]
pub struct OutgoingQueue(VecDeque<Vec<u8>>);

impl OutgoingQueue {
    pub fn new() -> Self {
        Self(VecDeque::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push_back(&mut self, slice: Vec<u8>) {
        if !slice.is_empty() {
            self.0.push_back(slice);
        }
    }

    /// Inserts at the head of the queue, so it is the next thing drained
    /// and retransmitted — used for MQTT PUBREL, which must jump ahead of
    /// whatever else is already queued.
    pub fn push_front(&mut self, slice: Vec<u8>) {
        if !slice.is_empty() {
            self.0.push_front(slice);
        }
    }

    /// Attempts to write as much of the head slice as `sink` will accept,
    /// looping to later slices as each one fully drains. Stops on the
    /// first would-block or once the queue is empty. Returns whether the
    /// queue is now fully drained.
    pub fn drain_into<W: Write>(&mut self, sink: &mut W) -> io::Result<bool> {
        while let Some(front) = self.0.front_mut() {
            match sink.write(front) {
                Ok(0) => {
                    return Err(io::Error::from(io::ErrorKind::WriteZero));
                }
                Ok(n) if n == front.len() => {
                    self.0.pop_front();
                }
                Ok(n) => {
                    front.drain(..n);
                    return Ok(false);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slices_are_never_enqueued() {
        let mut q = OutgoingQueue::new();
        q.push_back(Vec::new());
        assert!(q.is_empty());
    }

    #[test]
    fn head_insert_jumps_ahead_of_queued_data() {
        let mut q = OutgoingQueue::new();
        q.push_back(b"b".to_vec());
        q.push_front(b"a".to_vec());

        let mut out = Vec::new();
        let drained = q.drain_into(&mut out).unwrap();
        assert!(drained);
        assert_eq!(out, b"ab");
    }
}
