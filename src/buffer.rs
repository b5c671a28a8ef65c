// The send buffer accumulates serialized sample records as one JSON array
// document.  The capacity is fixed at creation; two bytes are held back from
// every append so that closing the array can never fail for lack of space.
//
// Appends are atomic: an append either adds the whole record (plus a
// separating comma) or leaves the buffer bit-identical to what it was, so the
// caller can flush and retry the same record safely.

use std::time::{Duration, Instant};

pub const MIN_BUFFER_SIZE: usize = 1024;
pub const MAX_BUFFER_SIZE: usize = 128 * 1024;

// Room reserved for closing the document.
const CLOSE_RESERVE: usize = 2;

// A buffer with fill at or below this holds no records worth sending: at most
// the array opener and its closer.
pub const EMPTY_FILL: usize = 2;

// Distinguished append failure: the record does not fit in the free space.
// The buffer is unchanged; flushing and retrying once is the remedy.
#[derive(Debug, PartialEq, Eq)]
pub struct WouldNotFit;

pub struct SendBuffer {
    buf: Vec<u8>,
    capacity: usize,
    init_time: Instant,
}

impl SendBuffer {
    pub fn new(capacity: usize) -> SendBuffer {
        debug_assert!((MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&capacity));
        let mut b = SendBuffer {
            buf: Vec::with_capacity(capacity),
            capacity,
            init_time: Instant::now(),
        };
        b.reset();
        b
    }

    // Return the buffer to the empty-array state and restamp its age.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.buf.push(b'[');
        self.init_time = Instant::now();
    }

    // Restamp the age without touching the contents.  Used when a flush finds
    // nothing to send, so an empty buffer does not look stale forever.
    pub fn touch(&mut self) {
        self.init_time = Instant::now();
    }

    pub fn fill(&self) -> usize {
        self.buf.len()
    }

    pub fn free(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn age(&self) -> Duration {
        self.init_time.elapsed()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() <= EMPTY_FILL
    }

    pub fn try_append(&mut self, record: &[u8]) -> Result<(), WouldNotFit> {
        let sep = if self.buf.len() > 1 { 1 } else { 0 };
        if sep + record.len() + CLOSE_RESERVE > self.free() {
            return Err(WouldNotFit);
        }
        if sep == 1 {
            self.buf.push(b',');
        }
        self.buf.extend_from_slice(record);
        Ok(())
    }

    // Close the array and move the finished document out.  The buffer holds
    // nothing valid afterwards and must be reset() before further use; every
    // flush path does so unconditionally.
    pub fn finalize(&mut self) -> Result<Vec<u8>, String> {
        if self.free() < 1 {
            return Err("send buffer corrupt: no room to close the document".to_string());
        }
        let mut doc = std::mem::take(&mut self.buf);
        doc.push(b']');
        Ok(doc)
    }
}

#[test]
pub fn test_buffer_reset_state() {
    let mut b = SendBuffer::new(MIN_BUFFER_SIZE);
    assert!(b.fill() == 1);
    assert!(b.free() == MIN_BUFFER_SIZE - 1);
    assert!(b.fill() + b.free() == b.capacity());
    assert!(b.is_empty());
    b.try_append(b"{}").unwrap();
    b.reset();
    assert!(b.fill() == 1);
    assert!(b.is_empty());
}

#[test]
pub fn test_buffer_append_atomicity() {
    let mut b = SendBuffer::new(MIN_BUFFER_SIZE);
    b.try_append(b"{\"x\":1}").unwrap();
    let fill = b.fill();
    let free = b.free();
    let too_big = vec![b'y'; MIN_BUFFER_SIZE];
    assert!(b.try_append(&too_big) == Err(WouldNotFit));
    assert!(b.fill() == fill);
    assert!(b.free() == free);
    // The earlier record is still intact.
    let doc = b.finalize().unwrap();
    assert!(doc == b"[{\"x\":1}]");
}

#[test]
pub fn test_buffer_close_reserve() {
    // A record takes the whole free space minus the reserve; exactly at the
    // limit it fits, one byte more and it does not.
    let mut b = SendBuffer::new(MIN_BUFFER_SIZE);
    let exact = vec![b'a'; b.free() - CLOSE_RESERVE];
    b.try_append(&exact).unwrap();
    assert!(b.free() == CLOSE_RESERVE);
    b.reset();
    let over = vec![b'a'; b.free() - CLOSE_RESERVE + 1];
    assert!(b.try_append(&over) == Err(WouldNotFit));
}

#[test]
pub fn test_buffer_separators() {
    let mut b = SendBuffer::new(MIN_BUFFER_SIZE);
    b.try_append(b"1").unwrap();
    b.try_append(b"2").unwrap();
    b.try_append(b"3").unwrap();
    assert!(b.finalize().unwrap() == b"[1,2,3]");
    b.reset();
    assert!(b.finalize().unwrap() == b"[]");
}
