use core::fmt;

pub const QUEUE_SIZE: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueueError {
    NoSpace,
}
impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::NoSpace => write!(f, "queue full"),
        }
    }
}

/// A fixed-capacity FIFO ring.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Queue<T, const N: usize = QUEUE_SIZE> {
    inner: [Option<T>; N],
    /// The index of the first item in the queue.
    queue_start: usize,
    /// The length of the queue.
    queue_len: usize,
}
impl<T: Copy, const N: usize> Queue<T, N> {
    pub const fn new() -> Queue<T, N> {
        Queue {
            inner: [None; N],
            queue_start: 0,
            queue_len: 0,
        }
    }
}
impl<T: Copy, const N: usize> Default for Queue<T, N> {
    fn default() -> Queue<T, N> {
        Queue::new()
    }
}
impl<T, const N: usize> Queue<T, N> {
    /// Accessor method for the length of the queue.
    pub fn len(&self) -> usize {
        self.queue_len
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Returns how many items can currently be added to the queue.
    pub fn space_remaining(&self) -> usize {
        N - self.len()
    }
    /// Returns the index of the last item in the queue.
    fn queue_end(&self) -> usize {
        (self.queue_start + self.queue_len - 1) % N
    }

    /// The item at the front of the queue.
    pub fn front(&self) -> Option<&T> {
        if self.is_empty() {
            None
        } else {
            self.inner[self.queue_start].as_ref()
        }
    }
    /// Removes an item from the front of the queue.
    pub fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.inner[self.queue_start].take();
        self.queue_start = (self.queue_start + 1) % N;
        self.queue_len -= 1;
        item
    }
    /// Adds an item to the end of the queue.
    pub fn push_back(&mut self, value: T) -> Result<(), QueueError> {
        if self.space_remaining() == 0 {
            return Err(QueueError::NoSpace);
        }

        self.queue_len += 1;
        let end = self.queue_end();
        self.inner[end] = Some(value);
        Ok(())
    }
    /// Items from front to back.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.queue_len).filter_map(move |i| self.inner[(self.queue_start + i) % N].as_ref())
    }
}
