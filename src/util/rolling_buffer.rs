//! Fixed-capacity rolling window of integer samples

/// Circular buffer keeping the `capacity` most recent samples
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    samples: Vec<i64>,
    /// Next slot to overwrite
    offset: usize,
    /// Number of held samples (saturates at capacity)
    count: usize,
}

impl RollingBuffer {
    /// Create an empty buffer; a zero capacity is bumped to one
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0; capacity.max(1)],
            offset: 0,
            count: 0,
        }
    }

    /// Push a sample, overwriting the oldest once full
    pub fn push(&mut self, value: i64) {
        let capacity = self.samples.len();
        self.samples[self.offset] = value;
        self.offset = (self.offset + 1) % capacity;
        if self.count < capacity {
            self.count += 1;
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Held samples, oldest first
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        let capacity = self.samples.len();
        let start = (self.offset + capacity - self.count) % capacity;
        (0..self.count).map(move |i| self.samples[(start + i) % capacity])
    }

    /// Truncating arithmetic mean of the held samples, 0 if empty
    pub fn average(&self) -> i64 {
        if self.count == 0 {
            return 0;
        }
        let sum: i128 = self.iter().map(i128::from).sum();
        (sum / self.count as i128) as i64
    }

    /// Difference between the largest and smallest held sample, 0 if empty
    pub fn spread(&self) -> i64 {
        let mut held = self.iter();
        let Some(first) = held.next() else {
            return 0;
        };
        let (min, max) = held.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        max - min
    }
}
