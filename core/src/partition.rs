use serde::Serialize;

/// One contiguous byte span of the resource; `end` is inclusive.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl Partition {
    pub fn new(index: usize, start: u64, end: u64) -> Self {
        Self { index, start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Splits `total_size` bytes into at most `workers` partitions.
///
/// Every partition but the last gets `ceil(total_size / workers)` bytes and
/// the last one takes what is left, so 10 bytes over 4 workers become spans
/// of 3, 3, 3 and 1. The count drops whenever the spans run out before the
/// workers do; no partition is ever empty and an empty resource yields none.
pub fn plan_partitions(total_size: u64, workers: usize) -> Vec<Partition> {
    if total_size == 0 {
        return Vec::new();
    }
    let workers = workers.max(1) as u64;
    let base = total_size.div_ceil(workers);
    let count = total_size.div_ceil(base);

    let mut partitions = Vec::with_capacity(count as usize);
    let mut start = 0u64;
    for index in 0..count {
        let end = (start + base - 1).min(total_size - 1);
        partitions.push(Partition::new(index as usize, start, end));
        start = end + 1;
    }

    partitions
}
