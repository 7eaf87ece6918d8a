//! Dense integer id allocator.
//!
//! Free ids are kept as a sorted list of disjoint, non-adjacent inclusive
//! ranges. Allocation takes from the front of the first range that fits,
//! release merges back with its neighbours.

/// Inclusive run of free ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdRange {
    pub first: u32,
    pub last: u32,
}

impl IdRange {
    pub const fn len(&self) -> u64 {
        self.last as u64 - self.first as u64 + 1
    }

    pub const fn contains(&self, id: u32) -> bool {
        self.first <= id && id <= self.last
    }
}

#[derive(Debug, Clone)]
pub struct IdPool {
    max_id: u32,
    free: Vec<IdRange>,
}

impl IdPool {
    /// Pool handing out ids in `0..=max_id`.
    pub fn new(max_id: u32) -> Self {
        Self {
            max_id,
            free: vec![IdRange {
                first: 0,
                last: max_id,
            }],
        }
    }

    /// Forget every allocation and serve `0..=max_id` again.
    pub fn reset(&mut self, max_id: u32) {
        self.max_id = max_id;
        self.free.clear();
        self.free.push(IdRange {
            first: 0,
            last: max_id,
        });
    }

    pub const fn max_id(&self) -> u32 {
        self.max_id
    }

    pub fn create_id(&mut self) -> Option<u32> {
        self.create_range_id(1)
    }

    /// First id of `count` consecutive ids taken from the first free range
    /// large enough to hold them.
    pub fn create_range_id(&mut self, count: u32) -> Option<u32> {
        if count == 0 {
            return None;
        }
        let Some(index) = self
            .free
            .iter()
            .position(|range| range.len() >= u64::from(count))
        else {
            log::warn!(
                "id pool cannot serve {count} consecutive ids (largest free run {})",
                self.largest_continuous_range()
            );
            return None;
        };

        let range = &mut self.free[index];
        let id = range.first;
        if range.len() == u64::from(count) {
            self.free.remove(index);
        } else {
            range.first += count;
        }
        self.debug_assert_canonical();
        Some(id)
    }

    pub fn destroy_id(&mut self, id: u32) -> bool {
        self.destroy_range_id(id, 1)
    }

    /// Returns `false` without touching the pool when any id of the range is
    /// already free or beyond `max_id`.
    pub fn destroy_range_id(&mut self, id: u32, count: u32) -> bool {
        if count == 0 {
            return false;
        }
        let Some(last) = id.checked_add(count - 1) else {
            return false;
        };
        if last > self.max_id {
            return false;
        }

        let index = self.free.partition_point(|range| range.first <= id);
        let has_prev = index > 0;
        let has_next = index < self.free.len();
        if has_prev && self.free[index - 1].last >= id {
            return false;
        }
        if has_next && self.free[index].first <= last {
            return false;
        }

        // prev.last < id and last < next.first, so neither addition overflows.
        let merge_prev = has_prev && self.free[index - 1].last + 1 == id;
        let merge_next = has_next && last + 1 == self.free[index].first;
        match (merge_prev, merge_next) {
            (true, true) => {
                let next_last = self.free[index].last;
                self.free[index - 1].last = next_last;
                self.free.remove(index);
            }
            (true, false) => self.free[index - 1].last = last,
            (false, true) => self.free[index].first = id,
            (false, false) => self.free.insert(index, IdRange { first: id, last }),
        }
        self.debug_assert_canonical();
        true
    }

    /// True when `id` is handed out, i.e. within `0..=max_id` and not free.
    pub fn is_id(&self, id: u32) -> bool {
        if id > self.max_id {
            return false;
        }
        let index = self.free.partition_point(|range| range.first <= id);
        !(index > 0 && self.free[index - 1].contains(id))
    }

    pub fn available_ids(&self) -> u64 {
        self.free.iter().map(IdRange::len).sum()
    }

    pub fn largest_continuous_range(&self) -> u64 {
        self.free.iter().map(IdRange::len).max().unwrap_or(0)
    }

    pub fn ranges(&self) -> &[IdRange] {
        &self.free
    }

    pub fn log_ranges(&self) {
        log::debug!(
            "id pool 0..={}: {} free in {} ranges",
            self.max_id,
            self.available_ids(),
            self.free.len()
        );
        for range in &self.free {
            log::debug!("  [{}, {}]", range.first, range.last);
        }
    }

    fn debug_assert_canonical(&self) {
        debug_assert!(
            self.free.windows(2).all(|pair| {
                pair[0].first <= pair[0].last && u64::from(pair[0].last) + 1 < u64::from(pair[1].first)
            }),
            "id pool ranges must be sorted, disjoint and non-adjacent: {:?}",
            self.free
        );
    }
}
