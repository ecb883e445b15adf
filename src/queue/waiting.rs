use rustc_hash::FxHashMap;
use std::time::Instant;

use super::types::QueueKey;

/// A pending delayed admission
#[derive(Debug, Clone)]
pub(crate) struct WaitFor<K> {
    pub data: K,
    pub ready_at: Instant,
}

struct WaitEntry<K> {
    data: K,
    ready_at: Instant,
    // Breaks ties between equal deadlines in arrival order
    seq: u64,
}

/// Min-heap of delayed items ordered by readiness, with one entry per distinct item.
///
/// Positions are tracked per item so that a repeated request can tighten an
/// existing deadline in place.
pub(crate) struct WaitingHeap<K> {
    entries: Vec<WaitEntry<K>>,
    positions: FxHashMap<K, usize>,
    next_seq: u64,
}

impl<K: QueueKey> WaitingHeap<K> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            positions: FxHashMap::default(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest deadline in the heap
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.entries.first().map(|entry| entry.ready_at)
    }

    /// Insert a new entry, or move an existing one earlier. A later deadline for an
    /// item already waiting is ignored. Returns whether the heap changed.
    pub fn insert(&mut self, wait: WaitFor<K>) -> bool {
        if let Some(&index) = self.positions.get(&wait.data) {
            if wait.ready_at < self.entries[index].ready_at {
                self.entries[index].ready_at = wait.ready_at;
                self.sift_up(index);
                return true;
            }
            return false;
        }

        let index = self.entries.len();
        self.positions.insert(wait.data.clone(), index);
        self.entries.push(WaitEntry {
            data: wait.data,
            ready_at: wait.ready_at,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        self.sift_up(index);
        true
    }

    /// Remove and return the earliest entry if it is due at `now`
    pub fn pop_ready(&mut self, now: Instant) -> Option<K> {
        match self.next_ready_at() {
            Some(ready_at) if ready_at <= now => self.pop(),
            _ => None,
        }
    }

    fn pop(&mut self) -> Option<K> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.swap(0, last);
        let entry = self.entries.pop()?;
        self.positions.remove(&entry.data);
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        Some(entry.data)
    }

    fn less(&self, a: usize, b: usize) -> bool {
        let (a, b) = (&self.entries[a], &self.entries[b]);
        (a.ready_at, a.seq) < (b.ready_at, b.seq)
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.entries.swap(a, b);
        if let Some(position) = self.positions.get_mut(&self.entries[a].data) {
            *position = a;
        }
        if let Some(position) = self.positions.get_mut(&self.entries[b].data) {
            *position = b;
        }
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.less(index, parent) {
                break;
            }
            self.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.less(right, left) {
                smallest = right;
            }
            if !self.less(smallest, index) {
                break;
            }
            self.swap(index, smallest);
            index = smallest;
        }
    }
}
