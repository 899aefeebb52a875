/// Compute-unit membership sets.
///
/// The device partitions its compute units into an idle and a busy set. Each
/// set is a doubly linked list threaded through per-handle index slots, so
/// push, remove and pop are O(1) and iteration follows insertion order.
#[derive(Debug, Clone)]
pub struct ComputeUnitSet {
    prev: Vec<Option<usize>>,
    next: Vec<Option<usize>>,
    member: Vec<bool>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl ComputeUnitSet {
    /// An empty set able to hold handles `0..capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        ComputeUnitSet {
            prev: vec![None; capacity],
            next: vec![None; capacity],
            member: vec![false; capacity],
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// A set holding every handle `0..capacity` in ascending order.
    pub fn full(capacity: usize) -> Self {
        let mut set = Self::with_capacity(capacity);
        for id in 0..capacity {
            set.push_back(id);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: usize) -> bool {
        self.member.get(id).copied().unwrap_or(false)
    }

    pub fn front(&self) -> Option<usize> {
        self.head
    }

    /// Append `id`. Returns false if it was already a member or out of range.
    pub fn push_back(&mut self, id: usize) -> bool {
        if id >= self.member.len() || self.member[id] {
            return false;
        }
        self.member[id] = true;
        self.prev[id] = self.tail;
        self.next[id] = None;
        match self.tail {
            Some(t) => self.next[t] = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
        true
    }

    /// Unlink `id`. Returns false if it was not a member.
    pub fn remove(&mut self, id: usize) -> bool {
        if !self.contains(id) {
            return false;
        }
        let (p, n) = (self.prev[id], self.next[id]);
        match p {
            Some(p) => self.next[p] = n,
            None => self.head = n,
        }
        match n {
            Some(n) => self.prev[n] = p,
            None => self.tail = p,
        }
        self.prev[id] = None;
        self.next[id] = None;
        self.member[id] = false;
        self.len -= 1;
        true
    }

    pub fn pop_front(&mut self) -> Option<usize> {
        let id = self.head?;
        self.remove(id);
        Some(id)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            set: self,
            cursor: self.head,
        }
    }

    /// Copy of the current membership, in iteration order.
    pub fn snapshot(&self) -> Vec<usize> {
        self.iter().collect()
    }
}

pub struct Iter<'a> {
    set: &'a ComputeUnitSet,
    cursor: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let id = self.cursor?;
        self.cursor = self.set.next[id];
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_set_iterates_in_id_order() {
        let set = ComputeUnitSet::full(4);
        assert_eq!(set.snapshot(), vec![0, 1, 2, 3]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn remove_relinks_neighbours() {
        let mut set = ComputeUnitSet::full(5);
        assert!(set.remove(2));
        assert!(set.remove(0));
        assert!(set.remove(4));
        assert!(!set.remove(4));
        assert_eq!(set.snapshot(), vec![1, 3]);
        assert!(set.push_back(0));
        assert_eq!(set.snapshot(), vec![1, 3, 0]);
        assert_eq!(set.pop_front(), Some(1));
        assert_eq!(set.snapshot(), vec![3, 0]);
    }

    #[test]
    fn rejects_duplicates_and_out_of_range() {
        let mut set = ComputeUnitSet::with_capacity(2);
        assert!(set.push_back(1));
        assert!(!set.push_back(1));
        assert!(!set.push_back(2));
        assert!(!set.contains(7));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn drains_to_empty() {
        let mut set = ComputeUnitSet::full(3);
        while set.pop_front().is_some() {}
        assert!(set.is_empty());
        assert_eq!(set.front(), None);
        assert_eq!(set.iter().count(), 0);
    }
}
