/// One candidate target scored by shared k-mer count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopScore {
    pub count: u32,
    pub seqno: u32,
    pub length: u32,
}

impl TopScore {
    /// Candidate ranking: more shared k-mers first, ties to the shorter
    /// record, then the earlier ordinal.
    #[inline]
    pub fn better_than(&self, other: &TopScore) -> bool {
        if self.count != other.count {
            return self.count > other.count;
        }
        if self.length != other.length {
            return self.length < other.length;
        }
        self.seqno < other.seqno
    }
}

/// Bounded min-heap keeping the best `capacity` candidates seen so far.
/// The worst retained element sits at the root and is evicted first.
pub struct MinHeap {
    capacity: usize,
    array: Vec<TopScore>,
}

impl MinHeap {
    pub fn new(capacity: usize) -> Self {
        MinHeap {
            capacity,
            array: Vec::with_capacity(capacity),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn clear(&mut self) {
        self.array.clear();
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.array[parent].better_than(&self.array[i]) {
                self.array.swap(parent, i);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.array.len();
        loop {
            let l = 2 * i + 1;
            let r = 2 * i + 2;
            let mut worst = i;
            if l < n && self.array[worst].better_than(&self.array[l]) {
                worst = l;
            }
            if r < n && self.array[worst].better_than(&self.array[r]) {
                worst = r;
            }
            if worst == i {
                break;
            }
            self.array.swap(i, worst);
            i = worst;
        }
    }

    /// Insert a candidate, evicting the current worst when full.
    pub fn add(&mut self, elem: TopScore) {
        if self.capacity == 0 {
            return;
        }
        if self.array.len() < self.capacity {
            self.array.push(elem);
            self.sift_up(self.array.len() - 1);
        } else if elem.better_than(&self.array[0]) {
            self.array[0] = elem;
            self.sift_down(0);
        }
    }

    /// Order the retained candidates worst-first so that `pop_best`
    /// drains from the back.
    pub fn sort(&mut self) {
        self.array
            .sort_unstable_by(|a, b| match a.better_than(b) {
                true => std::cmp::Ordering::Greater,
                false if b.better_than(a) => std::cmp::Ordering::Less,
                false => std::cmp::Ordering::Equal,
            });
    }

    /// Pop the best remaining candidate. Only meaningful after `sort`.
    pub fn pop_best(&mut self) -> Option<TopScore> {
        self.array.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(count: u32, seqno: u32, length: u32) -> TopScore {
        TopScore {
            count,
            seqno,
            length,
        }
    }

    #[test]
    fn keeps_best_within_capacity() {
        let mut h = MinHeap::new(3);
        for (i, c) in [5u32, 9, 1, 7, 3, 8].iter().enumerate() {
            h.add(ts(*c, i as u32, 100));
        }
        h.sort();
        let drained: Vec<u32> = std::iter::from_fn(|| h.pop_best()).map(|e| e.count).collect();
        assert_eq!(drained, vec![9, 8, 7]);
    }

    #[test]
    fn ties_break_on_length_then_ordinal() {
        let mut h = MinHeap::new(4);
        h.add(ts(5, 2, 30));
        h.add(ts(5, 1, 10));
        h.add(ts(5, 0, 30));
        h.sort();
        assert_eq!(h.pop_best().unwrap().seqno, 1); // shortest wins
        assert_eq!(h.pop_best().unwrap().seqno, 0); // then lowest ordinal
        assert_eq!(h.pop_best().unwrap().seqno, 2);
    }
}
