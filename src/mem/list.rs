//! Intrusive doubly-linked lists over slot indices.
//!
//! Links live in a side table indexed by slot, one link per slot. An
//! element can therefore be on at most one list of a given table at a
//! time, which is exactly the queue invariant of threads (ready queue or
//! a single wait queue) and of owned mutexes (one owner's claim list).

/// Per-slot link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    prev: Option<u32>,
    next: Option<u32>,
    linked: bool,
}

impl Link {
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// List head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct List {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl List {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn front(&self) -> Option<u32> {
        self.head
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push_back(&mut self, links: &mut [Link], idx: u32) {
        debug_assert!(!links[idx as usize].linked);
        links[idx as usize] = Link {
            prev: self.tail,
            next: None,
            linked: true,
        };
        match self.tail {
            Some(tail) => links[tail as usize].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    /// Insert `idx` before the first element for which `goes_after`
    /// returns true, or at the back if there is none.
    pub fn insert_by(&mut self, links: &mut [Link], idx: u32, mut goes_after: impl FnMut(u32) -> bool) {
        let mut cursor = self.head;
        while let Some(at) = cursor {
            if goes_after(at) {
                self.insert_before(links, at, idx);
                return;
            }
            cursor = links[at as usize].next;
        }
        self.push_back(links, idx);
    }

    fn insert_before(&mut self, links: &mut [Link], at: u32, idx: u32) {
        debug_assert!(!links[idx as usize].linked);
        let prev = links[at as usize].prev;
        links[idx as usize] = Link {
            prev,
            next: Some(at),
            linked: true,
        };
        links[at as usize].prev = Some(idx);
        match prev {
            Some(p) => links[p as usize].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.len += 1;
    }

    /// Unlink `idx`. Returns false if it was not linked.
    pub fn remove(&mut self, links: &mut [Link], idx: u32) -> bool {
        let link = links[idx as usize];
        if !link.linked {
            return false;
        }
        match link.prev {
            Some(p) => links[p as usize].next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(n) => links[n as usize].prev = link.prev,
            None => self.tail = link.prev,
        }
        links[idx as usize] = Link::default();
        self.len -= 1;
        true
    }

    pub fn pop_front(&mut self, links: &mut [Link]) -> Option<u32> {
        let head = self.head?;
        self.remove(links, head);
        Some(head)
    }

    /// Iterate from front to back.
    pub fn iter<'a>(&self, links: &'a [Link]) -> Iter<'a> {
        Iter {
            links,
            cursor: self.head,
        }
    }
}

pub struct Iter<'a> {
    links: &'a [Link],
    cursor: Option<u32>,
}

impl Iterator for Iter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let cur = self.cursor?;
        self.cursor = self.links[cur as usize].next;
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    #[test]
    fn test_push_pop_fifo() {
        let mut links = vec![Link::default(); 4];
        let mut list = List::new();
        list.push_back(&mut links, 2);
        list.push_back(&mut links, 0);
        list.push_back(&mut links, 3);
        assert_eq!(list.iter(&links).collect::<Vec<_>>(), vec![2, 0, 3]);
        assert_eq!(list.pop_front(&mut links), Some(2));
        assert!(!links[2].is_linked());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_ordered_insert_keeps_arrival_order_for_ties() {
        let prio = [5u8, 9, 5, 7];
        let mut links = vec![Link::default(); 4];
        let mut list = List::new();
        for idx in 0..4u32 {
            list.insert_by(&mut links, idx, |other| prio[other as usize] < prio[idx as usize]);
        }
        assert_eq!(list.iter(&links).collect::<Vec<_>>(), vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_remove_middle_and_ends() {
        let mut links = vec![Link::default(); 3];
        let mut list = List::new();
        for idx in 0..3 {
            list.push_back(&mut links, idx);
        }
        assert!(list.remove(&mut links, 1));
        assert!(!list.remove(&mut links, 1));
        assert_eq!(list.iter(&links).collect::<Vec<_>>(), vec![0, 2]);
        assert!(list.remove(&mut links, 2));
        assert!(list.remove(&mut links, 0));
        assert!(list.is_empty());
        assert_eq!(list.front(), None);
    }
}
