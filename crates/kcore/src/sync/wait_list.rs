//! An arena-backed doubly linked list with stable handles.
//!
//! Entries live in a slab. Each one is either linked into the FIFO order or unlinked
//! (still allocated, waiting for its owner to collect it). Handles carry a generation,
//! so a stale handle for a freed or reused slot is simply ignored; removing an entry
//! twice is therefore harmless.

use alloc::vec::Vec;
use core::fmt::{self, Debug};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Unlinked,
    Linked { prev: Option<u32>, next: Option<u32> },
}

struct Entry<T> {
    value: T,
    link: Link,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

pub struct WaitList<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    linked: usize,
}

impl<T> WaitList<T> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            linked: 0,
        }
    }

    /// Number of linked entries.
    pub fn len(&self) -> usize {
        self.linked
    }

    pub fn is_empty(&self) -> bool {
        self.linked == 0
    }

    pub fn push_back(&mut self, value: T) -> Handle {
        let entry = Entry {
            value,
            link: Link::Linked {
                prev: self.tail,
                next: None,
            },
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("wait list overflow");
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                index
            }
        };

        match self.tail {
            Some(tail) => self.set_next(tail, Some(index)),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.linked += 1;

        Handle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Unlink and free the first entry.
    pub fn pop_front(&mut self) -> Option<T> {
        let head = self.head?;
        self.detach(head);
        self.release(head)
    }

    /// Take the entry out of the FIFO order but keep it allocated. Returns `false` if
    /// it was not linked (already unlinked, or the handle is stale).
    pub fn unlink(&mut self, handle: Handle) -> bool {
        if !self.is_linked(handle) {
            return false;
        }
        self.detach(handle.index);
        true
    }

    /// Unlink (if needed) and free the entry, handing back its value. Returns `None`
    /// for stale handles.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        self.entry(handle)?;
        if self.is_linked(handle) {
            self.detach(handle.index);
        }
        self.release(handle.index)
    }

    pub fn is_linked(&self, handle: Handle) -> bool {
        matches!(
            self.entry(handle),
            Some(Entry {
                link: Link::Linked { .. },
                ..
            })
        )
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.entry(handle).map(|entry| &entry.value)
    }

    /// Walk the linked entries front to back and unlink up to `limit` of those matching
    /// `pred`, calling `f` on each one as it is unlinked. Unlinked entries stay
    /// allocated until their handle is removed.
    pub fn unlink_where<P, F>(&mut self, limit: usize, mut pred: P, mut f: F) -> usize
    where
        P: FnMut(&T) -> bool,
        F: FnMut(&mut T),
    {
        let mut unlinked = 0;
        let mut cursor = self.head;

        while let Some(index) = cursor {
            if unlinked == limit {
                break;
            }
            let (next, matches) = {
                let entry = self.slot_entry(index);
                (entry_next(entry), pred(&entry.value))
            };
            if matches {
                self.detach(index);
                f(&mut self.slot_entry_mut(index).value);
                unlinked += 1;
            }
            cursor = next;
        }

        unlinked
    }

    /// Linked entries in FIFO order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    fn entry(&self, handle: Handle) -> Option<&Entry<T>> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn slot_entry(&self, index: u32) -> &Entry<T> {
        self.slots[index as usize]
            .entry
            .as_ref()
            .expect("wait list link points at a free slot")
    }

    fn slot_entry_mut(&mut self, index: u32) -> &mut Entry<T> {
        self.slots[index as usize]
            .entry
            .as_mut()
            .expect("wait list link points at a free slot")
    }

    fn set_next(&mut self, index: u32, next: Option<u32>) {
        match &mut self.slot_entry_mut(index).link {
            Link::Linked { next: slot, .. } => *slot = next,
            Link::Unlinked => panic!("wait list neighbour is not linked"),
        }
    }

    fn set_prev(&mut self, index: u32, prev: Option<u32>) {
        match &mut self.slot_entry_mut(index).link {
            Link::Linked { prev: slot, .. } => *slot = prev,
            Link::Unlinked => panic!("wait list neighbour is not linked"),
        }
    }

    fn detach(&mut self, index: u32) {
        let link = core::mem::replace(&mut self.slot_entry_mut(index).link, Link::Unlinked);
        let Link::Linked { prev, next } = link else {
            panic!("wait list entry unlinked twice");
        };

        match prev {
            Some(prev) => self.set_next(prev, next),
            None => self.head = next,
        }
        match next {
            Some(next) => self.set_prev(next, prev),
            None => self.tail = prev,
        }
        self.linked -= 1;
    }

    fn release(&mut self, index: u32) -> Option<T> {
        let slot = &mut self.slots[index as usize];
        let entry = slot.entry.take()?;
        debug_assert_eq!(entry.link, Link::Unlinked);
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Some(entry.value)
    }
}

fn entry_next<T>(entry: &Entry<T>) -> Option<u32> {
    match entry.link {
        Link::Linked { next, .. } => next,
        Link::Unlinked => None,
    }
}

impl<T> Default for WaitList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for WaitList<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

pub struct Iter<'a, T> {
    list: &'a WaitList<T>,
    cursor: Option<u32>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let entry = self.list.slot_entry(index);
        self.cursor = entry_next(entry);
        Some(&entry.value)
    }
}
