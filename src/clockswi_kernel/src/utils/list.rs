//! Circular doubly linked list whose elements live in an indexable pool and
//! are linked by slot index.
use core::{fmt, ops};

use super::Init;

/// Circular linked list header.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ListHead {
    pub first: Option<usize>,
}

impl Init for ListHead {
    const INIT: Self = Self { first: None };
}

impl fmt::Debug for ListHead {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ListHead({:?})", &self.first)
    }
}

impl ListHead {
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

/// Links to neighbor items.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Link {
    pub prev: usize,
    pub next: usize,
}

/// Implemented by pool elements that can be linked into a list.
pub trait Linked {
    fn link(&self) -> &Option<Link>;
    fn link_mut(&mut self) -> &mut Option<Link>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    AlreadyLinked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemError {
    NotLinked,
}

/// Accessor to a linked list whose elements are stored in `Pool`.
pub struct ListAccessor<'a, Pool> {
    head: &'a mut ListHead,
    pool: &'a mut Pool,
}

impl<'a, Pool, Element> ListAccessor<'a, Pool>
where
    Pool: ops::IndexMut<usize, Output = Element>,
    Element: Linked,
{
    pub fn new(head: &'a mut ListHead, pool: &'a mut Pool) -> Self {
        Self { head, pool }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    pub fn front(&self) -> Option<usize> {
        self.head.first
    }

    pub fn back(&self) -> Option<usize> {
        self.head
            .first
            .map(|first| self.pool[first].link().expect("inconsistent list").prev)
    }

    pub fn push_back(&mut self, item: usize) -> Result<(), InsertError> {
        if self.pool[item].link().is_some() {
            return Err(InsertError::AlreadyLinked);
        }

        if let Some(first) = self.head.first {
            let last = self.back().unwrap_or(first);
            link_mut(self.pool, last).next = item;
            link_mut(self.pool, first).prev = item;
            *self.pool[item].link_mut() = Some(Link {
                prev: last,
                next: first,
            });
        } else {
            *self.pool[item].link_mut() = Some(Link {
                prev: item,
                next: item,
            });
            self.head.first = Some(item);
        }

        Ok(())
    }

    /// Remove `item` from the list.
    pub fn remove(&mut self, item: usize) -> Result<(), ItemError> {
        let link = self.pool[item].link().ok_or(ItemError::NotLinked)?;

        if link.next == item {
            // The list just became empty
            debug_assert_eq!(self.head.first, Some(item));
            self.head.first = None;
        } else {
            if self.head.first == Some(item) {
                self.head.first = Some(link.next);
            }
            link_mut(self.pool, link.prev).next = link.next;
            link_mut(self.pool, link.next).prev = link.prev;
        }

        *self.pool[item].link_mut() = None;
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<usize> {
        let item = self.head.first?;
        // `item` is linked because it's the head
        self.remove(item).ok()?;
        Some(item)
    }

    /// Get the element following `item`, or `None` if `item` is the last one.
    pub fn next(&self, item: usize) -> Result<Option<usize>, ItemError> {
        let next = self.pool[item].link().ok_or(ItemError::NotLinked)?.next;
        Ok(if Some(next) == self.head.first {
            None
        } else {
            Some(next)
        })
    }
}

fn link_mut<'a, Pool, Element>(pool: &'a mut Pool, item: usize) -> &'a mut Link
where
    Pool: ops::IndexMut<usize, Output = Element>,
    Element: Linked + 'a,
{
    pool[item].link_mut().as_mut().expect("inconsistent list")
}
