//! # Task Lists
//!
//! Index-based intrusive doubly-linked lists over the TCB arena.
//!
//! Every TCB embeds one [`Link`]. A list only stores head/tail indices; the
//! prev/next pointers live in the nodes themselves, so moving a task between
//! the ready, delayed and suspended lists never allocates and never hands out
//! raw pointers. The `container` field records which list (if any) currently
//! owns the node, which makes "a task is in at most one list" checkable.

use crate::time::TickType;

/// Identifies one of the scheduler's lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListId {
    /// Ready list for the given priority.
    Ready(u8),
    /// One of the two delayed lists (active / overflow swap on wraparound).
    Delayed(u8),
    /// Blocked without a deadline.
    Waiting,
    /// Explicitly suspended.
    Suspended,
    /// Deleted, awaiting reclamation by the idle task.
    Terminating,
}

/// Per-node list membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub prev: Option<usize>,
    pub next: Option<usize>,
    /// The list that currently holds this node.
    pub container: Option<ListId>,
    /// Sort key for ordered lists (the wake tick on delayed lists).
    pub value: TickType,
}

impl Link {
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
            container: None,
            value: 0,
        }
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

/// Arena element that carries a [`Link`].
pub trait Linked {
    fn link(&self) -> &Link;
    fn link_mut(&mut self) -> &mut Link;
}

/// Head/tail of an intrusive list whose nodes live in an external slice.
#[derive(Debug)]
pub struct TaskList {
    id: ListId,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl TaskList {
    /// Create an empty list. Const-compatible for static initialization.
    pub const fn new(id: ListId) -> Self {
        Self {
            id,
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> ListId {
        self.id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    /// Append `idx` at the tail. O(1).
    ///
    /// `idx` must not be a member of any list.
    pub fn push_back<T: Linked>(&mut self, nodes: &mut [T], idx: usize) {
        debug_assert!(nodes[idx].link().container.is_none());
        {
            let link = nodes[idx].link_mut();
            link.prev = self.tail;
            link.next = None;
            link.container = Some(self.id);
        }
        match self.tail {
            Some(tail) => nodes[tail].link_mut().next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    /// Insert `idx` at the head. O(1).
    pub fn push_front<T: Linked>(&mut self, nodes: &mut [T], idx: usize) {
        debug_assert!(nodes[idx].link().container.is_none());
        {
            let link = nodes[idx].link_mut();
            link.prev = None;
            link.next = self.head;
            link.container = Some(self.id);
        }
        match self.head {
            Some(head) => nodes[head].link_mut().prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        self.len += 1;
    }

    /// Insert `idx` keeping the list sorted by ascending `value`. Nodes with
    /// an equal key keep insertion order (the new node goes after them).
    pub fn insert_ordered<T: Linked>(&mut self, nodes: &mut [T], idx: usize, value: TickType) {
        nodes[idx].link_mut().value = value;

        let mut cursor = self.head;
        while let Some(at) = cursor {
            if nodes[at].link().value > value {
                break;
            }
            cursor = nodes[at].link().next;
        }

        let Some(before) = cursor else {
            self.push_back(nodes, idx);
            return;
        };

        debug_assert!(nodes[idx].link().container.is_none());
        let prev = nodes[before].link().prev;
        {
            let link = nodes[idx].link_mut();
            link.prev = prev;
            link.next = Some(before);
            link.container = Some(self.id);
        }
        nodes[before].link_mut().prev = Some(idx);
        match prev {
            Some(p) => nodes[p].link_mut().next = Some(idx),
            None => self.head = Some(idx),
        }
        self.len += 1;
    }

    /// Unlink `idx`. O(1).
    ///
    /// `idx` must be a member of this list.
    pub fn remove<T: Linked>(&mut self, nodes: &mut [T], idx: usize) {
        debug_assert_eq!(nodes[idx].link().container, Some(self.id));
        let Link { prev, next, .. } = *nodes[idx].link();

        match prev {
            Some(p) => nodes[p].link_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => nodes[n].link_mut().prev = prev,
            None => self.tail = prev,
        }

        let link = nodes[idx].link_mut();
        link.prev = None;
        link.next = None;
        link.container = None;
        self.len -= 1;
    }

    /// Remove and return the head node.
    pub fn pop_front<T: Linked>(&mut self, nodes: &mut [T]) -> Option<usize> {
        let head = self.head?;
        self.remove(nodes, head);
        Some(head)
    }

    /// Walk the list from head to tail.
    pub fn iter<'a, T: Linked>(&self, nodes: &'a [T]) -> Iter<'a, T> {
        Iter {
            nodes,
            cursor: self.head,
        }
    }
}

/// Iterator over node indices, head first.
pub struct Iter<'a, T> {
    nodes: &'a [T],
    cursor: Option<usize>,
}

impl<T: Linked> Iterator for Iter<'_, T> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let at = self.cursor?;
        self.cursor = self.nodes[at].link().next;
        Some(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Node {
        link: Link,
    }

    impl Linked for Node {
        fn link(&self) -> &Link {
            &self.link
        }
        fn link_mut(&mut self) -> &mut Link {
            &mut self.link
        }
    }

    fn nodes(n: usize) -> Vec<Node> {
        (0..n).map(|_| Node::default()).collect()
    }

    fn collect(list: &TaskList, nodes: &[Node]) -> Vec<usize> {
        list.iter(nodes).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut n = nodes(4);
        let mut list = TaskList::new(ListId::Ready(1));
        list.push_back(&mut n, 2);
        list.push_back(&mut n, 0);
        list.push_front(&mut n, 3);
        assert_eq!(collect(&list, &n), vec![3, 2, 0]);
        assert_eq!(list.len(), 3);
        assert_eq!(n[2].link.container, Some(ListId::Ready(1)));

        assert_eq!(list.pop_front(&mut n), Some(3));
        assert_eq!(list.pop_front(&mut n), Some(2));
        assert_eq!(list.pop_front(&mut n), Some(0));
        assert_eq!(list.pop_front(&mut n), None);
        assert!(list.is_empty());
        assert_eq!(n[2].link.container, None);
    }

    #[test]
    fn test_remove_middle_and_ends() {
        let mut n = nodes(5);
        let mut list = TaskList::new(ListId::Suspended);
        for i in 0..5 {
            list.push_back(&mut n, i);
        }
        list.remove(&mut n, 2);
        assert_eq!(collect(&list, &n), vec![0, 1, 3, 4]);
        list.remove(&mut n, 0);
        list.remove(&mut n, 4);
        assert_eq!(collect(&list, &n), vec![1, 3]);
        assert_eq!(list.head(), Some(1));

        // Tail was fixed up: appending lands after 3
        list.push_back(&mut n, 0);
        assert_eq!(collect(&list, &n), vec![1, 3, 0]);
    }

    #[test]
    fn test_ordered_insert_is_stable() {
        let mut n = nodes(6);
        let mut list = TaskList::new(ListId::Delayed(0));
        list.insert_ordered(&mut n, 0, 10);
        list.insert_ordered(&mut n, 1, 5);
        list.insert_ordered(&mut n, 2, 10);
        list.insert_ordered(&mut n, 3, 7);
        list.insert_ordered(&mut n, 4, 5);
        list.insert_ordered(&mut n, 5, 1);
        assert_eq!(collect(&list, &n), vec![5, 1, 4, 3, 0, 2]);
        assert_eq!(n[3].link.value, 7);
    }
}
