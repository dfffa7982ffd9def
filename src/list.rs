use std::{marker::PhantomData, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

pub(crate) struct Node<T> {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
    /// Pointer to the previous node of the list
    pub prev: Link<Self>,
    /// Element of the node
    pub data: T,
}

/// Intrusive doubly linked list. Nodes are never allocated by the list, they
/// are written at the addresses the caller hands in.
pub(crate) struct List<T> {
    head: Link<Node<T>>,
    tail: Link<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

/// Iterator over the nodes of a [`List`], from head to tail.
pub(crate) struct Nodes<'a, T> {
    current: Link<Node<T>>,
    remaining: usize,
    marker: PhantomData<&'a T>,
}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn first(&self) -> Link<Node<T>> {
        self.head
    }

    #[inline]
    pub fn last(&self) -> Link<Node<T>> {
        self.tail
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a new node to the Linked List.
    ///
    /// It is very important for us that, because we are the actual memory
    /// allocator, this method can not make allocations itself. Therefor,
    /// it has to receive the `addr` where this node has to be written.
    ///
    /// **SAFETY**: Caller must guarantee that `addr` is valid for writes of a
    /// `Node<T>` and suitably aligned.
    pub unsafe fn append(&mut self, data: T, addr: NonNull<u8>) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            node.as_ptr().write(Node {
                next: None,
                prev: self.tail,
                data,
            });

            if let Some(mut tail) = self.tail {
                tail.as_mut().next = Some(node);
            } else {
                self.head = Some(node);
            }
        }

        self.tail = Some(node);
        self.len += 1;

        node
    }

    /// Writes a new node at `addr` and links it right after `node`, taking
    /// over its former `next` link. If `node` was the tail, the new node
    /// becomes the tail.
    ///
    /// **SAFETY**: `node` must belong to this list and `addr` must satisfy the
    /// same requirements as in [`List::append`].
    pub unsafe fn insert_after(
        &mut self,
        mut node: NonNull<Node<T>>,
        data: T,
        addr: NonNull<u8>,
    ) -> NonNull<Node<T>> {
        let new = addr.cast::<Node<T>>();

        unsafe {
            let next = node.as_ref().next;

            new.as_ptr().write(Node {
                next,
                prev: Some(node),
                data,
            });

            match next {
                Some(mut next) => next.as_mut().prev = Some(new),
                None => self.tail = Some(new),
            }

            node.as_mut().next = Some(new);
        }

        self.len += 1;

        new
    }

    /// Unlinks `node` from the list. The memory of the node is left untouched.
    ///
    /// **SAFETY**: `node` must belong to this list.
    pub unsafe fn remove(&mut self, node: NonNull<Node<T>>) {
        unsafe {
            let prev = node.as_ref().prev;
            let next = node.as_ref().next;

            match prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.head = next,
            }

            match next {
                Some(mut next) => next.as_mut().prev = prev,
                None => self.tail = prev,
            }
        }

        self.len -= 1;
    }

    pub fn nodes(&self) -> Nodes<'_, T> {
        Nodes {
            current: self.head,
            remaining: self.len,
            marker: PhantomData,
        }
    }
}

impl<'a, T> Iterator for Nodes<'a, T> {
    type Item = NonNull<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
        }
        self.remaining = self.remaining.saturating_sub(1);

        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
