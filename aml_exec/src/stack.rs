use smallvec::{Array, CollectionAllocErr, SmallVec};

/// Implemented by stack elements that may own values which must be released when the element is popped.
pub trait Finalize {
    /// Release everything owned by this element, returning the number of variable slots that were finalized.
    fn finalize(&mut self) -> usize;
}

/// A growable stack that keeps its first `A::size()` elements in an inline buffer. Once it outgrows the inline
/// buffer, its storage moves to the heap (doubling in capacity each time it fills up) and stays there, even if
/// the stack later shrinks back below the inline capacity.
pub struct Stack<A: Array>
where
    A::Item: Finalize,
{
    items: SmallVec<A>,
}

impl<A: Array> Stack<A>
where
    A::Item: Finalize,
{
    pub fn new() -> Stack<A> {
        Stack { items: SmallVec::new() }
    }

    /// Push `item`, returning a reference to it in its final position. Fails only if the stack needed to grow and
    /// the allocator could not provide the storage, in which case the stack is left unchanged.
    pub fn try_push(&mut self, item: A::Item) -> Result<&mut A::Item, CollectionAllocErr> {
        if self.items.len() == self.items.capacity() {
            self.items.try_reserve(1)?;
        }
        self.items.push(item);
        let top = self.items.len() - 1;
        Ok(&mut self.items[top])
    }

    /// Get the `n`th element from the top of the stack (`0` is the top).
    pub fn peek(&self, n: usize) -> Option<&A::Item> {
        let index = self.items.len().checked_sub(n + 1)?;
        self.items.get(index)
    }

    pub fn peek_back(&self) -> Option<&A::Item> {
        self.items.last()
    }

    pub fn peek_back_mut(&mut self) -> Option<&mut A::Item> {
        self.items.last_mut()
    }

    /// Get the element at absolute position `index`, counting from the bottom of the stack. Positions stay
    /// valid for as long as the element is live, so they can be recorded and inspected later.
    pub fn peek_at(&self, index: usize) -> Option<&A::Item> {
        self.items.get(index)
    }

    pub fn peek_at_mut(&mut self, index: usize) -> Option<&mut A::Item> {
        self.items.get_mut(index)
    }

    /// Remove the top element, finalizing it first. Returns the number of variable slots finalized, or `None` if
    /// the stack is empty.
    pub fn pop(&mut self) -> Option<usize> {
        let mut item = self.items.pop()?;
        Some(item.finalize())
    }

    /// Remove the top `n` elements. Returns `None`, without removing anything, if there are fewer than `n`.
    pub fn pop_n(&mut self, n: usize) -> Option<usize> {
        if n > self.items.len() {
            return None;
        }
        let mut finalized = 0;
        for _ in 0..n {
            finalized += self.pop()?;
        }
        Some(finalized)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the stack has moved from its inline buffer to heap storage.
    pub fn is_spilled(&self) -> bool {
        self.items.spilled()
    }
}

impl<A: Array> Default for Stack<A>
where
    A::Item: Finalize,
{
    fn default() -> Self {
        Stack::new()
    }
}
