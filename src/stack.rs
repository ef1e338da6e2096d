use std::{
    mem::MaybeUninit,
    ops::{Deref, DerefMut},
    slice,
};

use crate::error::RuntimeErrorKind;

/// The Stack data structure.
///
/// This struct is adopted because the [`Vec`] is allocated on heap. More specifically, it's
/// actually a `(ptr, len, cap)` triplet. Instead, this [`Stack`] is a fixed-capacity array
/// stored inline in its owner, and exposes safe API such as `push`, `pop` and [`Deref`] impls.
pub struct Stack<T, const N: usize> {
    /// The stack elements.
    ///
    /// [`MaybeUninit`] is introduced since Rust does not allow creating an array without
    /// providing any default value. The memory layout of [`MaybeUninit`] is guaranteed the same
    /// with [`T`], so there's no extra memory cost.
    elements: [MaybeUninit<T>; N],
    top: usize,
}

impl<T, const N: usize> Stack<T, N> {
    /// Create an empty stack.
    pub const fn new() -> Self {
        Self {
            elements: [const { MaybeUninit::uninit() }; N],
            top: 0,
        }
    }

    /// Returns the length of stack. The capacity is always [`N`] by the way.
    pub fn len(&self) -> usize {
        self.top
    }

    pub fn is_empty(&self) -> bool {
        self.top == 0
    }

    /// Get a reference to the top `n`-th element of the stack if any.
    ///
    /// `n` must be in the range `[0, len)`. When `n` == `0`, a reference of the top element is
    /// returned.
    pub fn peek(&self, n: usize) -> Result<&T, RuntimeErrorKind> {
        if self.len() <= n {
            return Err(RuntimeErrorKind::StackUnderflow);
        }
        Ok(&self[self.top - n - 1])
    }

    /// Gets the top element. It's a special form of `peek`.
    pub fn top(&self) -> Result<&T, RuntimeErrorKind> {
        self.peek(0)
    }

    pub fn top_mut(&mut self) -> Result<&mut T, RuntimeErrorKind> {
        self.last_mut().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    /// Pushes a value into the stack.
    pub fn push(&mut self, value: T) -> Result<(), RuntimeErrorKind> {
        if self.len() >= N {
            return Err(RuntimeErrorKind::StackOverflow);
        }
        self.elements[self.top].write(value);
        self.top += 1;
        Ok(())
    }

    /// Pops a value out of the stack.
    pub fn pop(&mut self) -> Result<T, RuntimeErrorKind> {
        if self.is_empty() {
            return Err(RuntimeErrorKind::StackUnderflow);
        }
        self.top -= 1;
        // SAFETY: slots below the old top are initialized, and lowering `top` first means the
        // value is never read or dropped again.
        Ok(unsafe { self.elements[self.top].assume_init_read() })
    }

    /// Drop every element above `len`. Does nothing when the stack is not longer than that.
    pub fn truncate(&mut self, len: usize) {
        while self.top > len {
            self.top -= 1;
            // SAFETY: see `pop`.
            unsafe { self.elements[self.top].assume_init_drop() };
        }
    }

    /// Drop every element, and set the stack top to the first slot.
    pub fn clear(&mut self) {
        self.truncate(0)
    }
}

impl<T, const N: usize> Default for Stack<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for Stack<T, N> {
    fn drop(&mut self) {
        self.clear()
    }
}

impl<T, const N: usize> Deref for Stack<T, N> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        // SAFETY: the first `top` elements are initialized and `MaybeUninit<T>` has the layout
        // of `T`.
        unsafe { slice::from_raw_parts(self.elements.as_ptr().cast::<T>(), self.top) }
    }
}

impl<T, const N: usize> DerefMut for Stack<T, N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: see `deref`.
        unsafe { slice::from_raw_parts_mut(self.elements.as_mut_ptr().cast::<T>(), self.top) }
    }
}
