//! Iteration over the depth axis of a [`MaskStack`].
//!
//! Animation front ends advance one frame per render tick. Instead of a
//! callback mutating a shared frame index, they hold a [`DepthFrames`]
//! cursor: a finite sequence over `0..depth_count` that can be switched
//! to wrap around (modulo the depth count) or restarted explicitly.

use ndarray::ArrayView2;

use crate::types::MaskStack;

/// Cursor over the depth slices of a [`MaskStack`].
///
/// In the default finite mode the iterator yields every slice once, in
/// depth order. After [`wrapping`](Self::wrapping) it wraps back to depth 0
/// after the last slice and never ends (unless the stack is empty).
#[derive(Debug, Clone)]
pub struct DepthFrames<'a> {
    stack: &'a MaskStack,
    next: usize,
    wrap: bool,
}

impl<'a> DepthFrames<'a> {
    /// Start at depth 0 in finite mode.
    #[must_use]
    pub const fn new(stack: &'a MaskStack) -> Self {
        Self {
            stack,
            next: 0,
            wrap: false,
        }
    }

    /// Switch to wrap-around mode: after the deepest slice the cursor
    /// returns to depth 0.
    #[must_use]
    pub const fn wrapping(mut self) -> Self {
        self.wrap = true;
        self
    }

    /// Reset the cursor to depth 0.
    pub const fn restart(&mut self) {
        self.next = 0;
    }

    /// Depth of the slice the next call to `next()` will yield.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.next
    }

    /// Number of slices in one pass.
    #[must_use]
    pub fn len_per_pass(&self) -> usize {
        self.stack.depth_count()
    }
}

impl<'a> Iterator for DepthFrames<'a> {
    type Item = (usize, ArrayView2<'a, u32>);

    fn next(&mut self) -> Option<Self::Item> {
        let stack = self.stack;
        let count = stack.depth_count();
        if count == 0 {
            return None;
        }
        if self.next >= count {
            if !self.wrap {
                return None;
            }
            self.next %= count;
        }
        let depth = self.next;
        let slice = stack.slice(depth)?;
        self.next = if self.wrap { (depth + 1) % count } else { depth + 1 };
        Some((depth, slice))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let count = self.stack.depth_count();
        if self.wrap && count > 0 {
            (usize::MAX, None)
        } else {
            let remaining = count.saturating_sub(self.next);
            (remaining, Some(remaining))
        }
    }
}
