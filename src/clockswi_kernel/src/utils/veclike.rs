use arrayvec::ArrayVec;
use core::ops;

/// Fixed-capacity storage backing a [`Pool`](super::Pool).
pub trait VecLike: ops::Deref<Target = [<Self as VecLike>::Element]> + ops::DerefMut {
    // FIXME: Work-around for the lack of compiler support for adding a
    //        `const Default` bound to a non-`const` `impl`
    const DEFAULT: Self;
    type Element;
    fn len(&self) -> usize;
    /// Return `true` if [`Self::push`] would overflow the storage.
    fn is_full(&self) -> bool;
    fn push(&mut self, x: Self::Element);
}

impl<T, const N: usize> VecLike for ArrayVec<T, N> {
    const DEFAULT: Self = Self::new_const();
    type Element = T;
    fn len(&self) -> usize {
        self.len()
    }
    fn is_full(&self) -> bool {
        self.is_full()
    }
    fn push(&mut self, x: Self::Element) {
        self.push(x)
    }
}
