use crate::error::{ParallelErr, Result};

/// An indexable, read-only collection of samples.
///
/// Loading threads call `get` concurrently, hence the `Sync` bound.
pub trait Dataset: Sync {
    type Item: Send;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the sample at `idx`.
    ///
    /// # Errors
    /// Returns `IndexOutOfBounds` past the end, or whatever the backing storage fails with.
    fn get(&self, idx: usize) -> Result<Self::Item>;
}

/// A minimal in-memory dataset of `(x, y)` pairs.
#[derive(Debug, Clone)]
pub struct InMemoryDataset<X, Y> {
    xs: Vec<X>,
    ys: Vec<Y>,
}

impl<X, Y> InMemoryDataset<X, Y> {
    /// Creates a new dataset from owned buffers.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `xs` and `ys` differ in length.
    pub fn new(xs: Vec<X>, ys: Vec<Y>) -> Result<Self> {
        if xs.len() != ys.len() {
            return Err(ParallelErr::InvalidConfig(format!(
                "inputs ({}) and targets ({}) must have the same length",
                xs.len(),
                ys.len()
            )));
        }

        Ok(Self { xs, ys })
    }

    #[inline]
    pub fn xs(&self) -> &[X] {
        &self.xs
    }

    #[inline]
    pub fn ys(&self) -> &[Y] {
        &self.ys
    }
}

impl<X, Y> Dataset for InMemoryDataset<X, Y>
where
    X: Clone + Send + Sync,
    Y: Clone + Send + Sync,
{
    type Item = (X, Y);

    #[inline]
    fn len(&self) -> usize {
        self.xs.len()
    }

    fn get(&self, idx: usize) -> Result<Self::Item> {
        match (self.xs.get(idx), self.ys.get(idx)) {
            (Some(x), Some(y)) => Ok((x.clone(), y.clone())),
            _ => Err(ParallelErr::IndexOutOfBounds {
                index: idx,
                len: self.len(),
            }),
        }
    }
}

impl<T: Dataset + ?Sized> Dataset for Box<T> {
    type Item = T::Item;

    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, idx: usize) -> Result<Self::Item> {
        (**self).get(idx)
    }
}
