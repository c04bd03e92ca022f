use crate::error::{Error, Result};
use crate::iter::{self, IndexedItem, Iter, IterMode};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) type List<T> = Arc<RwLock<Vec<T>>>;

// Writers collect their input before locking, a poisoned lock still guards a consistent vector.
pub(crate) fn read<T>(list: &List<T>) -> RwLockReadGuard<'_, Vec<T>> {
    list.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(list: &List<T>) -> RwLockWriteGuard<'_, Vec<T>> {
    list.write().unwrap_or_else(PoisonError::into_inner)
}

/// A growable array that can be shared between threads.
///
/// All operations lock the container internally with a reader/writer lock: writes
/// ([`push`](Self::push), [`push_many`](Self::push_many), [`set`](Self::set),
/// [`remove`](Self::remove), [`clear`](Self::clear)) are exclusive, reads run concurrently.
/// Share it by wrapping it in an [`Arc`].
///
/// Indices are positional, removing an element shifts everything after it. An index obtained
/// from one call may be stale by the next.
///
/// # Example:
///
/// ```
/// use concurrent_vec::ConcurrentVec;
/// use std::sync::Arc;
///
/// let v = Arc::new(ConcurrentVec::new());
///
/// let handles: Vec<_> = (0..4)
///     .map(|i| {
///         let v = v.clone();
///         std::thread::spawn(move || v.push(i))
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
///
/// assert_eq!(v.len(), 4);
/// assert!(v.contains(&3));
/// ```
pub struct ConcurrentVec<T> {
    pub(crate) inner: List<T>,
}

impl<T> ConcurrentVec<T> {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self {
            inner: List::default(),
        }
    }

    /// Appends an element at the end.
    pub fn push(&self, value: T) {
        write(&self.inner).push(value);
    }

    /// Appends all `values` in order, within a single critical section.
    ///
    /// No other writer can insert anything in between. `values` is drained before the lock is
    /// taken, so readers see either none or all of the batch.
    pub fn push_many<I>(&self, values: I)
    where
        I: IntoIterator<Item = T>,
    {
        let values: Vec<T> = values.into_iter().collect();
        write(&self.inner).extend(values);
    }

    /// Replaces the element at `index`.
    ///
    /// Unlike [`get`](Self::get) and [`remove`](Self::remove) this is strict: an index past
    /// the end is an error and the container is left untouched.
    pub fn set(&self, index: usize, value: T) -> Result<()> {
        let mut items = write(&self.inner);
        let len = items.len();
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => {
                tracing::debug!(index, len, "rejected set past the end");
                Err(Error::IndexOutOfRange { index, len })
            }
        }
    }

    /// Removes the element at `index` and returns it, shifting all later elements left.
    ///
    /// An index past the end is not an error, nothing happens and `None` is returned. Spare
    /// capacity is released right away.
    pub fn remove(&self, index: usize) -> Option<T> {
        let mut items = write(&self.inner);
        if index >= items.len() {
            return None;
        }
        let value = items.remove(index);
        items.shrink_to_fit();
        Some(value)
    }

    /// Removes all elements and releases the backing storage.
    pub fn clear(&self) {
        *write(&self.inner) = Vec::new();
    }

    pub fn len(&self) -> usize {
        read(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.inner).is_empty()
    }

    /// Returns `true` if any element matches `predicate`.
    ///
    /// Scans front to back and stops at the first match.
    pub fn contains_by<F>(&self, predicate: F) -> bool
    where
        F: FnMut(&T) -> bool,
    {
        read(&self.inner).iter().any(predicate)
    }

    /// Returns `true` if any element is equal to `value`.
    ///
    /// Equality is the element's own [`PartialEq`], no deep comparison is attempted beyond
    /// it. For identity checks on shared handles use [`contains_by`](Self::contains_by), e.g.
    /// with [`Arc::ptr_eq`].
    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.contains_by(|item| item == value)
    }
}

impl<T: Clone> ConcurrentVec<T> {
    /// Returns a copy of the element at `index`, or `None` if there is none.
    pub fn get(&self, index: usize) -> Option<T> {
        read(&self.inner).get(index).cloned()
    }

    /// Copies all elements out under a single read lock.
    pub fn to_vec(&self) -> Vec<T> {
        read(&self.inner).clone()
    }
}

impl<T> ConcurrentVec<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Iterates over a snapshot of the contents, in index order.
    ///
    /// Production happens on a background thread holding a read lock; `mode` decides whether
    /// that lock is held until the consumer is done ([`IterMode::Unbuffered`]) or only until
    /// everything is queued ([`IterMode::Buffered`]). A `bool` is accepted as the `buffered`
    /// flag.
    ///
    /// The returned [`Iter`] must be drained, [cancelled](Iter::cancel) or dropped to
    /// release the lock.
    pub fn iter(&self, mode: impl Into<IterMode>) -> Iter<T> {
        iter::spawn(self.inner.clone(), mode.into(), |_| true)
    }

    /// Like [`iter`](Self::iter), but asks `predicate` about every item before it is produced.
    ///
    /// The first `false` ends the iteration: that item is not produced, the lock is released
    /// and the sequence closes.
    ///
    /// The predicate runs on the producer thread while it holds the read lock. Calling a write
    /// operation on the same container from inside the predicate deadlocks.
    ///
    /// ```
    /// use concurrent_vec::ConcurrentVec;
    ///
    /// let v = ConcurrentVec::from(vec![1, 2, 30, 4]);
    ///
    /// let small: Vec<_> = v.iter_while(false, |item| item.value < 10).map(|i| i.value).collect();
    /// assert_eq!(small, [1, 2]);
    /// ```
    pub fn iter_while<F>(&self, mode: impl Into<IterMode>, predicate: F) -> Iter<T>
    where
        F: FnMut(&IndexedItem<T>) -> bool + Send + 'static,
    {
        iter::spawn(self.inner.clone(), mode.into(), predicate)
    }
}

impl<T> Default for ConcurrentVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<Vec<T>> for ConcurrentVec<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(items)),
        }
    }
}

impl<T> FromIterator<T> for ConcurrentVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ConcurrentVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(read(&self.inner).iter()).finish()
    }
}
