use crate::list::{read, List};
use futures::channel::mpsc;
use futures::future::{self, Either};
use futures::{SinkExt, Stream, StreamExt};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;
use tokio_util::sync::CancellationToken;

/// How an iteration hands items from the producer to the consumer.
///
/// Converts from the `buffered` flag: `true` is [`Buffered`](IterMode::Buffered), `false` is
/// [`Unbuffered`](IterMode::Unbuffered).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IterMode {
    /// The queue is sized to the length of the container when the iteration starts.
    ///
    /// Costs one upfront allocation for the full result set. The producer then pushes every
    /// item without waiting on the consumer and releases the read lock as soon as it is done.
    Buffered,
    /// Items are handed over one at a time.
    ///
    /// No upfront allocation, but the read lock is held until the sequence is drained,
    /// cancelled or dropped, so a slow consumer stalls every writer.
    ///
    /// Calling a write operation (and on write-preferring platforms any operation) on the same
    /// container from the consuming thread while the iteration is still alive deadlocks.
    #[default]
    Unbuffered,
}

impl From<bool> for IterMode {
    fn from(buffered: bool) -> Self {
        if buffered {
            Self::Buffered
        } else {
            Self::Unbuffered
        }
    }
}

/// An element paired with the position it had when it was produced.
///
/// This is a detached copy. It does not follow later mutations of the container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexedItem<T> {
    pub index: usize,
    pub value: T,
}

pin_project! {
    /// Lazy, finite sequence of [`IndexedItem`]s produced by
    /// [`ConcurrentVec::iter`](crate::ConcurrentVec::iter) and
    /// [`ConcurrentVec::iter_while`](crate::ConcurrentVec::iter_while).
    ///
    /// Items come out in index order. Consume them through [`Iterator`] (blocking) or
    /// [`Stream`] (async). A background producer holds a read lock on the container until the
    /// sequence ends, [`cancel`](Iter::cancel) is called or the `Iter` is dropped.
    ///
    /// # Example:
    ///
    /// ```
    /// use concurrent_vec::{ConcurrentVec, IterMode};
    ///
    /// let v = ConcurrentVec::from(vec!["a", "b", "c"]);
    ///
    /// let values: Vec<_> = v.iter(IterMode::Buffered).map(|item| item.value).collect();
    /// assert_eq!(values, ["a", "b", "c"]);
    /// ```
    pub struct Iter<T> {
        #[pin]
        rx: mpsc::Receiver<IndexedItem<T>>,
        stop: CancellationToken,
        mode: IterMode,
    }

    impl<T> PinnedDrop for Iter<T> {
        fn drop(this: Pin<&mut Self>) {
            // abandoned, the producer releases its read lock
            this.stop.cancel();
        }
    }
}

impl<T> Iter<T> {
    /// Stops the iteration.
    ///
    /// The producer is woken up if it is waiting on the consumer and releases its read lock.
    /// No further items are returned, even ones that were already queued.
    pub fn cancel(&self) {
        self.stop.cancel();
    }

    /// Whether [`cancel`](Iter::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn mode(&self) -> IterMode {
        self.mode
    }
}

impl<T> Iterator for Iter<T> {
    type Item = IndexedItem<T>;

    /// Blocks until the producer hands over the next item or finishes.
    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_cancelled() {
            return None;
        }
        futures::executor::block_on(self.rx.next())
    }
}

impl<T> Stream for Iter<T> {
    type Item = IndexedItem<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if this.stop.is_cancelled() {
            return Poll::Ready(None);
        }
        this.rx.poll_next(cx)
    }
}

impl<T> std::fmt::Debug for Iter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iter")
            .field("mode", &self.mode)
            .field("cancelled", &self.stop.is_cancelled())
            .finish()
    }
}

/// Spawns the producer thread for one iteration.
///
/// `keep_going` is asked about every item before it is sent; the first `false` ends the
/// iteration without sending that item.
pub(crate) fn spawn<T, F>(list: List<T>, mode: IterMode, mut keep_going: F) -> Iter<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(&IndexedItem<T>) -> bool + Send + 'static,
{
    let capacity = match mode {
        IterMode::Buffered => read(&list).len(),
        IterMode::Unbuffered => 0,
    };

    let (mut tx, rx) = mpsc::channel(capacity);
    let stop = CancellationToken::new();
    let producer_stop = stop.clone();

    thread::spawn(move || {
        let stop = producer_stop;
        let items = read(&list);
        tracing::trace!(len = items.len(), ?mode, "iteration started");

        futures::executor::block_on(async {
            for (index, value) in items.iter().enumerate() {
                if stop.is_cancelled() {
                    tracing::trace!(index, "iteration cancelled");
                    return;
                }

                let item = IndexedItem {
                    index,
                    value: value.clone(),
                };
                if !keep_going(&item) {
                    tracing::trace!(index, "iteration stopped by predicate");
                    return;
                }

                let cancelled = std::pin::pin!(stop.cancelled());
                match future::select(tx.send(item), cancelled).await {
                    Either::Left((Ok(()), _)) => {}
                    // consumer went away, Drop cancels the token as well
                    Either::Left((Err(_), _)) | Either::Right(_) => {
                        tracing::trace!(index, "iteration cancelled");
                        return;
                    }
                }
            }
            tracing::trace!("iteration finished");
        });

        // the lock must be free by the time the consumer observes the end of the sequence
        drop(items);
        drop(tx);
    });

    Iter { rx, stop, mode }
}

#[cfg(test)]
mod tests {
    use super::{IndexedItem, IterMode};
    use crate::ConcurrentVec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    fn abc() -> ConcurrentVec<&'static str> {
        ConcurrentVec::from(vec!["a", "b", "c"])
    }

    fn expected_abc() -> Vec<IndexedItem<&'static str>> {
        vec![
            IndexedItem {
                index: 0,
                value: "a",
            },
            IndexedItem {
                index: 1,
                value: "b",
            },
            IndexedItem {
                index: 2,
                value: "c",
            },
        ]
    }

    #[test]
    fn mode_from_flag() {
        assert_eq!(IterMode::from(true), IterMode::Buffered);
        assert_eq!(IterMode::from(false), IterMode::Unbuffered);
        assert_eq!(IterMode::default(), IterMode::Unbuffered);
    }

    #[test]
    fn buffered_yields_in_order() {
        let v = abc();
        let items: Vec<_> = v.iter(true).collect();
        assert_eq!(items, expected_abc());
    }

    #[test]
    fn unbuffered_yields_in_order() {
        let v = abc();
        let iter = v.iter(false);
        assert_eq!(iter.mode(), IterMode::Unbuffered);

        let items: Vec<_> = iter.collect();
        assert_eq!(items, expected_abc());
    }

    #[test]
    fn empty_container_yields_nothing() {
        let v = ConcurrentVec::<u8>::new();
        assert_eq!(v.iter(IterMode::Buffered).count(), 0);
        assert_eq!(v.iter(IterMode::Unbuffered).count(), 0);
    }

    #[test]
    fn each_call_is_a_fresh_sequence() {
        let v = abc();
        let first: Vec<_> = v.iter(true).collect();
        let second: Vec<_> = v.iter(true).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn items_are_detached_copies() {
        let v = abc();
        let items: Vec<_> = v.iter(true).collect();

        v.set(0, "z").unwrap();
        assert_eq!(items[0].value, "a");
        assert_eq!(v.get(0), Some("z"));
    }

    #[test]
    fn buffered_releases_lock_before_drained() {
        let v = ConcurrentVec::from((0..64).collect::<Vec<u32>>());
        let mut iter = v.iter(IterMode::Buffered);
        assert_eq!(iter.next().map(|item| item.value), Some(0));

        // the producer never waits on the consumer, so a writer gets through eventually
        v.push(64);
        assert_eq!(v.len(), 65);

        let rest: Vec<_> = iter.map(|item| item.value).collect();
        assert_eq!(rest, (1..64).collect::<Vec<_>>());
    }

    #[test]
    fn early_stop_halts_and_releases_lock() {
        let v = ConcurrentVec::from(vec![1, 2, 3, 4, 5]);
        let calls = Arc::new(AtomicUsize::new(0));

        for mode in [IterMode::Buffered, IterMode::Unbuffered] {
            calls.store(0, Ordering::SeqCst);
            let counter = calls.clone();
            let items: Vec<_> = v
                .iter_while(mode, move |_| counter.fetch_add(1, Ordering::SeqCst) == 0)
                .collect();

            assert!(items.len() <= 2);
            assert_eq!(items[0].value, 1);
            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert!(v.inner.try_write().is_ok());
        }

        v.push(6);
        assert_eq!(v.len(), 6);
    }

    #[test]
    fn early_stop_never_called_on_empty() {
        let v = ConcurrentVec::<u8>::new();
        let items: Vec<_> = v
            .iter_while(IterMode::Unbuffered, |_| panic!("no items to inspect"))
            .collect();
        assert!(items.is_empty());
    }

    #[test]
    fn predicate_sees_index_and_value() {
        let v = ConcurrentVec::from(vec!["x", "y", "z"]);
        let items: Vec<_> = v
            .iter_while(true, |item| item.index < 2 && item.value != "z")
            .map(|item| item.value)
            .collect();
        assert_eq!(items, ["x", "y"]);
    }

    #[test]
    fn dropping_unbuffered_releases_lock() {
        let v = ConcurrentVec::from((0..100).collect::<Vec<u32>>());

        let mut iter = v.iter(IterMode::Unbuffered);
        assert_eq!(iter.next().map(|item| item.index), Some(0));
        drop(iter);

        v.push(100);
        assert_eq!(v.len(), 101);
    }

    #[test]
    fn cancel_releases_lock_and_ends_sequence() {
        let v = Arc::new(ConcurrentVec::from((0..100).collect::<Vec<u32>>()));

        let mut iter = v.iter(IterMode::Unbuffered);
        assert!(iter.next().is_some());
        iter.cancel();
        assert!(iter.is_cancelled());

        // the iter is still alive, the writer must get through anyway
        let (done_tx, done_rx) = mpsc::channel();
        let writer = v.clone();
        std::thread::spawn(move || {
            writer.push(100);
            done_tx.send(()).unwrap();
        });
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("writer stalled after cancel");

        assert!(iter.next().is_none());
    }

    // `Iter` is both an `Iterator` and a `Stream`, so stream adapters are called explicitly
    #[tokio::test]
    async fn stream_matches_iterator() {
        let v = abc();

        let streamed = futures::StreamExt::collect::<Vec<_>>(v.iter(IterMode::Unbuffered)).await;
        assert_eq!(streamed, expected_abc());

        let streamed = futures::StreamExt::collect::<Vec<_>>(v.iter(IterMode::Buffered)).await;
        assert_eq!(streamed, expected_abc());
    }

    #[tokio::test]
    async fn dropping_stream_releases_lock() {
        let v = ConcurrentVec::from((0..100).collect::<Vec<u32>>());

        let mut iter = v.iter(IterMode::Unbuffered);
        let first = futures::StreamExt::next(&mut iter).await;
        assert_eq!(first.map(|item| item.value), Some(0));
        assert!(!iter.is_cancelled());
        drop(iter);

        v.push(100);
        assert_eq!(v.len(), 101);
    }

    #[tokio::test]
    async fn stream_early_stop() {
        let v = abc();
        let mut iter = v.iter_while(false, |item| item.value != "c");

        let mut values = Vec::new();
        while let Some(item) = futures::StreamExt::next(&mut iter).await {
            values.push(item.value);
        }
        assert_eq!(values, ["a", "b"]);
    }
}
