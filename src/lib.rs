//! A dynamic array that can be shared and mutated across threads.
//!
//! [`ConcurrentVec`] guards a `Vec` with a reader/writer lock so callers never have to lock
//! anything themselves. Elements can be appended, read, replaced, removed, counted, searched
//! and iterated from any number of threads.
//!
//! Iteration streams a snapshot of the contents from a background producer, see
//! [`ConcurrentVec::iter`] and [`IterMode`] for the trade-off between the two delivery modes.
//!
//! # Example:
//!
//! ```
//! use concurrent_vec::{ConcurrentVec, Error, IterMode};
//!
//! let v = ConcurrentVec::new();
//! v.push("a");
//! v.push("b");
//! v.push_many(["c", "d"]);
//! v.remove(1);
//!
//! assert_eq!(v.len(), 3);
//! assert_eq!(v.get(1), Some("c"));
//! assert_eq!(v.get(3), None);
//! assert_eq!(v.set(3, "x"), Err(Error::IndexOutOfRange { index: 3, len: 3 }));
//!
//! for item in v.iter(IterMode::Unbuffered) {
//!     println!("{}: {}", item.index, item.value);
//! }
//! ```

mod error;
mod iter;
mod list;

pub use self::error::{Error, Result};
pub use self::iter::{IndexedItem, Iter, IterMode};
pub use self::list::ConcurrentVec;
