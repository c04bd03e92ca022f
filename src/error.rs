/// Errors returned by [`ConcurrentVec`](crate::ConcurrentVec) operations.
///
/// Only [`ConcurrentVec::set`](crate::ConcurrentVec::set) can fail. Reads and removals with an
/// invalid index report "not found" through `Option` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The index does not address an existing element.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
