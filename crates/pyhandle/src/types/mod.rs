/// Payload types stored on the heap.
///
/// Each container owns one reference to every object it holds; the heap
/// releases those through `HeapData::child_ids` when the container is freed.
/// Cross-type behavior (equality, hashing, ordering, repr) lives in `protocol`.
pub(crate) mod iter;
pub(crate) mod protocol;
pub(crate) mod sequence;
pub(crate) mod set;
pub mod r#type;

pub(crate) use iter::{IterItem, SeqIter};
pub use protocol::CompareOp;
pub(crate) use protocol::UnaryOp;
pub(crate) use sequence::{List, Tuple};
pub(crate) use set::SetStorage;
pub use r#type::Type;
