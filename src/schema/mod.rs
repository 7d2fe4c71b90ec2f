//! Entity-to-SQL mapping engine.
//!
//! - Per-type descriptors built once from declarative metadata and cached
//!   for the process lifetime
//! - Pure statement-text builders over a descriptor plus caller fragments
//! - The snapshot-diff engine behind minimal and optimistic updates

pub mod descriptor;
pub mod diff;
pub mod sql;

pub use descriptor::{ColumnSpec, Entity, EntityMeta, TableDescriptor, descriptor};
pub use diff::{UpdateSegment, diff};
pub use sql::InsertMode;
