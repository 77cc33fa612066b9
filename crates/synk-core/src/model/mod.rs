//! Common data model shared by adapters, detection and reconciliation.

pub mod cursor;
pub mod item;
pub mod link;
pub mod operation;

pub use cursor::{Snapshot, SyncCursor};
pub use item::{content_hash, ItemPatch, ItemStatus, Provider, SyncItem, Timing};
pub use link::{LinkChange, LinkEnd, LinkRecord, PendingLink};
pub use operation::{OperationKind, SyncOperation};
