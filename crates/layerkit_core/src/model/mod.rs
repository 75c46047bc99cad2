//! Domain model shared by every layer.
//!
//! # Responsibility
//! - Describe entities in a storage-agnostic way (`Entity`, `RecordMeta`).
//! - Carry query inputs (`Filter`) and paged outputs (`PageResult`,
//!   `CursorPage`).
//!
//! # Invariants
//! - Every entity is identified by a stable `EntityId` assigned on create.
//! - Bookkeeping fields (`RecordMeta`) are owned by the repository layer.

pub mod entity;
pub mod filter;
pub mod page;
pub mod todo;
