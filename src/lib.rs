//! `tbtree` is a persistent, self-describing binary B+tree index for
//! embedded, real-time databases.
//!
//! A tree is a flat byte region — a file or an in-memory buffer — laid
//! out as a tree header followed by internal nodes and leaves, each
//! self-describing its own length and the relative offsets of its
//! neighbors. Keys are typed ([key]); nodes and leaves are encoded and
//! decoded by [layout]; [navigator] walks the on-disk structure without
//! materializing it; [search] answers point, range, and pattern queries;
//! [builder] assembles a whole tree in one pass from a sorted in-memory
//! set; [mutator] edits an existing tree leaf-by-leaf, splitting or
//! reallocating as needed; [alloc] tracks free space within the byte
//! region; [lock] serializes concurrent access by tree and leaf
//! identity; [txn] sequences a batch of mutator calls with rollback.

pub mod alloc;
pub mod builder;
pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod layout;
pub mod lock;
pub mod mutator;
pub mod navigator;
pub mod offset;
pub mod search;
pub mod source;
pub mod txn;

pub use crate::alloc::Allocator;
pub use crate::builder::{Builder, BuiltTree};
pub use crate::config::{Config, Header, TreeFlags};
pub use crate::entry::{EntryValue, LeafEntry, ValueList};
pub use crate::error::{Error, Result};
pub use crate::key::{Key, MetaTuple};
pub use crate::layout::{ExtDataBlock, LeafImage, NodeImage};
pub use crate::mutator::Mutator;
pub use crate::navigator::{LoadedNode, ParentLink};
pub use crate::offset::OffsetWidth;
pub use crate::search::{Operator, SearchRequest, SearchResponse};
pub use crate::source::{ByteSource, FileSource, MemSource};
