//! Decoder for NetBeans profiler snapshot (`.nps`) files.
//!
//! A snapshot file is a small envelope (signature, version, type tag) around a
//! zlib-compressed payload. The payload layout depends on the snapshot type;
//! CPU snapshots are decoded into a method table and one call tree per thread.
//!
//! Usage:
//!
//! ``` no_run
//! # fn main() -> nps::Result<()> {
//! let bytes = std::fs::read("snapshot.nps").unwrap_or_default();
//! let container = nps::Container::decode(&bytes)?;
//!
//! if let Some(cpu) = container.cpu() {
//!     for thread in &cpu.threads {
//!         println!("{}: {} nodes", thread.thread_name, thread.call_tree.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Snapshot types other than CPU are not decoded out of the box, but a
//! [`DecoderRegistry`] can map any type tag to a custom decode function
//! and be passed to [`Container::decode_with`].

mod call_tree;
mod container;
mod cpu;
pub mod packed;
mod reader;
mod registry;
mod snapshot_type;

pub use call_tree::{CallTree, CallTreeNode, NodeId, PointerWidth, TimePair, TreeReader, Walk};
pub use container::{Container, MAGIC, Snapshot};
pub use cpu::{CpuSnapshot, Method, MethodId, Thread};
pub use reader::{Error, Reader, Result};
pub use registry::{DecodeFn, DecoderRegistry, keep_unparsed};
pub use snapshot_type::SnapshotType;
