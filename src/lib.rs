//! PID-namespace translation cache: maps process/thread/process-group/
//! session identifiers observed in a traced process's PID namespace back to
//! the identifiers in the tracer's own namespace.
//!
//! The two pieces of hard engineering are [`trie`] (the sparse bit-packed
//! trie backing both caches) and [`engine`] (the translation engine built
//! on top of it). Everything else — [`procfs`], [`cache`], [`ids`],
//! [`errors`] — exists to support those two.
//!
//! This crate defines only the narrow [`engine::TraceeHandle`] contract it
//! needs from a tracer's tracee record; it does not implement a tracer,
//! syscall decoders, or any ptrace plumbing itself (`spec.md` §1).

pub mod cache;
pub mod engine;
pub mod errors;
pub mod ids;
pub mod procfs;
pub mod trie;

pub use engine::{NamespaceResolution, Translation, TranslationEngine, TraceeHandle};
pub use ids::{IdKind, NamespaceId, ProcPid};
