//! The two process-wide caches the translation engine is built on:
//! [`process_data::ProcessDataCache`] (§4.3) and
//! [`namespace_index::NamespaceIndex`] (§4.4). Both are backed by
//! [`crate::trie::Trie`].

pub mod namespace_index;
pub mod process_data;

pub use namespace_index::NamespaceIndex;
pub use process_data::{ProcessDataCache, ProcessRecord};
