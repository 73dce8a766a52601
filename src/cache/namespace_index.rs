//! Namespace index (`spec.md` §4.4): per-id-kind map from `(namespace-id,
//! in-namespace id)` to the last-known proc-pid, used as a hot-path hint
//! that's always revalidated against the process-data cache before its
//! answer is trusted.
//!
//! Two trie levels, same sparse-slab technique as
//! [`crate::cache::process_data::ProcessDataCache`]: an outer trie keyed by
//! namespace id holds a slot index into a `Vec` of inner tries (lazily
//! created on first insert under a namespace); each inner trie is keyed by
//! the namespace-local id and its value is the proc-pid.

use std::collections::{HashMap, HashSet};

use crate::ids::{IdKind, NamespaceId, ProcPid};
use crate::procfs;
use crate::trie::Trie;

use super::process_data::bit_width;

const PTR_BLOCK_SIZE_LG: u8 = 16;
const DATA_BLOCK_SIZE_LG: u8 = 16;
const ITEM_SIZE_LG: u8 = 6;
const NS_KEY_SIZE: u8 = 64;

fn inner_key_size() -> u8 {
    bit_width((procfs::pid_max() as u64).saturating_sub(1)).max(1)
}

fn new_inner_trie() -> Trie {
    Trie::create(ITEM_SIZE_LG, PTR_BLOCK_SIZE_LG, DATA_BLOCK_SIZE_LG, inner_key_size(), 0)
        .expect("namespace-index inner trie shape is always valid")
}

/// One `(namespace-id, id-kind) -> (ns-local-id -> proc-pid)` map.
struct PerKindIndex {
    outer: Trie,
    inner: Vec<Option<Trie>>,
}

impl PerKindIndex {
    fn new() -> PerKindIndex {
        PerKindIndex {
            outer: Trie::create(ITEM_SIZE_LG, PTR_BLOCK_SIZE_LG, DATA_BLOCK_SIZE_LG, NS_KEY_SIZE, 0)
                .expect("namespace-index outer trie shape is always valid"),
            inner: Vec::new(),
        }
    }

    fn inner_trie_mut(&mut self, ns: NamespaceId, create: bool) -> Option<&mut Trie> {
        let raw = self.outer.get(ns.0);
        let slot = if raw != 0 {
            (raw - 1) as usize
        } else {
            if !create {
                return None;
            }
            self.inner.push(Some(new_inner_trie()));
            let slot = self.inner.len() - 1;
            self.outer.set(ns.0, (slot + 1) as u64);
            slot
        };
        self.inner[slot].as_mut()
    }

    fn put(&mut self, ns: NamespaceId, ns_local_id: i32, proc_pid: ProcPid) {
        if let Some(trie) = self.inner_trie_mut(ns, true) {
            trie.set(ns_local_id as u64, proc_pid.0 as u64);
        }
    }

    fn get(&mut self, ns: NamespaceId, ns_local_id: i32) -> Option<ProcPid> {
        let trie = self.inner_trie_mut(ns, false)?;
        let val = trie.get(ns_local_id as u64);
        if val == 0 {
            None
        } else {
            Some(ProcPid(val as i32))
        }
    }

    fn remove(&mut self, ns: NamespaceId, ns_local_id: i32) {
        if let Some(trie) = self.inner_trie_mut(ns, false) {
            trie.set(ns_local_id as u64, 0);
        }
    }
}

/// Auxiliary cache mapping `(namespace-id, id, id-kind) -> proc-pid`. Purely
/// a hint: every hit must be revalidated against the process-data cache
/// before being trusted (`spec.md` §4.4).
///
/// Also keeps a small reverse index (`proc-pid -> keys pointing at it`) so
/// that [`NamespaceIndex::remove_all_for_proc_pid`] can drop every stale
/// hint for an exited process in one pass, instead of leaving them to be
/// discovered one at a time on next use. This is in service of the
/// `clear()` redesign noted in `spec.md` §9: the source left `clear` a
/// no-op despite being invoked on tracee exit; this reimplementation
/// actually drops both cache entries.
pub struct NamespaceIndex {
    by_kind: [PerKindIndex; IdKind::COUNT],
    by_proc_pid: HashMap<ProcPid, HashSet<(NamespaceId, i32, IdKind)>>,
}

impl NamespaceIndex {
    pub fn new() -> NamespaceIndex {
        NamespaceIndex {
            by_kind: [
                PerKindIndex::new(),
                PerKindIndex::new(),
                PerKindIndex::new(),
                PerKindIndex::new(),
            ],
            by_proc_pid: HashMap::new(),
        }
    }

    pub fn put(&mut self, ns: NamespaceId, ns_local_id: i32, kind: IdKind, proc_pid: ProcPid) {
        if let Some(old_pid) = self.get(ns, ns_local_id, kind) {
            if old_pid != proc_pid {
                if let Some(keys) = self.by_proc_pid.get_mut(&old_pid) {
                    keys.remove(&(ns, ns_local_id, kind));
                }
            }
        }
        self.by_kind[kind.index()].put(ns, ns_local_id, proc_pid);
        self.by_proc_pid
            .entry(proc_pid)
            .or_default()
            .insert((ns, ns_local_id, kind));
    }

    pub fn get(&mut self, ns: NamespaceId, ns_local_id: i32, kind: IdKind) -> Option<ProcPid> {
        self.by_kind[kind.index()].get(ns, ns_local_id)
    }

    /// Drops the cached `(ns, ns_local_id, kind) -> proc_pid` hint, if any.
    pub fn remove(&mut self, ns: NamespaceId, ns_local_id: i32, kind: IdKind) {
        if let Some(pid) = self.get(ns, ns_local_id, kind) {
            if let Some(keys) = self.by_proc_pid.get_mut(&pid) {
                keys.remove(&(ns, ns_local_id, kind));
            }
        }
        self.by_kind[kind.index()].remove(ns, ns_local_id);
    }

    /// Drops every `(ns, ns_local_id, kind) -> proc_pid` hint currently
    /// pointing at `proc_pid`.
    pub fn remove_all_for_proc_pid(&mut self, proc_pid: ProcPid) {
        if let Some(keys) = self.by_proc_pid.remove(&proc_pid) {
            for (ns, ns_local_id, kind) in keys {
                self.by_kind[kind.index()].remove(ns, ns_local_id);
            }
        }
    }
}

impl Default for NamespaceIndex {
    fn default() -> NamespaceIndex {
        NamespaceIndex::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrip() {
        let mut idx = NamespaceIndex::new();
        idx.put(NamespaceId(10), 42, IdKind::Tid, ProcPid(1000));
        assert_eq!(idx.get(NamespaceId(10), 42, IdKind::Tid), Some(ProcPid(1000)));
    }

    #[test]
    fn miss_on_unknown_namespace() {
        let mut idx = NamespaceIndex::new();
        assert_eq!(idx.get(NamespaceId(7), 1, IdKind::Tid), None);
    }

    #[test]
    fn distinct_kinds_do_not_collide() {
        let mut idx = NamespaceIndex::new();
        idx.put(NamespaceId(10), 42, IdKind::Tid, ProcPid(1000));
        assert_eq!(idx.get(NamespaceId(10), 42, IdKind::Tgid), None);
    }

    #[test]
    fn remove_drops_entry() {
        let mut idx = NamespaceIndex::new();
        idx.put(NamespaceId(10), 42, IdKind::Sid, ProcPid(7));
        idx.remove(NamespaceId(10), 42, IdKind::Sid);
        assert_eq!(idx.get(NamespaceId(10), 42, IdKind::Sid), None);
    }

    #[test]
    fn remove_all_for_proc_pid_drops_every_kind() {
        let mut idx = NamespaceIndex::new();
        idx.put(NamespaceId(10), 42, IdKind::Tid, ProcPid(1000));
        idx.put(NamespaceId(10), 45, IdKind::Tgid, ProcPid(1000));
        idx.put(NamespaceId(20), 1, IdKind::Sid, ProcPid(2000));

        idx.remove_all_for_proc_pid(ProcPid(1000));

        assert_eq!(idx.get(NamespaceId(10), 42, IdKind::Tid), None);
        assert_eq!(idx.get(NamespaceId(10), 45, IdKind::Tgid), None);
        assert_eq!(idx.get(NamespaceId(20), 1, IdKind::Sid), Some(ProcPid(2000)));
    }

    #[test]
    fn reassigning_a_key_does_not_confuse_the_old_owners_reverse_entry() {
        let mut idx = NamespaceIndex::new();
        idx.put(NamespaceId(10), 42, IdKind::Tid, ProcPid(1000));
        idx.put(NamespaceId(10), 42, IdKind::Tid, ProcPid(2000));

        idx.remove_all_for_proc_pid(ProcPid(1000));
        assert_eq!(idx.get(NamespaceId(10), 42, IdKind::Tid), Some(ProcPid(2000)));
    }
}
