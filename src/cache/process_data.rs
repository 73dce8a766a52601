//! Process-data cache (`spec.md` §4.3): proc-pid -> parsed process record,
//! keyed through the bit-packed trie the way the original keys its
//! `proc_data_cache` by proc-pid. The trie only stores fixed-width `u64`
//! values, so it holds a 1-based slot index into a side `Vec` that owns the
//! actual heap-allocated [`ProcessRecord`]s; slot `0` means "absent".

use log::debug;

use crate::ids::{IdKind, NamespaceId, ProcPid};
use crate::procfs;
use crate::trie::{IterateFlags, Trie};

/// Interior/data block width shared by both caches, per `spec.md` §6's
/// tuning knobs (`2^16` bits).
const PTR_BLOCK_SIZE_LG: u8 = 16;
const DATA_BLOCK_SIZE_LG: u8 = 16;
const ITEM_SIZE_LG: u8 = 6;

/// Number of bits needed to represent `n` in binary (`0` for `n == 0`).
/// Mirrors the original's `lg2`.
pub(crate) fn bit_width(n: u64) -> u8 {
    if n == 0 {
        0
    } else {
        (64 - n.leading_zeros()) as u8
    }
}

/// A single process's namespace and id hierarchies, as last observed.
/// `spec.md` §3.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub proc_pid: ProcPid,
    /// Innermost first, bounded at `procfs::MAX_NS_DEPTH`.
    pub ns_hierarchy: Vec<NamespaceId>,
    /// Outermost first, one sequence per [`IdKind`]; only kinds fetched via
    /// [`ProcessDataCache::update`] are populated.
    id_hierarchy: [Vec<i32>; IdKind::COUNT],
}

impl ProcessRecord {
    fn new(proc_pid: ProcPid) -> ProcessRecord {
        ProcessRecord {
            proc_pid,
            ns_hierarchy: Vec::new(),
            id_hierarchy: Default::default(),
        }
    }

    pub fn ns_count(&self) -> usize {
        self.ns_hierarchy.len()
    }

    pub fn id_count(&self, kind: IdKind) -> usize {
        self.id_hierarchy[kind.index()].len()
    }

    pub fn id_hierarchy(&self, kind: IdKind) -> &[i32] {
        &self.id_hierarchy[kind.index()]
    }

    /// `spec.md` §3: "valid for translation" requires a non-empty namespace
    /// hierarchy and a non-empty id hierarchy for the requested kind.
    pub fn valid_for_translation(&self, kind: IdKind) -> bool {
        self.ns_count() > 0 && !self.id_hierarchy[kind.index()].is_empty()
    }

    /// Applies the record-resolution rule of `spec.md` §4.5: finds the
    /// namespace-hierarchy index that matches `src_ns`, confirms the
    /// aligned id matches `from_id`, and returns the id aligned with the
    /// outermost namespace the tracer can see (its own).
    pub fn resolve(&self, kind: IdKind, src_ns: NamespaceId, from_id: i32) -> Option<i32> {
        let ns_count = self.ns_count();
        let ids = self.id_hierarchy(kind);
        let id_count = ids.len();

        if ns_count == 0 || id_count < ns_count {
            return None;
        }

        let i = self.ns_hierarchy.iter().position(|&ns| ns == src_ns)?;
        let id_idx = id_count.checked_sub(1)?.checked_sub(i)?;
        if ids[id_idx] != from_id {
            return None;
        }

        let own_idx = id_count - ns_count;
        Some(ids[own_idx])
    }
}

/// Map from proc-pid to [`ProcessRecord`], backed by a [`Trie`] for
/// existence/lookup and a slab `Vec` for ownership. The cache owns every
/// record it holds; [`ProcessDataCache::remove`] frees it.
pub struct ProcessDataCache {
    index: Trie,
    slots: Vec<Option<Box<ProcessRecord>>>,
    free_list: Vec<usize>,
}

impl ProcessDataCache {
    /// Sizes the backing trie's key width to the current kernel's
    /// `pid_max` (`spec.md` §4.3).
    pub fn new() -> ProcessDataCache {
        let key_size = bit_width((procfs::pid_max() as u64).saturating_sub(1)).max(1);
        let index = Trie::create(ITEM_SIZE_LG, PTR_BLOCK_SIZE_LG, DATA_BLOCK_SIZE_LG, key_size, 0)
            .expect("process-data cache trie shape is always valid");
        ProcessDataCache {
            index,
            slots: Vec::new(),
            free_list: Vec::new(),
        }
    }

    fn slot_of(&mut self, proc_pid: ProcPid) -> Option<usize> {
        let raw = self.index.get(proc_pid.0 as u64);
        if raw == 0 {
            None
        } else {
            Some((raw - 1) as usize)
        }
    }

    /// Returns the cached record for `proc_pid`, allocating a fresh one
    /// (with only `proc_pid` set) if none exists yet.
    pub fn get_or_create(&mut self, proc_pid: ProcPid) -> &mut ProcessRecord {
        if self.slot_of(proc_pid).is_none() {
            let slot = match self.free_list.pop() {
                Some(slot) => {
                    self.slots[slot] = Some(Box::new(ProcessRecord::new(proc_pid)));
                    slot
                }
                None => {
                    self.slots.push(Some(Box::new(ProcessRecord::new(proc_pid))));
                    self.slots.len() - 1
                }
            };
            self.index.set(proc_pid.0 as u64, (slot + 1) as u64);
        }

        let slot = self.slot_of(proc_pid).expect("just inserted");
        self.slots[slot].as_deref_mut().expect("slot occupied")
    }

    /// Returns the cached record for `proc_pid`, if any, without creating
    /// one.
    pub fn get(&mut self, proc_pid: ProcPid) -> Option<&mut ProcessRecord> {
        let slot = self.slot_of(proc_pid)?;
        self.slots[slot].as_deref_mut()
    }

    /// Refreshes `ns_hierarchy` and `id_hierarchy[kind]` from `/proc`.
    /// Returns `false` and removes-and-frees the record when the process is
    /// gone or the parsed data is empty; `true` otherwise.
    pub fn update(&mut self, proc_pid: ProcPid, kind: IdKind) -> bool {
        let ns_hierarchy = match procfs::read_ns_hierarchy(proc_pid) {
            Ok(hierarchy) if !hierarchy.is_empty() => hierarchy,
            _ => {
                self.remove(proc_pid);
                return false;
            }
        };

        let ids = match procfs::read_id_list(proc_pid, kind) {
            Ok(ids) if !ids.is_empty() => ids,
            _ => {
                self.remove(proc_pid);
                return false;
            }
        };

        if ids.len() < ns_hierarchy.len() {
            debug!(
                "process {}: id_count {} < ns_count {} for {:?}, discarding record",
                proc_pid,
                ids.len(),
                ns_hierarchy.len(),
                kind
            );
            self.remove(proc_pid);
            return false;
        }

        let record = self.get_or_create(proc_pid);
        record.ns_hierarchy = ns_hierarchy;
        record.id_hierarchy[kind.index()] = ids;
        true
    }

    /// Drops and frees the cached record for `proc_pid`, if any.
    pub fn remove(&mut self, proc_pid: ProcPid) {
        if let Some(slot) = self.slot_of(proc_pid) {
            self.slots[slot] = None;
            self.free_list.push(slot);
            self.index.set(proc_pid.0 as u64, 0);
        }
    }

    /// Snapshots every proc-pid currently cached, in ascending order. The
    /// caller revisits each by proc-pid rather than holding a live
    /// reference, so the iteration tolerates concurrent removal of the
    /// entry being inspected (`spec.md` §9, "Iterator callback with
    /// mutation").
    pub fn snapshot_proc_pids(&self) -> Vec<ProcPid> {
        let mut pids = Vec::new();
        let (start, end) = self.index.full_range();
        self.index.iterate(start, end, IterateFlags::NONE, |key, val| {
            if val != 0 {
                pids.push(ProcPid(key as i32));
            }
        });
        pids
    }
}

impl Default for ProcessDataCache {
    fn default() -> ProcessDataCache {
        ProcessDataCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_width_matches_expectations() {
        assert_eq!(bit_width(0), 0);
        assert_eq!(bit_width(1), 1);
        assert_eq!(bit_width(255), 8);
        assert_eq!(bit_width(256), 9);
    }

    #[test]
    fn get_or_create_then_get_roundtrip() {
        let mut cache = ProcessDataCache::new();
        let pid = ProcPid(4242);
        assert!(cache.get(pid).is_none());
        cache.get_or_create(pid);
        assert!(cache.get(pid).is_some());
        assert_eq!(cache.get(pid).unwrap().proc_pid, pid);
    }

    #[test]
    fn remove_frees_the_slot() {
        let mut cache = ProcessDataCache::new();
        let pid = ProcPid(99);
        cache.get_or_create(pid);
        cache.remove(pid);
        assert!(cache.get(pid).is_none());
        assert_eq!(cache.snapshot_proc_pids(), Vec::<ProcPid>::new());
    }

    #[test]
    fn snapshot_lists_every_cached_pid_ascending() {
        let mut cache = ProcessDataCache::new();
        for pid in [300, 10, 200] {
            cache.get_or_create(ProcPid(pid));
        }
        assert_eq!(
            cache.snapshot_proc_pids(),
            vec![ProcPid(10), ProcPid(200), ProcPid(300)]
        );
    }

    #[test]
    fn resolve_applies_alignment_rule() {
        let mut record = ProcessRecord::new(ProcPid(1000));
        record.ns_hierarchy = vec![NamespaceId(20), NamespaceId(10)];
        record.id_hierarchy[IdKind::Tid.index()] = vec![1000, 42];

        assert_eq!(record.resolve(IdKind::Tid, NamespaceId(20), 42), Some(1000));
        assert_eq!(record.resolve(IdKind::Tid, NamespaceId(10), 99), None);
        assert_eq!(record.resolve(IdKind::Tid, NamespaceId(999), 42), None);
    }

    #[test]
    fn resolve_rejects_truncated_id_hierarchy() {
        let mut record = ProcessRecord::new(ProcPid(1000));
        record.ns_hierarchy = vec![NamespaceId(20), NamespaceId(10)];
        record.id_hierarchy[IdKind::Tid.index()] = vec![42];
        assert_eq!(record.resolve(IdKind::Tid, NamespaceId(10), 42), None);
    }
}
