//! Translation engine (`spec.md` §4.5): the only surface syscall decoders
//! and the tracing harness consume. Orchestrates the identity fast path,
//! the namespace-index hint, cache iteration, and a full `/proc` scan, and
//! writes back to both caches on every success.

use std::fs;

use crate::cache::{NamespaceIndex, ProcessDataCache};
use crate::errors::{Error, Result};
use crate::ids::{IdKind, NamespaceId, ProcPid};
use crate::procfs;

/// The narrow contract the engine needs from "the tracee record" that
/// `spec.md` §1 calls out as an external collaborator: just enough to
/// address the traced process under `/proc`.
pub trait TraceeHandle {
    fn proc_pid(&self) -> ProcPid;
}

/// A tracee's lazily-resolved PID namespace. `spec.md` §4.5: "`Unknown ->
/// Resolved(ns) | Resolved(0 = unresolvable)`. Transition is one-way for
/// the tracee's lifetime." Owned by the caller (typically embedded in a
/// real tracee struct), not by the engine, so the engine stays a
/// process-wide singleton while per-tracee state lives with the tracer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceResolution {
    Unknown,
    Resolved(NamespaceId),
}

impl Default for NamespaceResolution {
    fn default() -> NamespaceResolution {
        NamespaceResolution::Unknown
    }
}

impl NamespaceResolution {
    /// Resolves and memoizes the tracee's namespace id on first call;
    /// returns the memoized value afterward. Resolution failure memoizes
    /// `Resolved(NamespaceId::UNKNOWN)`, matching the one-way state machine.
    ///
    /// `spec.md` §4.5 reads this as `read_ns_hierarchy(proc_pid_for(tracee))[0]`,
    /// i.e. through a proc-pid translation step. This reads
    /// `tracee.proc_pid()` directly instead. The two agree whenever
    /// [`crate::procfs::proc_is_self`] holds (the tracer and `/proc` share a
    /// namespace, the common case); they could diverge for a tracer nested
    /// inside another namespace translator, which this crate's
    /// `TraceeHandle` contract doesn't model.
    pub fn resolve<T: TraceeHandle>(&mut self, tracee: &T) -> NamespaceId {
        match *self {
            NamespaceResolution::Resolved(ns) => ns,
            NamespaceResolution::Unknown => {
                let ns = procfs::read_ns_hierarchy(tracee.proc_pid())
                    .ok()
                    .and_then(|hierarchy| hierarchy.first().copied())
                    .unwrap_or(NamespaceId::UNKNOWN);
                *self = NamespaceResolution::Resolved(ns);
                ns
            }
        }
    }
}

/// Result of a successful [`TranslationEngine::translate`] call: the id in
/// the tracer's own namespace, plus the proc-pid of the process it was
/// resolved through when the caller asked for one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub id: i32,
    pub proc_pid: Option<ProcPid>,
}

/// Returns the tracer's own thread id, used as the identity fast path's
/// proc-pid answer for `from_id == 0`.
fn own_tid() -> ProcPid {
    ProcPid(unsafe { libc::syscall(libc::SYS_gettid) } as i32)
}

/// The process-wide translation engine: the two caches plus the
/// orchestration described in `spec.md` §4.5. `!Send` by construction (see
/// `SPEC_FULL.md` §5) — a single `TranslationEngine` is created once and
/// handed by `&mut` reference into each operation, rather than hidden
/// behind a global.
pub struct TranslationEngine {
    process_data: ProcessDataCache,
    namespace_index: NamespaceIndex,
}

impl TranslationEngine {
    /// Idempotent to construct: cheap, holds only empty tries.
    pub fn new() -> TranslationEngine {
        TranslationEngine {
            process_data: ProcessDataCache::new(),
            namespace_index: NamespaceIndex::new(),
        }
    }

    /// Translates `from_id` (an id of kind `kind`, observed in `tracee`'s
    /// namespace, or the tracer's own namespace when `tracee` is `None`)
    /// into the tracer's own namespace. `want_proc_pid` mirrors the
    /// original's nullable `proc_pid_ptr`: when the caller doesn't need the
    /// resolving proc-pid, the identity fast path can apply even when the
    /// tracer's `/proc` view isn't known to be its own namespace
    /// (`spec.md` §9's "trivial-case short-circuit").
    pub fn translate<T: TraceeHandle>(
        &mut self,
        tracee: Option<(&T, &mut NamespaceResolution)>,
        from_id: i32,
        kind: IdKind,
        want_proc_pid: bool,
    ) -> Option<Translation> {
        let own_ns = procfs::own_namespace();
        let src_ns = match tracee {
            Some((t, resolution)) => resolution.resolve(t),
            None => own_ns,
        };

        // 1. Identity fast path.
        if src_ns == own_ns && (procfs::proc_is_self() || !want_proc_pid) {
            let proc_pid = if want_proc_pid {
                Some(if from_id == 0 { own_tid() } else { ProcPid(from_id) })
            } else {
                None
            };
            return Some(Translation { id: from_id, proc_pid });
        }

        // 2. Namespace-index probe.
        if let Some(cached_pid) = self.namespace_index.get(src_ns, from_id, kind) {
            if let Some(result) = self.try_candidate(cached_pid, src_ns, from_id, kind, want_proc_pid) {
                return Some(result);
            }
        }

        // 3. Cache iteration: snapshot first so revalidation-triggered
        // removal of the entry under inspection can't invalidate the walk
        // (`spec.md` §9).
        for pid in self.process_data.snapshot_proc_pids() {
            let tentative = self
                .process_data
                .get(pid)
                .and_then(|record| record.resolve(kind, src_ns, from_id));
            if tentative.is_none() {
                continue;
            }
            if let Some(result) = self.try_candidate(pid, src_ns, from_id, kind, want_proc_pid) {
                return Some(result);
            }
        }

        // 4. Full /proc scan, thread ids under /proc/<pid>/task first.
        self.scan_dir("/proc", true, src_ns, from_id, kind, want_proc_pid)
    }

    /// Looks up the proc-pid addressing `tracee` under `/proc`. Usually the
    /// tracee's own pid is already proc-pid-shaped; the indirection exists
    /// for the case where the tracer's `/proc` isn't mounted from its own
    /// namespace (`proc_is_self() == false`), in which case the ids the
    /// tracer observes via ptrace live in its own namespace but aren't
    /// directly usable to address `/proc`.
    pub fn proc_pid_for<T: TraceeHandle>(&mut self, tracee: &T) -> Result<ProcPid> {
        if procfs::proc_is_self() {
            return Ok(tracee.proc_pid());
        }

        match self.translate::<T>(None, tracee.proc_pid().0, IdKind::Tid, true) {
            Some(Translation { proc_pid: Some(pid), .. }) => Ok(pid),
            _ => Err(Error::msg(format!(
                "proc_pid_for: could not resolve proc-pid for tracee {}",
                tracee.proc_pid()
            ))),
        }
    }

    /// Drops every cache entry associated with `proc_pid`: its process-data
    /// record and every namespace-index hint currently pointing at it.
    /// `spec.md` §9 notes the original left `clear` a no-op despite being
    /// invoked on tracee exit; this reimplementation actually does the
    /// drop.
    pub fn clear<T: TraceeHandle>(&mut self, _tracee: &T, proc_pid: ProcPid) {
        self.process_data.remove(proc_pid);
        self.namespace_index.remove_all_for_proc_pid(proc_pid);
    }

    /// Fetches or creates the record for `proc_pid`, refreshes it from
    /// `/proc`, and applies the record-resolution rule. On success, writes
    /// back the namespace-index entry.
    fn try_candidate(
        &mut self,
        proc_pid: ProcPid,
        src_ns: NamespaceId,
        from_id: i32,
        kind: IdKind,
        want_proc_pid: bool,
    ) -> Option<Translation> {
        if !self.process_data.update(proc_pid, kind) {
            return None;
        }

        let id = self.process_data.get(proc_pid)?.resolve(kind, src_ns, from_id)?;

        self.namespace_index.put(src_ns, from_id, kind, proc_pid);
        Some(Translation {
            id,
            proc_pid: if want_proc_pid { Some(proc_pid) } else { None },
        })
    }

    /// Enumerates the numeric-named entries of `path` in ascending order,
    /// recursing into `<entry>/task` first when `recurse_tasks` is set
    /// (mirrors the original's `translate_id_dir`, which checks thread ids
    /// before the thread-group leader itself). Ascending order also
    /// satisfies `spec.md` §4.5's tie-break rule for `/proc` enumeration
    /// order.
    fn scan_dir(
        &mut self,
        path: &str,
        recurse_tasks: bool,
        src_ns: NamespaceId,
        from_id: i32,
        kind: IdKind,
        want_proc_pid: bool,
    ) -> Option<Translation> {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(_) => return None,
        };

        let mut pids: Vec<i32> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str().and_then(|name| name.parse::<i32>().ok()))
            .filter(|&pid| pid >= 1)
            .collect();
        pids.sort_unstable();

        for pid in pids {
            if recurse_tasks {
                let task_path = format!("{}/{}/task", path, pid);
                if let Some(result) = self.scan_dir(&task_path, false, src_ns, from_id, kind, want_proc_pid) {
                    return Some(result);
                }
            }

            if let Some(result) = self.try_candidate(ProcPid(pid), src_ns, from_id, kind, want_proc_pid) {
                return Some(result);
            }
        }

        None
    }
}

impl Default for TranslationEngine {
    fn default() -> TranslationEngine {
        TranslationEngine::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTracee(ProcPid);
    impl TraceeHandle for FakeTracee {
        fn proc_pid(&self) -> ProcPid {
            self.0
        }
    }

    #[test]
    fn identity_translation_for_own_namespace() {
        let mut engine = TranslationEngine::new();
        let result = engine.translate::<FakeTracee>(None, 1234, IdKind::Tid, true);
        assert_eq!(
            result,
            Some(Translation {
                id: 1234,
                proc_pid: Some(ProcPid(1234)),
            })
        );
    }

    #[test]
    fn identity_translation_without_proc_pid_request() {
        let mut engine = TranslationEngine::new();
        let result = engine.translate::<FakeTracee>(None, 777, IdKind::Sid, false);
        assert_eq!(
            result,
            Some(Translation {
                id: 777,
                proc_pid: None,
            })
        );
    }

    #[test]
    fn proc_pid_for_self_namespace_tracer_is_identity() {
        let mut engine = TranslationEngine::new();
        let own_pid = ProcPid(unsafe { libc::getpid() });
        let tracee = FakeTracee(own_pid);
        assert_eq!(engine.proc_pid_for(&tracee).unwrap(), own_pid);
    }

    #[test]
    fn clear_drops_process_data_and_namespace_hints() {
        let mut engine = TranslationEngine::new();
        engine.process_data.get_or_create(ProcPid(555));
        engine.namespace_index.put(NamespaceId(10), 1, IdKind::Tid, ProcPid(555));

        let tracee = FakeTracee(ProcPid(555));
        engine.clear(&tracee, ProcPid(555));

        assert!(engine.process_data.get(ProcPid(555)).is_none());
        assert_eq!(engine.namespace_index.get(NamespaceId(10), 1, IdKind::Tid), None);
    }

    #[test]
    fn namespace_resolution_memoizes() {
        let mut resolution = NamespaceResolution::Unknown;
        let tracee = FakeTracee(ProcPid(unsafe { libc::getpid() }));
        let first = resolution.resolve(&tracee);
        let second = resolution.resolve(&tracee);
        assert_eq!(first, second);
        assert!(matches!(resolution, NamespaceResolution::Resolved(_)));
    }
}
