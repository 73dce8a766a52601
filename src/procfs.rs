//! Reads the pieces of `/proc` the translation engine needs: the PID
//! namespace hierarchy a process belongs to (via `ns/pid` and the `nsfs`
//! `NS_GET_PARENT` ioctl), and the `NS{pid,tgid,pgid,sid}:` id hierarchies
//! reported in `/proc/<pid>/status`.
//!
//! Mirrors `proot-rs`'s convention of wrapping `/proc` I/O behind small
//! free functions that return [`crate::errors::Result`] rather than
//! panicking (see `filesystem::readers`, `register::reader`).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::OnceLock;

use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;

use crate::errors::{Result, WithContext};
use crate::ids::{IdKind, NamespaceId, ProcPid};

/// Hard ceiling on PID namespace nesting, imposed by the kernel since Linux
/// 3.7. `spec.md` §6.
pub const MAX_NS_DEPTH: usize = 32;

/// `nsfs` ioctl magic (`'b'` / `0xb7`), from `linux/nsfs.h`. Not wrapped by
/// the `nix` version this crate pins, so it's hand-declared the same way
/// `proot-rs`'s `constants` module hand-declares raw ptrace requests nix
/// doesn't expose.
const NSIO: u8 = 0xb7;

nix::ioctl_none!(ns_get_parent, NSIO, 0x02);

/// Reported once per process lifetime when the running kernel lacks the
/// `NS_GET_PARENT` ioctl (`ENOTTY`), matching `spec.md` §7's "report once"
/// policy for "unsupported kernel".
static NS_IOCTL_UNSUPPORTED_REPORTED: OnceLock<()> = OnceLock::new();

fn path_component(proc_pid: ProcPid) -> String {
    proc_pid.path_component()
}

/// Opens `/proc/<proc_pid>/ns/pid` (or `/proc/self/ns/pid` for
/// [`ProcPid::SELF`]) and walks up the namespace hierarchy via
/// `NS_GET_PARENT`, recording one namespace id (the inode of the open
/// handle) per level.
///
/// Stops on permission denial (normal: the caller can't see above this
/// point), on an unsupported kernel (reported once, returns only the
/// starting namespace), on any other error (reported, walk terminated), or
/// at [`MAX_NS_DEPTH`] levels. The returned sequence is ordered innermost
/// first, same as `spec.md` §3's `ns_hierarchy`; per §9's documented
/// tolerance, hitting the depth cap is not distinguished from a complete
/// walk — callers treat both as "usable up to `MAX_NS_DEPTH` levels".
pub fn read_ns_hierarchy(proc_pid: ProcPid) -> Result<Vec<NamespaceId>> {
    let path = format!("/proc/{}/ns/pid", path_component(proc_pid));

    let mut fd = fcntl::open(path.as_str(), OFlag::O_RDONLY | OFlag::O_NONBLOCK, Mode::empty())
        .context(format!("opening {}", path))?;

    let mut hierarchy = Vec::new();

    let result = (|| -> Result<()> {
        loop {
            let st = nix::sys::stat::fstat(fd).context("fstat on ns/pid handle")?;

            if hierarchy.len() >= MAX_NS_DEPTH {
                break;
            }

            hierarchy.push(NamespaceId(st.st_ino));

            match unsafe { ns_get_parent(fd) } {
                Ok(parent_fd) => {
                    let _ = unistd::close(fd);
                    fd = parent_fd;
                }
                Err(nix::Error::Sys(Errno::EPERM)) => {
                    debug!(
                        "read_ns_hierarchy: terminating ascent after {} levels on ns {}",
                        hierarchy.len(),
                        hierarchy.last().map(|n| n.0).unwrap_or(0)
                    );
                    break;
                }
                Err(nix::Error::Sys(Errno::ENOTTY)) => {
                    if NS_IOCTL_UNSUPPORTED_REPORTED.set(()).is_ok() {
                        warn!("NS_GET_PARENT is not supported by the running kernel");
                    }
                    break;
                }
                Err(errno) => {
                    warn!("read_ns_hierarchy: ioctl(NS_GET_PARENT): {}", errno);
                    break;
                }
            }
        }
        Ok(())
    })();

    let _ = unistd::close(fd);
    result?;

    Ok(hierarchy)
}

/// Reads the `NS{pid,tgid,pgid,sid}:` line for `kind` out of
/// `/proc/<proc_pid>/status`, returning the tab-separated ids it lists
/// (outermost namespace first), capped at [`MAX_NS_DEPTH`] entries.
///
/// An absent line or a malformed field yields an empty sequence: `spec.md`
/// §4.2 treats both as "no data", and the caller discards the record.
pub fn read_id_list(proc_pid: ProcPid, kind: IdKind) -> Result<Vec<i32>> {
    let path = format!("/proc/{}/status", path_component(proc_pid));
    let file = File::open(&path).context(format!("opening {}", path))?;
    let reader = BufReader::new(file);

    let label = kind.status_label();

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => continue,
        };
        if !line.starts_with(label) {
            continue;
        }

        let rest = &line[label.len()..];
        let mut ids = Vec::new();
        for field in rest.split('\t').take(MAX_NS_DEPTH) {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            match field.parse::<i32>() {
                Ok(id) => ids.push(id),
                Err(_) => {
                    debug!("read_id_list: malformed field {:?} on {}", field, label);
                    return Ok(Vec::new());
                }
            }
        }
        return Ok(ids);
    }

    Ok(Vec::new())
}

/// Reads `/proc/sys/kernel/pid_max` once, falling back to `i32::MAX` if the
/// file is absent or unreadable. Memoized the way the original's
/// `get_pid_max` uses a function-local `static`.
pub fn pid_max() -> i32 {
    static PID_MAX: OnceLock<i32> = OnceLock::new();
    *PID_MAX.get_or_init(|| {
        let path = "/proc/sys/kernel/pid_max";
        match File::open(path) {
            Ok(file) => {
                let mut reader = BufReader::new(file);
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(_) => line.trim().parse::<i32>().unwrap_or(i32::MAX),
                    Err(_) => i32::MAX,
                }
            }
            Err(_) => {
                warn!("pid_max: opening {} failed, falling back to i32::MAX", path);
                i32::MAX
            }
        }
    })
}

/// Returns `true` once `read_id_list(ProcPid::SELF, IdKind::Tid)` has been
/// observed to report exactly one id: the tracer and its own `/proc` view
/// share a PID namespace. Memoized for the process lifetime, matching the
/// original's `is_proc_ours`.
pub fn proc_is_self() -> bool {
    static PROC_IS_SELF: OnceLock<bool> = OnceLock::new();
    *PROC_IS_SELF.get_or_init(|| match read_id_list(ProcPid::SELF, IdKind::Tid) {
        Ok(ids) => ids.len() == 1,
        Err(_) => false,
    })
}

/// The tracer's own PID namespace id, i.e. the innermost entry of its own
/// `ns/pid` hierarchy. Memoized for the process lifetime (`get_our_ns` in
/// the original).
pub fn own_namespace() -> NamespaceId {
    static OWN_NS: OnceLock<NamespaceId> = OnceLock::new();
    *OWN_NS.get_or_init(|| {
        read_ns_hierarchy(ProcPid::SELF)
            .ok()
            .and_then(|h| h.first().copied())
            .unwrap_or(NamespaceId::UNKNOWN)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_own_ns_hierarchy() {
        let hierarchy = read_ns_hierarchy(ProcPid::SELF).expect("self ns/pid should be readable");
        assert!(!hierarchy.is_empty());
        assert!(!hierarchy[0].is_unknown());
    }

    #[test]
    fn own_namespace_matches_first_hierarchy_entry() {
        let hierarchy = read_ns_hierarchy(ProcPid::SELF).expect("self ns/pid should be readable");
        assert_eq!(own_namespace(), hierarchy[0]);
    }

    #[test]
    fn reads_own_tid_list() {
        let ids = read_id_list(ProcPid::SELF, IdKind::Tid).expect("self status should be readable");
        assert!(!ids.is_empty());
    }

    #[test]
    fn missing_status_line_is_empty_not_error() {
        // every live process has at least an NSpid line; this asserts the
        // empty-on-absence contract against a kind that is always present,
        // i.e. it never trips, but documents the expectation for kinds a
        // kernel build might omit.
        let ids = read_id_list(ProcPid::SELF, IdKind::Sid).unwrap_or_default();
        let _ = ids;
    }

    #[test]
    fn pid_max_is_positive() {
        assert!(pid_max() > 0);
    }
}
