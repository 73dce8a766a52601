//! Small newtypes shared by the proc reader, the caches, and the
//! translation engine. Kept separate the way `proot-rs`'s `register::abi`
//! isolates its type aliases (`Word`, `SysArgIndex`) from the modules that
//! use them.

use std::fmt;

/// Which kind of per-namespace identifier a lookup concerns. Mirrors the
/// `NS{pid,tgid,pgid,sid}:` lines of `/proc/<pid>/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum IdKind {
    Tid = 0,
    Tgid = 1,
    Pgid = 2,
    Sid = 3,
}

impl IdKind {
    pub const COUNT: usize = 4;
    pub const ALL: [IdKind; Self::COUNT] = [IdKind::Tid, IdKind::Tgid, IdKind::Pgid, IdKind::Sid];

    /// The tab-terminated label this kind is reported under in
    /// `/proc/<pid>/status`.
    pub fn status_label(self) -> &'static str {
        match self {
            IdKind::Tid => "NSpid:",
            IdKind::Tgid => "NStgid:",
            IdKind::Pgid => "NSpgid:",
            IdKind::Sid => "NSsid:",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// 64-bit inode number of `/proc/<pid>/ns/pid`. `0` means "unknown / error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceId(pub u64);

impl NamespaceId {
    pub const UNKNOWN: NamespaceId = NamespaceId(0);

    pub fn is_unknown(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A PID as seen in the tracer's own namespace; usable to address
/// `/proc/<proc_pid>`. `0` stands for "the tracer itself" (`/proc/self`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcPid(pub i32);

impl ProcPid {
    pub const SELF: ProcPid = ProcPid(0);

    pub fn is_self(self) -> bool {
        self.0 == 0
    }

    /// The path component this pid is addressed by under `/proc`: `self` for
    /// the tracer's own process, the decimal pid otherwise.
    pub fn path_component(self) -> String {
        if self.is_self() {
            "self".to_string()
        } else {
            self.0.to_string()
        }
    }
}

impl fmt::Display for ProcPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
