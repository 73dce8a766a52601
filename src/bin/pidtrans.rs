//! Small demo binary exercising [`pidns_cache::TranslationEngine`] against a
//! real target pid, in the `proot-rs`-style `cli.rs` idiom (clap 2.x
//! builder API). Not a tracer: the "tracee" here is just a target pid
//! addressed directly in the tracer's own namespace, so every lookup takes
//! the identity fast path unless `--from-ns` names a different namespace.

use clap::{App, Arg};

use pidns_cache::engine::{NamespaceResolution, TraceeHandle, TranslationEngine};
use pidns_cache::{IdKind, ProcPid};

struct TargetTracee {
    proc_pid: ProcPid,
}

impl TraceeHandle for TargetTracee {
    fn proc_pid(&self) -> ProcPid {
        self.proc_pid
    }
}

fn parse_kind(raw: &str) -> Option<IdKind> {
    match raw {
        "tid" => Some(IdKind::Tid),
        "tgid" => Some(IdKind::Tgid),
        "pgid" => Some(IdKind::Pgid),
        "sid" => Some(IdKind::Sid),
        _ => None,
    }
}

fn main() {
    env_logger::init();

    let matches = App::new("pidtrans")
        .about("Translate a PID-namespace id into the caller's own namespace")
        .arg(
            Arg::with_name("pid")
                .help("proc-pid (as seen under /proc) of the process whose namespace `id` lives in")
                .required(true),
        )
        .arg(
            Arg::with_name("id")
                .help("the id to translate")
                .required(true),
        )
        .arg(
            Arg::with_name("kind")
                .short("k")
                .long("kind")
                .help("tid, tgid, pgid, or sid")
                .takes_value(true)
                .default_value("tid"),
        )
        .get_matches();

    let proc_pid: i32 = matches
        .value_of("pid")
        .unwrap()
        .parse()
        .expect("pid must be a positive integer");
    let from_id: i32 = matches
        .value_of("id")
        .unwrap()
        .parse()
        .expect("id must be an integer");
    let kind = parse_kind(matches.value_of("kind").unwrap()).expect("kind must be tid, tgid, pgid, or sid");

    let tracee = TargetTracee {
        proc_pid: ProcPid(proc_pid),
    };
    let mut resolution = NamespaceResolution::Unknown;
    let mut engine = TranslationEngine::new();

    match engine.translate(Some((&tracee, &mut resolution)), from_id, kind, true) {
        Some(translation) => {
            print!("{}", translation.id);
            if let Some(pid) = translation.proc_pid {
                if pid.0 != translation.id {
                    print!(" (proc-pid {} in our namespace)", pid);
                }
            }
            println!();
        }
        None => {
            eprintln!(
                "pidtrans: could not translate {} ({:?}) from pid {}",
                from_id, kind, proc_pid
            );
            std::process::exit(1);
        }
    }
}
