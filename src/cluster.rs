//! Cluster detection and the `ClusterKind` sum type.
//!
//! Spec.md §9 calls for re-architecting the source's class-inheritance
//! hierarchy of per-cluster PBS specializations as a tagged union with a
//! single match, rather than dynamic dispatch. Ground truth for detection:
//! `original_source/smartdispatch/utils.py::detect_cluster` (via `qstat
//! -B`'s server line).

use std::io;
use std::process::Command;

/// Abstracts "shell invocation of a child process" at its interface
/// (spec.md §1's out-of-scope collaborator). The default impl shells out
/// via `std::process::Command`; tests substitute a fake.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<String>;
}

pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<String> {
        let output = Command::new(program).args(args).output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{program} exited with {:?}",
                output.status.code()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterKind {
    Generic,
    Mammouth,
    Hades,
    Guillimin,
    Helios,
}

impl ClusterKind {
    /// Maps a cluster config directory's filename stem (`mammouth.json`,
    /// `guillimin.json`, ...) to a `ClusterKind`. Unrecognized names fall
    /// back to `Generic`.
    pub fn from_config_name(name: &str) -> Option<Self> {
        match name {
            "mammouth" => Some(Self::Mammouth),
            "hades" => Some(Self::Hades),
            "guillimin" => Some(Self::Guillimin),
            "helios" => Some(Self::Helios),
            _ => None,
        }
    }
}

/// Invoke `qstat -B`, parse the server line (third line of output) and map
/// its DNS suffix to a cluster. `.m` -> Mammouth, `.guil` -> Guillimin,
/// `.helios` -> Helios; anything else (including failure to run `qstat`)
/// is `None`. Hades has no DNS-suffix rule in the original source — it is
/// only ever selected through an explicit `--cluster hades` override
/// (documented in DESIGN.md).
pub fn detect(runner: &dyn CommandRunner) -> Option<ClusterKind> {
    let output = runner.run("qstat", &["-B"]).ok()?;
    let server_line = output.lines().nth(2)?;
    let server = server_line.split_whitespace().next()?;

    if server.ends_with(".m") {
        Some(ClusterKind::Mammouth)
    } else if server.ends_with(".guil") {
        Some(ClusterKind::Guillimin)
    } else if server.ends_with(".helios") {
        Some(ClusterKind::Helios)
    } else {
        None
    }
}
