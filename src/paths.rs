//! Centralised handling of on-disk batch artifact locations.
//!
//! All files created by a batch live under a single root directory per
//! invocation: `SMART_DISPATCH_LOGS/<batch-uid>/`, under the current
//! directory by default. Users can override the root with the
//! `SMART_DISPATCH_DIR` environment variable — the direct analogue of the
//! teacher's `PEND_DIR` override. Grouping paths in [`BatchPaths`] keeps
//! filename construction in one place instead of ad-hoc string formatting
//! scattered through the code base.

use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Directory that holds every batch's log directory. Defaults to
/// `./SMART_DISPATCH_LOGS`; overridable via `SMART_DISPATCH_DIR` (tests use
/// this to point at a throwaway `TempDir`).
pub fn logs_root() -> io::Result<PathBuf> {
    let root = match env::var("SMART_DISPATCH_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => PathBuf::from("SMART_DISPATCH_LOGS"),
    };
    fs::create_dir_all(&root)?;
    Ok(root)
}

/// All paths scoped to one batch: `<root>/<batch-uid>/...`.
#[derive(Debug, Clone)]
pub struct BatchPaths {
    pub root: PathBuf,
    pub commands: PathBuf,
    pub logs: PathBuf,
    pub worker_logs: PathBuf,
    pub job_logs: PathBuf,
    pub jobs_id: PathBuf,
    pub command_line_log: PathBuf,
}

impl BatchPaths {
    /// Resolve (but do not yet create) the paths for `batch_uid` under
    /// `logs_root()`.
    pub fn new(batch_uid: &str) -> io::Result<Self> {
        let root = logs_root()?.join(batch_uid);
        Self::at(root)
    }

    /// Resolve paths for a batch whose root directory is already known, as
    /// when resuming a batch named by its on-disk path rather than by uid.
    pub fn at(root: PathBuf) -> io::Result<Self> {
        let commands = root.join("commands");
        let logs = root.join("logs");
        Ok(Self {
            worker_logs: logs.join("worker"),
            job_logs: logs.join("job"),
            jobs_id: root.join("jobs_id.txt"),
            command_line_log: root.join("command_line.log"),
            commands,
            logs,
            root,
        })
    }

    /// Create every directory a fresh batch needs. `commands/` and
    /// `logs/{worker,job}/` are created eagerly; the four queue files
    /// themselves are created lazily by `CommandManager`.
    pub fn ensure_created(&self) -> io::Result<()> {
        fs::create_dir_all(&self.commands)?;
        fs::create_dir_all(&self.worker_logs)?;
        fs::create_dir_all(&self.job_logs)?;
        Ok(())
    }

    pub fn worker_out(&self, worker_id: &str) -> PathBuf {
        self.worker_logs.join(format!("{worker_id}.out"))
    }

    pub fn worker_err(&self, worker_id: &str) -> PathBuf {
        self.worker_logs.join(format!("{worker_id}.err"))
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }
}
