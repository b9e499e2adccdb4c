//! Submission of a generated PBS script to the batch scheduler. Ground
//! truth: `original_source/smartdispatch/job_generator.py`'s
//! `launch_jobs`/`write_jobIds_to_file` pair.

use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;

use crate::cluster::CommandRunner;

/// Abstracts "submit a script, get back a job id" so tests never shell out
/// to a real scheduler.
pub trait Launcher {
    fn submit(&self, pbs_path: &Path) -> io::Result<String>;
}

/// Shells out to `qsub` (or `msub` on clusters that require it) via a
/// `CommandRunner` and trims the single line of stdout it prints on
/// success.
pub struct SchedulerLauncher<'a> {
    runner: &'a dyn CommandRunner,
    program: &'a str,
}

impl<'a> SchedulerLauncher<'a> {
    pub fn new(runner: &'a dyn CommandRunner, program: &'a str) -> Self {
        Self { runner, program }
    }
}

impl Launcher for SchedulerLauncher<'_> {
    fn submit(&self, pbs_path: &Path) -> io::Result<String> {
        let path_str = pbs_path.to_str().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "PBS script path is not valid UTF-8")
        })?;
        let stdout = self.runner.run(self.program, &[path_str])?;
        let job_id = stdout.lines().next().unwrap_or("").trim();
        if job_id.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} printed no job id for {}", self.program, pbs_path.display()),
            ));
        }
        Ok(job_id.to_string())
    }
}

/// Submit every script in order, recording each returned id. On the first
/// submission failure, stop and return the ids already collected alongside
/// the error — callers decide whether partial submission is acceptable.
pub fn submit_all(launcher: &dyn Launcher, scripts: &[std::path::PathBuf]) -> (Vec<String>, Option<io::Error>) {
    let mut ids = Vec::with_capacity(scripts.len());
    for script in scripts {
        match launcher.submit(script) {
            Ok(id) => ids.push(id),
            Err(err) => return (ids, Some(err)),
        }
    }
    (ids, None)
}

/// Append a timestamp-header block of ids to `jobs_id.txt`:
/// `## YYYY-MM-DD HH:MM:SS ##` followed by one id per line. Called once per
/// `launch`/`resume` invocation so the file accumulates a history of every
/// submission round for the batch.
pub fn record_job_ids(jobs_id_path: &Path, ids: &[String]) -> io::Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(jobs_id_path)?;
    writeln!(file, "## {} ##", Utc::now().format("%Y-%m-%d %H:%M:%S"))?;
    for id in ids {
        writeln!(file, "{id}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FakeRunner(&'static str);
    impl CommandRunner for FakeRunner {
        fn run(&self, _program: &str, _args: &[&str]) -> io::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingRunner;
    impl CommandRunner for FailingRunner {
        fn run(&self, _program: &str, _args: &[&str]) -> io::Result<String> {
            Err(io::Error::new(io::ErrorKind::NotFound, "qsub: command not found"))
        }
    }

    #[test]
    fn submit_trims_single_line_job_id() {
        let runner = FakeRunner("12345.server.example.org\n");
        let launcher = SchedulerLauncher::new(&runner, "qsub");
        let id = launcher.submit(Path::new("/tmp/job_commands_0.sh")).unwrap();
        assert_eq!(id, "12345.server.example.org");
    }

    #[test]
    fn submit_propagates_scheduler_failure() {
        let runner = FailingRunner;
        let launcher = SchedulerLauncher::new(&runner, "qsub");
        assert!(launcher.submit(Path::new("/tmp/job_commands_0.sh")).is_err());
    }

    #[test]
    fn submit_all_stops_at_first_failure_but_keeps_prior_ids() {
        struct SeqRunner(std::cell::RefCell<usize>);
        impl CommandRunner for SeqRunner {
            fn run(&self, _program: &str, _args: &[&str]) -> io::Result<String> {
                let mut n = self.0.borrow_mut();
                *n += 1;
                if *n == 2 {
                    return Err(io::Error::other("submission rejected"));
                }
                Ok(format!("job-{n}"))
            }
        }
        let runner = SeqRunner(std::cell::RefCell::new(0));
        let launcher = SchedulerLauncher::new(&runner, "qsub");
        let scripts = vec!["a.sh".into(), "b.sh".into(), "c.sh".into()];
        let (ids, err) = submit_all(&launcher, &scripts);
        assert_eq!(ids, vec!["job-1".to_string()]);
        assert!(err.is_some());
    }

    #[test]
    fn record_job_ids_appends_timestamped_block() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("jobs_id.txt");
        record_job_ids(&path, &["111".into(), "222".into()]).unwrap();
        record_job_ids(&path, &["333".into()]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert!(lines[0].starts_with("## ") && lines[0].ends_with(" ##"));
        assert_eq!(lines[1], "111");
        assert_eq!(lines[2], "222");
        assert!(lines[3].starts_with("## "));
        assert_eq!(lines[4], "333");
    }

    #[test]
    fn record_job_ids_noop_on_empty_list() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("jobs_id.txt");
        record_job_ids(&path, &[]).unwrap();
        assert!(!path.exists());
    }
}
