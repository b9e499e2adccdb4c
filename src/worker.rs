//! The worker loop (spec.md §4.E): claim a command, run it, record the
//! result, repeat until the pending queue is drained. Ground truth:
//! `original_source/smartdispatch/workers/base_worker.py`.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::process::{Command, Stdio};

use chrono::Utc;
use gethostname::gethostname;

use crate::command_manager::CommandManager;
use crate::paths::BatchPaths;
use crate::supervisor::Supervisor;
use crate::uid;

/// Run the worker loop against `paths`/`cm` until the pending queue is
/// empty, or — if `assume_resumable` — until a termination signal arrives
/// mid-command. Returns once there is nothing left to claim or the worker
/// has cleanly handed an in-flight command back to the queue.
pub fn run(paths: &BatchPaths, cm: &CommandManager, assume_resumable: bool) -> io::Result<()> {
    let supervisor = Supervisor::install(assume_resumable);
    let hostname = gethostname().to_string_lossy().into_owned();
    let job_id = std::env::var("PBS_JOBID").unwrap_or_else(|_| "unknown".to_string());

    loop {
        let command = match cm.claim()? {
            Some(cmd) => cmd,
            None => return Ok(()),
        };

        let command_uid = uid::command_uid(&command);
        let out_path = paths.logs.join(format!("{command_uid}.out"));
        let err_path = paths.logs.join(format!("{command_uid}.err"));

        let resumed = out_path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        let mut out_file = OpenOptions::new().create(true).append(true).open(&out_path)?;
        let mut err_file = OpenOptions::new().create(true).append(true).open(&err_path)?;

        write_banner(&mut out_file, &command, &job_id, &hostname, resumed)?;
        write_banner(&mut err_file, &command, &job_id, &hostname, resumed)?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdout(Stdio::from(out_file.try_clone()?))
            .stderr(Stdio::from(err_file.try_clone()?))
            .spawn()?;

        let (status, cancelled) = supervisor.wait_for(&mut child)?;

        if cancelled {
            if status.success() {
                cm.complete(&command, 0)?;
            } else {
                cm.requeue(&command)?;
            }
            return Ok(());
        }

        let exit_code = status.code().unwrap_or(1);
        cm.complete(&command, exit_code)?;
    }
}

fn write_banner(
    stream: &mut impl Write,
    command: &str,
    job_id: &str,
    hostname: &str,
    resumed: bool,
) -> io::Result<()> {
    let timestamp = Utc::now().to_rfc3339();
    let verb = if resumed { "Resumed on" } else { "Started on" };
    writeln!(
        stream,
        "## SMART-DISPATCH - {verb}: {timestamp} - In job: {job_id} - On nodes: {hostname} ##"
    )?;
    writeln!(stream, "## SMART-DISPATCH - Command: {command}")?;
    Ok(())
}
