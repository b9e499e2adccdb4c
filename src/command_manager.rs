//! Persistent, host-safe multi-queue state for the lifecycle of every
//! command (spec.md §4.B). Four flat text files under `<batch>/commands/`
//! — `commands.txt` (pending), `running_commands.txt`, `finished_commands
//! .txt`, `failed_commands.txt` — are the entire state; a command's
//! membership in exactly one of them *is* its state.
//!
//! Ground truth for the move primitive:
//! `original_source/smartdispatch/command_manager.py`.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::lock::{self, FsProber, LockStrategy};

pub struct CommandManager {
    pending: PathBuf,
    running: PathBuf,
    finished: PathBuf,
    failed: PathBuf,
    strategy: LockStrategy,
}

impl CommandManager {
    /// `commands_dir` is the batch's `commands/` directory; it must already
    /// exist. The four queue files are resolved relative to it and need
    /// not exist yet — `running_commands.txt` in particular is created
    /// lazily on first `claim()`.
    pub fn new(commands_dir: &Path, prober: &dyn FsProber) -> Self {
        let strategy = lock::strategy_for(commands_dir, prober);
        Self {
            pending: commands_dir.join("commands.txt"),
            running: commands_dir.join("running_commands.txt"),
            finished: commands_dir.join("finished_commands.txt"),
            failed: commands_dir.join("failed_commands.txt"),
            strategy,
        }
    }

    /// Append `commands` to the pending queue under lock. Never reorders
    /// existing entries. The caller owns de-duplication; duplicate lines
    /// are permitted and treated as distinct tokens.
    pub fn seed(&self, commands: &[String]) -> io::Result<()> {
        let _guard = lock::with_lock(&self.pending, self.strategy)?;
        append_lines(&self.pending, commands)
    }

    /// Atomically pop the first line of pending and append it to running.
    /// Returns `None` if pending is empty.
    pub fn claim(&self) -> io::Result<Option<String>> {
        let pending_guard = lock::with_lock(&self.pending, self.strategy)?;
        let mut lines = read_lines(&self.pending)?;
        if lines.is_empty() {
            return Ok(None);
        }
        let command = lines.remove(0);
        write_lines(&self.pending, &lines)?;
        drop(pending_guard);

        let running_guard = lock::with_lock(&self.running, self.strategy)?;
        append_lines(&self.running, std::slice::from_ref(&command))?;
        drop(running_guard);

        Ok(Some(command))
    }

    /// Remove the first occurrence of `command` from running; append it to
    /// finished if `exit_code == 0`, otherwise to failed.
    pub fn complete(&self, command: &str, exit_code: i32) -> io::Result<()> {
        let dest = if exit_code == 0 { &self.finished } else { &self.failed };
        self.move_line(&self.running, dest, command)
    }

    /// Remove `command` from running and append it back to pending. Used
    /// by a worker being terminated with a still-successful child.
    pub fn requeue(&self, command: &str) -> io::Result<()> {
        self.move_line(&self.running, &self.pending, command)
    }

    /// Prepend every line of running back to the head of pending, then
    /// truncate running. Used by resume.
    pub fn reset_running(&self) -> io::Result<()> {
        // Locks taken in the fixed global order pending < running to
        // preclude deadlock with any concurrent move.
        let pending_guard = lock::with_lock(&self.pending, self.strategy)?;
        let running_guard = lock::with_lock(&self.running, self.strategy)?;

        let running_lines = read_lines(&self.running)?;
        if !running_lines.is_empty() {
            let mut pending_lines = read_lines(&self.pending)?;
            let mut combined = running_lines;
            combined.append(&mut pending_lines);
            write_lines(&self.pending, &combined)?;
        }
        write_lines(&self.running, &[])?;

        drop(running_guard);
        drop(pending_guard);
        Ok(())
    }

    pub fn count_pending(&self) -> io::Result<usize> {
        let _guard = lock::with_lock(&self.pending, self.strategy)?;
        Ok(read_lines(&self.pending)?.len())
    }

    pub fn list_failed(&self) -> io::Result<Vec<String>> {
        let _guard = lock::with_lock(&self.failed, self.strategy)?;
        read_lines(&self.failed)
    }

    pub fn count_running(&self) -> io::Result<usize> {
        let _guard = lock::with_lock(&self.running, self.strategy)?;
        Ok(read_lines(&self.running)?.len())
    }

    pub fn count_finished(&self) -> io::Result<usize> {
        let _guard = lock::with_lock(&self.finished, self.strategy)?;
        Ok(read_lines(&self.finished)?.len())
    }

    /// Move the first occurrence of `line` from `src` to `dst`. Locks are
    /// always taken in the fixed global order pending < running < finished
    /// < failed to preclude deadlock (spec.md §4.B).
    fn move_line(&self, src: &Path, dst: &Path, line: &str) -> io::Result<()> {
        let order = |p: &Path| -> u8 {
            if p == self.pending { 0 }
            else if p == self.running { 1 }
            else if p == self.finished { 2 }
            else { 3 }
        };

        let (first, second) = if order(src) <= order(dst) { (src, dst) } else { (dst, src) };
        let first_guard = lock::with_lock(first, self.strategy)?;
        let second_guard = if second == first { None } else { Some(lock::with_lock(second, self.strategy)?) };

        let mut src_lines = read_lines(src)?;
        let position = src_lines.iter().position(|l| l == line);
        if let Some(idx) = position {
            src_lines.remove(idx);
            write_lines(src, &src_lines)?;
            append_lines(dst, std::slice::from_ref(&line.to_string()))?;
        }

        drop(second_guard);
        drop(first_guard);
        Ok(())
    }
}

fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.lines().map(|l| l.to_string()).collect()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

fn write_lines(path: &Path, lines: &[String]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut contents = String::new();
    for line in lines {
        contents.push_str(line);
        contents.push('\n');
    }
    fs::write(path, contents)
}

fn append_lines(path: &Path, lines: &[String]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for line in lines {
        writeln!(file, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::ProcMountsProber;
    use tempfile::TempDir;

    fn manager(dir: &Path) -> CommandManager {
        CommandManager::new(dir, &ProcMountsProber)
    }

    #[test]
    fn seed_then_claim_round_trips_in_order() {
        let tmp = TempDir::new().unwrap();
        let cm = manager(tmp.path());
        cm.seed(&["a".into(), "b".into(), "c".into()]).unwrap();

        assert_eq!(cm.claim().unwrap(), Some("a".into()));
        assert_eq!(cm.claim().unwrap(), Some("b".into()));
        assert_eq!(cm.count_pending().unwrap(), 1);
        assert_eq!(cm.count_running().unwrap(), 2);
    }

    #[test]
    fn claim_on_empty_pending_returns_none() {
        let tmp = TempDir::new().unwrap();
        let cm = manager(tmp.path());
        assert_eq!(cm.claim().unwrap(), None);
    }

    #[test]
    fn complete_success_moves_to_finished() {
        let tmp = TempDir::new().unwrap();
        let cm = manager(tmp.path());
        cm.seed(&["a".into()]).unwrap();
        let cmd = cm.claim().unwrap().unwrap();
        cm.complete(&cmd, 0).unwrap();

        assert_eq!(cm.count_running().unwrap(), 0);
        assert_eq!(cm.count_finished().unwrap(), 1);
        assert!(cm.list_failed().unwrap().is_empty());
    }

    #[test]
    fn complete_failure_moves_to_failed() {
        let tmp = TempDir::new().unwrap();
        let cm = manager(tmp.path());
        cm.seed(&["a".into()]).unwrap();
        let cmd = cm.claim().unwrap().unwrap();
        cm.complete(&cmd, 1).unwrap();

        assert_eq!(cm.list_failed().unwrap(), vec!["a".to_string()]);
        assert_eq!(cm.count_finished().unwrap(), 0);
    }

    #[test]
    fn requeue_puts_command_back_at_tail_of_pending() {
        let tmp = TempDir::new().unwrap();
        let cm = manager(tmp.path());
        cm.seed(&["a".into(), "b".into()]).unwrap();
        let cmd = cm.claim().unwrap().unwrap();
        cm.requeue(&cmd).unwrap();

        assert_eq!(cm.count_running().unwrap(), 0);
        assert_eq!(cm.claim().unwrap(), Some("b".into()));
        assert_eq!(cm.claim().unwrap(), Some("a".into()));
    }

    #[test]
    fn reset_running_empties_running_and_restores_order() {
        let tmp = TempDir::new().unwrap();
        let cm = manager(tmp.path());
        cm.seed(&["a".into(), "b".into(), "c".into()]).unwrap();
        cm.claim().unwrap(); // a -> running
        cm.claim().unwrap(); // b -> running

        cm.reset_running().unwrap();

        assert_eq!(cm.count_running().unwrap(), 0);
        // running commands are placed ahead of still-pending commands.
        assert_eq!(cm.claim().unwrap(), Some("a".into()));
        assert_eq!(cm.claim().unwrap(), Some("b".into()));
        assert_eq!(cm.claim().unwrap(), Some("c".into()));
    }

    #[test]
    fn duplicate_commands_are_distinct_tokens() {
        let tmp = TempDir::new().unwrap();
        let cm = manager(tmp.path());
        cm.seed(&["dup".into(), "dup".into()]).unwrap();

        let first = cm.claim().unwrap().unwrap();
        cm.complete(&first, 0).unwrap();
        assert_eq!(cm.count_pending().unwrap(), 1);
        assert_eq!(cm.count_finished().unwrap(), 1);

        let second = cm.claim().unwrap().unwrap();
        cm.complete(&second, 0).unwrap();
        assert_eq!(cm.count_finished().unwrap(), 2);
    }

    #[test]
    fn full_round_trip_leaves_all_commands_finished() {
        let tmp = TempDir::new().unwrap();
        let cm = manager(tmp.path());
        let xs: Vec<String> = (0..5).map(|i| format!("cmd{i}")).collect();
        cm.seed(&xs).unwrap();

        while let Some(cmd) = cm.claim().unwrap() {
            cm.complete(&cmd, 0).unwrap();
        }

        assert_eq!(cm.count_finished().unwrap(), xs.len());
        assert_eq!(cm.count_pending().unwrap(), 0);
        assert_eq!(cm.count_running().unwrap(), 0);
    }
}
