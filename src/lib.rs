//! `smart-dispatch` — unfold, pack, submit and resume batches of commands
//! on PBS/Torque clusters.

pub mod cluster;
pub mod command_manager;
pub mod job_generator;
pub mod launcher;
pub mod lock;
pub mod paths;
pub mod pbs;
pub mod queue;
pub mod supervisor;
pub mod uid;
pub mod unfold;
pub mod worker;

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use cluster::{ClusterKind, CommandRunner, SystemCommandRunner};
use command_manager::CommandManager;
use job_generator::CommandResources;
use launcher::{Launcher, SchedulerLauncher};
use lock::{FsProber, ProcMountsProber};
use paths::BatchPaths;
use queue::{Queue, QueueOverrides};

/// Bundles the collaborators resolved once per process invocation — no
/// process-wide mutable state (spec.md §9's design note).
pub struct Context {
    pub config_dir: PathBuf,
    pub prober: Box<dyn FsProber>,
    pub runner: Box<dyn CommandRunner>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            config_dir: queue::default_config_dir(),
            prober: Box::new(ProcMountsProber),
            runner: Box::new(SystemCommandRunner),
        }
    }

    fn detect_cluster(&self) -> Option<ClusterKind> {
        cluster::detect(self.runner.as_ref())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a `launch` invocation needs once argument parsing has
/// unfolded the command line and resolved queue/resource overrides.
pub struct LaunchRequest {
    pub queue_name: String,
    pub commands: Vec<String>,
    pub resources: CommandResources,
    pub walltime: Option<String>,
    pub cores_per_node: Option<u32>,
    pub gpus_per_node: Option<u32>,
    pub modules: Vec<String>,
    pub cluster_override: Option<ClusterKind>,
    pub pool: Option<usize>,
    pub do_not_launch: bool,
    pub launcher_program: String,
    pub original_command_line: String,
    /// The raw, pre-unfold folded command line the user typed — used to
    /// derive the batch name (ground truth: `generate_name_from_command`
    /// is called on the joined argv before unfolding).
    pub folded_command_line: String,
}

/// Result of a successful `launch`: where the batch now lives and the job
/// ids the scheduler handed back.
pub struct LaunchOutcome {
    pub batch_uid: String,
    pub batch_root: PathBuf,
    pub job_ids: Vec<String>,
    pub script_paths: Vec<PathBuf>,
}

/// Create a fresh batch directory, seed its command queue, generate and
/// submit PBS scripts, then record the submission. Ground truth:
/// `original_source/scripts/smart_dispatch.py`'s top-level flow.
pub fn launch(ctx: &Context, request: LaunchRequest) -> io::Result<LaunchOutcome> {
    let now = Utc::now();
    let batch_uid = uid::batch_uid(&now.to_rfc3339(), &request.folded_command_line, 235);

    let paths = BatchPaths::new(&batch_uid)?;
    paths.ensure_created()?;
    log_command_line(&paths, &request.original_command_line)?;

    let overrides = QueueOverrides {
        walltime: request.walltime.clone(),
        cores_per_node: request.cores_per_node,
        gpus_per_node: request.gpus_per_node,
        modules: request.modules.clone(),
        cluster: request.cluster_override.or_else(|| ctx.detect_cluster()),
    };
    let queue = Queue::resolve(&request.queue_name, &ctx.config_dir, overrides)?;

    let cm = CommandManager::new(&paths.commands, ctx.prober.as_ref());
    cm.seed(&request.commands)?;

    let scripts = job_generator::generate(
        &queue,
        &request.commands,
        request.resources,
        &[],
        &[],
        &paths.root.to_string_lossy(),
    )?;
    let script_paths = job_generator::write_scripts(&scripts, &paths.commands)?;

    let job_ids = if request.do_not_launch {
        Vec::new()
    } else {
        let launcher = SchedulerLauncher::new(ctx.runner.as_ref(), &request.launcher_program);
        let ids = submit_pool(&launcher, &script_paths, request.pool.unwrap_or(request.commands.len()))?;
        launcher::record_job_ids(&paths.jobs_id, &ids)?;
        ids
    };

    Ok(LaunchOutcome {
        batch_uid,
        batch_root: paths.root,
        job_ids,
        script_paths,
    })
}

/// Submit each script once per worker in the pool. `pool` workers per
/// script is the parallelism knob named in spec.md's front-end contract;
/// the scheduler fans each submission out to an independent OS process
/// that races the others to drain the shared queue.
fn submit_pool(launcher: &dyn Launcher, scripts: &[PathBuf], pool: usize) -> io::Result<Vec<String>> {
    let mut ids = Vec::new();
    for script in scripts {
        for _ in 0..pool.max(1) {
            ids.push(launcher.submit(script)?);
        }
    }
    Ok(ids)
}

/// Options for resuming a previously-launched batch.
pub struct ResumeRequest {
    pub batch_root: PathBuf,
    pub only_pending: bool,
    pub expand_pool: Option<usize>,
    pub launcher_program: String,
    pub original_command_line: String,
}

/// Re-submit a batch's outstanding commands. Ground truth:
/// `original_source/scripts/smart_dispatch.py`'s resume branch.
pub fn resume(ctx: &Context, request: ResumeRequest) -> io::Result<LaunchOutcome> {
    let paths = BatchPaths::at(request.batch_root.clone())?;
    if !paths.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no batch found at {}", paths.root.display()),
        ));
    }
    log_command_line(&paths, &request.original_command_line)?;

    let cm = CommandManager::new(&paths.commands, ctx.prober.as_ref());
    if !request.only_pending {
        cm.reset_running()?;
    }

    let pending = cm.count_pending()?;
    if pending == 0 && request.expand_pool.is_none() {
        return Ok(LaunchOutcome {
            batch_uid: paths.root.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            batch_root: paths.root,
            job_ids: Vec::new(),
            script_paths: Vec::new(),
        });
    }

    let launcher = SchedulerLauncher::new(ctx.runner.as_ref(), &request.launcher_program);
    let existing_scripts: Vec<PathBuf> = std::fs::read_dir(&paths.commands)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.file_name().and_then(|n| n.to_str()).map(|n| n.starts_with("job_commands_")).unwrap_or(false))
        .collect();

    let pool = request.expand_pool.unwrap_or(1);
    let job_ids = submit_pool(&launcher, &existing_scripts, pool)?;
    launcher::record_job_ids(&paths.jobs_id, &job_ids)?;

    Ok(LaunchOutcome {
        batch_uid: paths.root.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        batch_root: paths.root,
        job_ids,
        script_paths: existing_scripts,
    })
}

fn log_command_line(paths: &BatchPaths, command_line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(&paths.command_line_log)?;
    writeln!(file, "[{}] {}", Utc::now().to_rfc3339(), command_line)
}

/// Entry point for the hidden `worker` subcommand, invoked once per PBS
/// job on the cluster.
pub fn run_worker(ctx: &Context, batch_root: &Path, assume_resumable: bool) -> io::Result<()> {
    let paths = BatchPaths::at(batch_root.to_path_buf())?;
    let cm = CommandManager::new(&paths.commands, ctx.prober.as_ref());
    worker::run(&paths, &cm, assume_resumable)
}
