//! Packs a list of concrete commands into a minimum number of validly
//! formed PBS scripts, subject to per-cluster rules and per-command
//! resource budgets. Ground truth: `original_source/smartdispatch/
//! job_generator.py`.

use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::cluster::ClusterKind;
use crate::pbs::Pbs;
use crate::queue::Queue;

/// Per-command resource ask: `r = (cores, gpus)` from spec.md §4.D.
#[derive(Debug, Clone, Copy)]
pub struct CommandResources {
    pub cores: u32,
    pub gpus: u32,
}

impl Default for CommandResources {
    fn default() -> Self {
        Self { cores: 1, gpus: 1 }
    }
}

/// Split `commands` into consecutive chunks of size `K = floor(cores_per_node
/// / r.cores)`, further capped by `floor(gpus_per_node / r.gpus)` when both
/// the queue and the command ask for GPUs (spec.md §4.D, invariant P5).
pub fn chunk_size(queue: &Queue, resources: CommandResources) -> usize {
    let mut k = (queue.cores_per_node / resources.cores.max(1)) as usize;
    if queue.gpus_per_node > 0 && resources.gpus > 0 {
        k = k.min((queue.gpus_per_node / resources.gpus) as usize);
    }
    k.max(1)
}

/// Build one generic PBS record per chunk, then apply the cluster-specific
/// post-processing function named by spec.md §9's tagged-union
/// re-architecture — a single match, no dynamic dispatch.
pub fn generate(
    queue: &Queue,
    commands: &[String],
    resources: CommandResources,
    prolog: &[String],
    epilog: &[String],
    job_log_base: &str,
) -> io::Result<Vec<Pbs>> {
    let k = chunk_size(queue, resources);

    let mut scripts = Vec::new();
    for chunk in commands.chunks(k) {
        let mut pbs = Pbs::new(&queue.name, &queue.walltime)?;

        pbs.add_option(
            "o",
            &format!("\"{job_log_base}/logs/job/\"$PBS_JOBID\".out\""),
        )?;
        pbs.add_option(
            "e",
            &format!("\"{job_log_base}/logs/job/\"$PBS_JOBID\".err\""),
        )?;

        let ppn = chunk.len() as u32 * resources.cores;
        let mut nodes = format!("1:ppn={ppn}");
        if queue.gpus_per_node > 0 {
            nodes.push_str(&format!(":gpus={}", chunk.len() as u32 * resources.gpus));
        }
        pbs.add_resource("nodes", &nodes)?;

        pbs.add_modules(&queue.modules);
        pbs.add_prolog(prolog);
        pbs.add_commands(chunk);
        pbs.add_epilog(epilog);

        apply_cluster_rules(queue, &mut pbs)?;
        scripts.push(pbs);
    }

    Ok(scripts)
}

fn apply_cluster_rules(queue: &Queue, pbs: &mut Pbs) -> io::Result<()> {
    match queue.cluster {
        ClusterKind::Generic => Ok(()),
        ClusterKind::Mammouth => {
            if queue.name.ends_with("@mp2") {
                force_ppn_one(pbs);
            }
            Ok(())
        }
        ClusterKind::Hades => {
            gpus_become_ppn(pbs);
            Ok(())
        }
        ClusterKind::Guillimin => account_from_env(pbs, "HOME_GROUP"),
        ClusterKind::Helios => {
            account_from_default_rap_file(pbs)?;
            strip_ppn(pbs);
            Ok(())
        }
    }
}

fn ppn_pattern() -> Regex {
    Regex::new(r"ppn=[0-9]+").unwrap()
}

/// Mammouth (`@mp2`): force `ppn=1` in the rendered `nodes=` string.
fn force_ppn_one(pbs: &mut Pbs) {
    if let Some(nodes) = pbs.resource("nodes") {
        let rewritten = ppn_pattern().replace(nodes, "ppn=1").into_owned();
        pbs.set_resource_raw("nodes", rewritten);
    }
}

/// Hades: the site uses `ppn` as the GPU count. Replace `:gpus=G` with
/// `ppn=G` and strip the original `ppn=`.
fn gpus_become_ppn(pbs: &mut Pbs) {
    let Some(nodes) = pbs.resource("nodes").map(|s| s.to_string()) else { return };
    let gpus_pattern = Regex::new(r"gpus=([0-9]+)").unwrap();
    let Some(caps) = gpus_pattern.captures(&nodes) else { return };
    let gpus = caps[1].to_string();

    let without_gpus = Regex::new(r":gpus=[0-9]+").unwrap().replace(&nodes, "").into_owned();
    let rewritten = ppn_pattern().replace(&without_gpus, format!("ppn={gpus}")).into_owned();
    pbs.set_resource_raw("nodes", rewritten);
}

/// Guillimin: require `HOME_GROUP`; its trailing path component becomes
/// `#PBS -A`.
fn account_from_env(pbs: &mut Pbs, env_var: &str) -> io::Result<()> {
    let value = std::env::var(env_var).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("undefined environment variable: ${env_var}. Please provide your account name!"),
        )
    })?;
    let account = Path::new(&value)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&value)
        .to_string();
    pbs.add_option("A", &account)
}

/// Helios: read `~/.default_rap` for the account string.
fn account_from_default_rap_file(pbs: &mut Pbs) -> io::Result<()> {
    let home = std::env::var("HOME").map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "HOME is not set; cannot locate ~/.default_rap")
    })?;
    let rap_path = PathBuf::from(home).join(".default_rap");
    let account = std::fs::read_to_string(&rap_path)
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("account name file {} does not exist. Please provide your account name!", rap_path.display()),
            )
        })?
        .trim()
        .to_string();
    pbs.add_option("A", &account)
}

/// Helios defaults to 2 cores per GPU and forbids an explicit `ppn=`.
fn strip_ppn(pbs: &mut Pbs) {
    if let Some(nodes) = pbs.resource("nodes") {
        let rewritten = Regex::new(r":ppn=[0-9]+").unwrap().replace(nodes, "").into_owned();
        pbs.set_resource_raw("nodes", rewritten);
    }
}

/// Write every generated script to `<dir>/job_commands_<i>.sh` and return
/// the paths written, in order.
pub fn write_scripts(scripts: &[Pbs], dir: &Path) -> io::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut paths = Vec::with_capacity(scripts.len());
    for (i, pbs) in scripts.iter().enumerate() {
        let path = dir.join(format!("job_commands_{i}.sh"));
        std::fs::write(&path, pbs.to_string())?;
        paths.push(path);
    }
    Ok(paths)
}
