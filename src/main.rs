use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use smart_dispatch::cluster::ClusterKind;
use smart_dispatch::job_generator::CommandResources;
use smart_dispatch::unfold;
use smart_dispatch::{launch, resume, run_worker, Context, LaunchRequest, ResumeRequest};

/// unfold, pack, submit and resume batches of commands on a PBS/Torque cluster
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unfold a command line, pack it into PBS scripts, and submit it
    Launch {
        /// Queue to submit to
        #[arg(short = 'q', long)]
        queue: String,

        /// Walltime override, e.g. 01:00:00:00
        #[arg(short = 't', long)]
        walltime: Option<String>,

        /// Cores-per-node override for an unrecognized queue
        #[arg(short = 'C', long = "coresPerNode")]
        cores_per_node: Option<u32>,

        /// GPUs-per-node override
        #[arg(short = 'G', long = "gpusPerNode")]
        gpus_per_node: Option<u32>,

        /// Cores requested per command
        #[arg(short = 'c', long = "coresPerCommand", default_value_t = 1)]
        cores_per_command: u32,

        /// GPUs requested per command
        #[arg(short = 'g', long = "gpusPerCommand", default_value_t = 0)]
        gpus_per_command: u32,

        /// Modules to load, repeatable
        #[arg(short = 'l', long = "modules")]
        modules: Vec<String>,

        /// Number of worker processes per generated script
        #[arg(short = 'p', long)]
        pool: Option<usize>,

        /// Force a cluster's post-processing rules instead of auto-detecting
        #[arg(long)]
        cluster: Option<String>,

        /// Create the PBS scripts without submitting them
        #[arg(short = 'x', long = "doNotLaunch")]
        do_not_launch: bool,

        /// Scheduler binary to invoke: qsub or msub
        #[arg(short = 'L', long = "launcher", default_value = "qsub")]
        launcher: String,

        /// Read commands from a file instead of the trailing arguments, one
        /// unexpanded command per line
        #[arg(short = 'f', long = "commandsFile")]
        commands_file: Option<PathBuf>,

        /// Folded command, e.g. `python train.py --lr [0.1 0.01]`
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Re-submit a previously launched batch's outstanding commands
    Resume {
        /// Batch directory, as printed by `launch`
        batch_path: PathBuf,

        /// Skip moving running commands back onto the pending queue
        #[arg(long = "onlyPending")]
        only_pending: bool,

        /// Submit additional worker processes without touching queue state
        #[arg(long = "expandPool", num_args = 0..=1, default_missing_value = "1")]
        expand_pool: Option<usize>,

        /// Scheduler binary to invoke: qsub or msub
        #[arg(short = 'L', long = "launcher", default_value = "qsub")]
        launcher: String,
    },

    /// Internal helper spawned once per PBS job — users never call this directly
    #[command(hide = true)]
    Worker {
        batch_path: PathBuf,

        #[arg(long = "assume-resumable")]
        assume_resumable: bool,
    },
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("Error: {err}");
        std::process::exit(exit_code_for(&err));
    }
}

fn exit_code_for(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => 2,
        _ => 1,
    }
}

fn try_main() -> io::Result<()> {
    let cli = Cli::parse();
    let ctx = Context::new();

    match cli.command {
        Commands::Launch {
            queue,
            walltime,
            cores_per_node,
            gpus_per_node,
            cores_per_command,
            gpus_per_command,
            modules,
            pool,
            cluster,
            do_not_launch,
            launcher,
            commands_file,
            command,
        } => {
            let original_command_line = std::env::args().collect::<Vec<_>>().join(" ");

            let folded = if let Some(path) = commands_file {
                std::fs::read_to_string(path)?
            } else {
                command.join(" ")
            };
            if folded.trim().is_empty() {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "no command supplied"));
            }

            let mut commands = Vec::new();
            for line in folded.lines().filter(|l| !l.trim().is_empty()) {
                commands.extend(unfold::unfold_command(line));
            }
            let commands: Vec<String> = commands.iter().map(|c| unfold::substitute_uid_tag(c)).collect();

            let cluster_override = cluster
                .map(|name| {
                    ClusterKind::from_config_name(&name).ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidInput, format!("unknown cluster: {name}"))
                    })
                })
                .transpose()?;

            let request = LaunchRequest {
                queue_name: queue,
                commands,
                resources: CommandResources { cores: cores_per_command.max(1), gpus: gpus_per_command },
                walltime,
                cores_per_node,
                gpus_per_node,
                modules,
                cluster_override,
                pool,
                do_not_launch,
                launcher_program: launcher,
                original_command_line,
                folded_command_line: folded,
            };

            let outcome = launch(&ctx, request)?;
            if do_not_launch {
                println!("Batch {} created (not launched): {}", outcome.batch_uid, outcome.batch_root.display());
                for script in &outcome.script_paths {
                    println!("  {}", script.display());
                }
            } else {
                println!("Batch {} submitted: {}", outcome.batch_uid, outcome.batch_root.display());
                for id in &outcome.job_ids {
                    println!("  job {id}");
                }
            }
            Ok(())
        }

        Commands::Resume { batch_path, only_pending, expand_pool, launcher } => {
            let original_command_line = std::env::args().collect::<Vec<_>>().join(" ");
            let request = ResumeRequest {
                batch_root: batch_path,
                only_pending,
                expand_pool,
                launcher_program: launcher,
                original_command_line,
            };
            let outcome = resume(&ctx, request)?;
            println!("Batch {} resumed: {} job(s) submitted", outcome.batch_uid, outcome.job_ids.len());
            Ok(())
        }

        Commands::Worker { batch_path, assume_resumable } => run_worker(&ctx, &batch_path, assume_resumable),
    }
}
