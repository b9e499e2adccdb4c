//! A PBS script: an ordered record of options, resources, modules,
//! prolog/epilog, and commands, rendered as a `#PBS`-annotated bash
//! script. Ground truth: `original_source/smartdispatch/pbs.py`.

use std::fmt;
use std::io;
use std::sync::OnceLock;

use regex::Regex;

fn walltime_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+:){1,4}\d+$").unwrap())
}

fn nodes_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]+(:ppn=\d+)?(:gpus=\d+)?(:[a-zA-Z0-9]+)*$").unwrap())
}

fn pmem_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+(b|kb|mb|gb|tb)?$").unwrap())
}

fn invalid(resource: &str, value: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unknown format for PBS resource `{resource}`: {value}"),
    )
}

/// A single PBS script: `#!/bin/bash` header, `#PBS` option/resource
/// directives in insertion order, module loads, prolog, commands, epilog.
#[derive(Debug, Clone)]
pub struct Pbs {
    options: Vec<(String, String)>,
    resources: Vec<(String, String)>,
    modules: Vec<String>,
    prolog: Vec<String>,
    commands: Vec<String>,
    epilog: Vec<String>,
}

impl Pbs {
    pub fn new(queue_name: &str, walltime: &str) -> io::Result<Self> {
        if queue_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "queue name must be provided"));
        }

        let mut pbs = Self {
            options: Vec::new(),
            resources: Vec::new(),
            modules: Vec::new(),
            prolog: Vec::new(),
            commands: Vec::new(),
            epilog: Vec::new(),
        };
        pbs.add_option("q", queue_name)?;
        // Declares that all environment variables in the qsub command's
        // environment are to be exported to the batch job.
        pbs.add_option("V", "")?;
        pbs.add_resource("walltime", walltime)?;
        Ok(pbs)
    }

    pub fn add_option(&mut self, name: &str, value: &str) -> io::Result<()> {
        if name.trim_start_matches('-') == "N" && value.len() > 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "maximum number of characters for the job name is 64",
            ));
        }
        set_ordered(&mut self.options, name, value);
        Ok(())
    }

    pub fn add_resource(&mut self, name: &str, value: &str) -> io::Result<()> {
        match name {
            "nodes" if !nodes_regex().is_match(value) => return Err(invalid("nodes", value)),
            "pmem" if !pmem_regex().is_match(value) => return Err(invalid("pmem", value)),
            "walltime" if !walltime_regex().is_match(value) => return Err(invalid("walltime", value)),
            _ => {}
        }
        set_ordered(&mut self.resources, name, value);
        Ok(())
    }

    /// Raw accessor used by cluster-specific post-processing, which
    /// rewrites an already-validated `nodes` resource string in place
    /// (e.g. Mammouth forcing `ppn=1`, Hades renaming `gpus=` to `ppn=`).
    pub fn resource(&self, name: &str) -> Option<&str> {
        self.resources.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    pub fn set_resource_raw(&mut self, name: &str, value: String) {
        set_ordered(&mut self.resources, name, &value);
    }

    pub fn remove_resource(&mut self, name: &str) {
        self.resources.retain(|(n, _)| n != name);
    }

    pub fn add_modules(&mut self, modules: &[String]) {
        self.modules.extend(modules.iter().cloned());
    }

    pub fn add_prolog(&mut self, lines: &[String]) {
        self.prolog.extend(lines.iter().cloned());
    }

    pub fn add_commands(&mut self, commands: &[String]) {
        self.commands.extend(commands.iter().cloned());
    }

    pub fn add_epilog(&mut self, lines: &[String]) {
        self.epilog.extend(lines.iter().cloned());
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

fn set_ordered(entries: &mut Vec<(String, String)>, name: &str, value: &str) {
    if let Some(entry) = entries.iter_mut().find(|(n, _)| n == name) {
        entry.1 = value.to_string();
    } else {
        entries.push((name.to_string(), value.to_string()));
    }
}

impl fmt::Display for Pbs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#!/bin/bash")?;

        for (name, value) in &self.options {
            if value.is_empty() {
                writeln!(f, "#PBS -{name}")?;
            } else {
                writeln!(f, "#PBS -{name} {value}")?;
            }
        }

        for (name, value) in &self.resources {
            writeln!(f, "#PBS -l {name}={value}")?;
        }

        writeln!(f, "\n# Modules #")?;
        for module in &self.modules {
            writeln!(f, "module load {module}")?;
        }

        writeln!(f, "\n# Prolog #")?;
        for line in &self.prolog {
            writeln!(f, "{line}")?;
        }

        writeln!(f, "\n# Commands #")?;
        for command in &self.commands {
            writeln!(f, "{command}")?;
        }

        writeln!(f, "\n# Epilog #")?;
        for line in &self.epilog {
            writeln!(f, "{line}")?;
        }

        Ok(())
    }
}
