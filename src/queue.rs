//! Queue descriptor: the resources a cluster's queue offers, filled in
//! from a per-cluster JSON catalogue when the caller leaves fields unset.
//! Ground truth: `original_source/smartdispatch/queue.py`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cluster::ClusterKind;

#[derive(Debug, Clone, Deserialize)]
pub struct QueueInfo {
    pub max_walltime: String,
    pub cores: u32,
    #[serde(default)]
    pub gpus: u32,
    pub ram: u64,
    #[serde(default)]
    pub modules: Vec<String>,
}

/// `{queue_name: QueueInfo}`, as shipped in one JSON file per cluster.
pub type QueueCatalogue = HashMap<String, QueueInfo>;

/// Load every cluster's catalogue from `config_dir` (one `<cluster>.json`
/// file per cluster) and fold them into a single `queue name -> (cluster,
/// info)` map, mirroring `cluster.py::get_known_queues`.
pub fn load_known_queues(config_dir: &Path) -> io::Result<HashMap<String, (String, QueueInfo)>> {
    let mut known = HashMap::new();

    let entries = match std::fs::read_dir(config_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(known),
        Err(err) => return Err(err),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let cluster_name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("").to_string();
        let contents = std::fs::read_to_string(&path)?;
        let catalogue: QueueCatalogue = serde_json::from_str(&contents).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("malformed cluster config {}: {e}", path.display()))
        })?;
        for (queue_name, info) in catalogue {
            known.insert(queue_name, (cluster_name.clone(), info));
        }
    }

    Ok(known)
}

/// Resolved resources for one queue on one cluster (spec.md's Queue
/// descriptor): `(name, cluster, walltime, cores_per_node, gpus_per_node,
/// mem_per_node, modules[])`.
#[derive(Debug, Clone)]
pub struct Queue {
    pub name: String,
    pub cluster: ClusterKind,
    pub walltime: String,
    pub cores_per_node: u32,
    pub gpus_per_node: u32,
    pub mem_per_node: u64,
    pub modules: Vec<String>,
}

#[derive(Default)]
pub struct QueueOverrides {
    pub walltime: Option<String>,
    pub cores_per_node: Option<u32>,
    pub gpus_per_node: Option<u32>,
    pub modules: Vec<String>,
    pub cluster: Option<ClusterKind>,
}

impl Queue {
    /// Resolve a queue descriptor from the known-queue catalogue plus any
    /// caller overrides. Unknown queues are accepted only if the caller
    /// supplies `cores_per_node` and `walltime` (spec.md §6).
    pub fn resolve(
        name: &str,
        config_dir: &Path,
        overrides: QueueOverrides,
    ) -> io::Result<Self> {
        let known = load_known_queues(config_dir)?;

        let (cluster_name, info) = known.get(name).cloned().map(|(c, i)| (Some(c), Some(i))).unwrap_or((None, None));

        let walltime = overrides
            .walltime
            .or_else(|| info.as_ref().map(|i| i.max_walltime.clone()))
            .ok_or_else(|| config_error("walltime must be provided for an unknown queue"))?;

        let cores_per_node = overrides
            .cores_per_node
            .or_else(|| info.as_ref().map(|i| i.cores))
            .ok_or_else(|| config_error("--coresPerNode must be provided for an unknown queue"))?;
        if cores_per_node == 0 {
            return Err(config_error("queues must have at least one core"));
        }

        let gpus_per_node = overrides.gpus_per_node.or_else(|| info.as_ref().map(|i| i.gpus)).unwrap_or(0);

        let mem_per_node = info.as_ref().map(|i| i.ram).unwrap_or(u64::MAX);

        let mut modules = info.as_ref().map(|i| i.modules.clone()).unwrap_or_default();
        modules.extend(overrides.modules);

        let cluster = overrides
            .cluster
            .or_else(|| cluster_name.as_deref().and_then(ClusterKind::from_config_name))
            .unwrap_or(ClusterKind::Generic);

        Ok(Self {
            name: name.to_string(),
            cluster,
            walltime,
            cores_per_node,
            gpus_per_node,
            mem_per_node,
            modules,
        })
    }
}

fn config_error(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}

/// Default location of the read-only cluster config directory, shipped
/// alongside the crate. Overridable via `SMART_DISPATCH_CONFIG_DIR` so
/// tests can point at a fixture directory.
pub fn default_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SMART_DISPATCH_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &Path, cluster: &str, body: &str) {
        std::fs::write(dir.join(format!("{cluster}.json")), body).unwrap();
    }

    #[test]
    fn resolves_known_queue_fields_from_catalogue() {
        let tmp = TempDir::new().unwrap();
        write_config(
            tmp.path(),
            "mammouth",
            r#"{"qwork@mp2": {"max_walltime": "5:00:00:00", "cores": 24, "gpus": 2, "ram": 1000000, "modules": ["python/2.7"]}}"#,
        );

        let queue = Queue::resolve("qwork@mp2", tmp.path(), QueueOverrides::default()).unwrap();
        assert_eq!(queue.walltime, "5:00:00:00");
        assert_eq!(queue.cores_per_node, 24);
        assert_eq!(queue.gpus_per_node, 2);
        assert_eq!(queue.cluster, ClusterKind::Mammouth);
        assert_eq!(queue.modules, vec!["python/2.7".to_string()]);
    }

    #[test]
    fn unknown_queue_requires_overrides() {
        let tmp = TempDir::new().unwrap();
        let err = Queue::resolve("mystery", tmp.path(), QueueOverrides::default()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn unknown_queue_accepted_with_overrides() {
        let tmp = TempDir::new().unwrap();
        let overrides = QueueOverrides {
            walltime: Some("01:00:00:00".into()),
            cores_per_node: Some(8),
            ..Default::default()
        };
        let queue = Queue::resolve("custom", tmp.path(), overrides).unwrap();
        assert_eq!(queue.cores_per_node, 8);
        assert_eq!(queue.cluster, ClusterKind::Generic);
    }
}
