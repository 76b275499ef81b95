use std::{env, fs, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use shm::PollConfig;

use crate::{Result, WorkerErr};

const DEFAULT_ENDPOINT: &str = "127.0.0.1:50000";

/// Startup parameters of one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// The slot this worker drives.
    pub worker_index: usize,
    /// Expected cluster size, checked against the offer when set.
    pub cluster_size: Option<usize>,
    /// The client's handshake endpoint.
    pub endpoint: String,
    pub connect_retries: u32,
    pub retry_interval_ms: u64,
    pub poll: PollConfig,
    /// Publish solve timings to the profiling region.
    pub profiling: bool,
    /// Publish the solver's internal solution, if it exposes one.
    pub debug_solution: bool,
    /// Controller joint order of the bundled hold solver.
    pub joint_names: Option<Vec<String>>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_index: 0,
            cluster_size: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_retries: 50,
            retry_interval_ms: 100,
            poll: PollConfig::default(),
            profiling: true,
            debug_solution: false,
            joint_names: None,
        }
    }
}

impl WorkerConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Loads the configuration from a JSON file, missing fields take their defaults.
    ///
    /// # Errors
    /// `Config` if the file cannot be read or parsed.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| WorkerErr::Config(format!("cannot read '{}': {e}", path.display())))?;
        serde_json::from_str(&content).map_err(|e| WorkerErr::Config(format!("invalid JSON: {e}")))
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// Recognized keys: `WORKER_INDEX`, `CLUSTER_SIZE`, `ENDPOINT` (or `HOST` and
    /// `PORT`), `CONNECT_RETRIES`, `RETRY_INTERVAL_MS`, `POLL_SPINS`,
    /// `POLL_INITIAL_US`, `POLL_MAX_US`, `PROFILING`, `DEBUG_SOLUTION` and
    /// `JOINT_NAMES` (comma separated).
    ///
    /// # Errors
    /// `Config` naming the first variable that does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(idx) = parse(&lookup, "WORKER_INDEX")? {
            cfg.worker_index = idx;
        }
        cfg.cluster_size = parse(&lookup, "CLUSTER_SIZE")?;

        if let Some(endpoint) = lookup("ENDPOINT") {
            cfg.endpoint = endpoint;
        } else if let Some(port) = lookup("PORT") {
            let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
            cfg.endpoint = format!("{host}:{port}");
        }

        if let Some(retries) = parse(&lookup, "CONNECT_RETRIES")? {
            cfg.connect_retries = retries;
        }
        if let Some(ms) = parse(&lookup, "RETRY_INTERVAL_MS")? {
            cfg.retry_interval_ms = ms;
        }
        if let Some(spins) = parse(&lookup, "POLL_SPINS")? {
            cfg.poll.spins = spins;
        }
        if let Some(us) = parse(&lookup, "POLL_INITIAL_US")? {
            cfg.poll.initial_us = us;
        }
        if let Some(us) = parse(&lookup, "POLL_MAX_US")? {
            cfg.poll.max_us = us;
        }
        if let Some(on) = parse(&lookup, "PROFILING")? {
            cfg.profiling = on;
        }
        if let Some(on) = parse(&lookup, "DEBUG_SOLUTION")? {
            cfg.debug_solution = on;
        }

        cfg.joint_names = lookup("JOINT_NAMES").map(|names| {
            names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect()
        });

        Ok(cfg)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| WorkerErr::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_overrides_defaults() {
        let cfg = WorkerConfig::from_lookup(lookup(&[
            ("WORKER_INDEX", "3"),
            ("CLUSTER_SIZE", "4"),
            ("HOST", "10.0.0.2"),
            ("PORT", "6000"),
            ("POLL_MAX_US", "250"),
            ("PROFILING", "false"),
            ("JOINT_NAMES", "hip, knee,,ankle"),
        ]))
        .unwrap();

        assert_eq!(cfg.worker_index, 3);
        assert_eq!(cfg.cluster_size, Some(4));
        assert_eq!(cfg.endpoint, "10.0.0.2:6000");
        assert_eq!(cfg.poll.max_us, 250);
        assert_eq!(cfg.poll.spins, PollConfig::default().spins);
        assert!(!cfg.profiling);
        assert_eq!(
            cfg.joint_names,
            Some(vec!["hip".into(), "knee".into(), "ankle".into()])
        );
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = WorkerConfig::from_lookup(lookup(&[("WORKER_INDEX", "two")])).unwrap_err();
        assert!(err.to_string().contains("WORKER_INDEX"));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");
        fs::write(&path, r#"{ "worker_index": 1, "poll": { "spins": 0 } }"#).unwrap();

        let cfg = WorkerConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.worker_index, 1);
        assert_eq!(cfg.poll.spins, 0);
        assert_eq!(cfg.poll.max_us, PollConfig::default().max_us);
        assert_eq!(cfg.endpoint, DEFAULT_ENDPOINT);
    }
}
