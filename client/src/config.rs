use std::{env, fmt::Display, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

use comms::specs::GeometryProposal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use shm::PollConfig;

use crate::{ClientErr, Result};

/// Parameters of the orchestrating process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Handshake endpoint, port `0` picks a free one.
    pub bind_addr: String,
    /// Prefix of every region of the session.
    pub namespace: String,
    pub shm_dir: PathBuf,
    pub handshake_timeout_ms: u64,
    pub poll: PollConfig,
    /// Watchdog on the tick barrier, disabled if `None`.
    pub barrier_timeout_ms: Option<u64>,
    pub control_dt: f64,
    pub cluster_dt: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:50000".to_string(),
            namespace: "cluster".to_string(),
            shm_dir: PathBuf::from("/dev/shm"),
            handshake_timeout_ms: 30_000,
            poll: PollConfig::default(),
            barrier_timeout_ms: None,
            control_dt: 0.01,
            cluster_dt: 0.03,
        }
    }
}

/// A client configuration plus the geometry it offers, as read by the `client` binary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionFile {
    #[serde(default)]
    pub client: ClientConfig,
    pub geometry: GeometryProposal,
}

impl SessionFile {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path.as_ref())
    }
}

impl ClientConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout_ms.map(Duration::from_millis)
    }

    /// Loads the configuration from a JSON file, missing fields take their defaults.
    ///
    /// # Errors
    /// `Config` if the file cannot be read or parsed.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path.as_ref())
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// Recognized keys: `BIND_ADDR` (or `HOST` and `PORT`), `NAMESPACE`,
    /// `SHM_DIR`, `HANDSHAKE_TIMEOUT_MS`, `BARRIER_TIMEOUT_MS`, `CONTROL_DT`,
    /// `CLUSTER_DT`, `POLL_SPINS`, `POLL_INITIAL_US` and `POLL_MAX_US`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(addr) = lookup("BIND_ADDR") {
            cfg.bind_addr = addr;
        } else if let Some(port) = lookup("PORT") {
            let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
            cfg.bind_addr = format!("{host}:{port}");
        }
        if let Some(ns) = lookup("NAMESPACE") {
            cfg.namespace = ns;
        }
        if let Some(dir) = lookup("SHM_DIR") {
            cfg.shm_dir = PathBuf::from(dir);
        }
        if let Some(ms) = parse(&lookup, "HANDSHAKE_TIMEOUT_MS")? {
            cfg.handshake_timeout_ms = ms;
        }
        cfg.barrier_timeout_ms = parse(&lookup, "BARRIER_TIMEOUT_MS")?;
        if let Some(dt) = parse(&lookup, "CONTROL_DT")? {
            cfg.control_dt = dt;
        }
        if let Some(dt) = parse(&lookup, "CLUSTER_DT")? {
            cfg.cluster_dt = dt;
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

        Ok(cfg)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| ClientErr::Config(format!("cannot read '{}': {e}", path.display())))?;
    serde_json::from_str(&content).map_err(|e| ClientErr::Config(format!("invalid JSON: {e}")))
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| ClientErr::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_defaults() {
        let vars = [("PORT", "7000"), ("BARRIER_TIMEOUT_MS", "250"), ("CLUSTER_DT", "0.05")];
        let cfg = ClientConfig::from_lookup(|key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap();

        assert_eq!(cfg.bind_addr, "127.0.0.1:7000");
        assert_eq!(cfg.barrier_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.cluster_dt, 0.05);
        assert_eq!(cfg.shm_dir, PathBuf::from("/dev/shm"));
    }

    #[test]
    fn session_file_carries_the_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(
            &path,
            r#"{
                "client": { "namespace": "quad", "barrier_timeout_ms": 100 },
                "geometry": {
                    "cluster_size": 2, "n_dofs": 1, "n_contacts": 4, "extra_width": 0,
                    "jnt_names": ["hip"]
                }
            }"#,
        )
        .unwrap();

        let file = SessionFile::from_json_file(&path).unwrap();
        assert_eq!(file.client.namespace, "quad");
        assert_eq!(file.client.handshake_timeout_ms, 30_000);
        assert_eq!(file.geometry.n_contacts, 4);
        assert!(!file.geometry.root_acc);
    }

    #[test]
    fn unreadable_files_are_config_errors() {
        let err = ClientConfig::from_json_file("/nonexistent/client.json").unwrap_err();
        assert!(matches!(err, ClientErr::Config(_)));
    }
}
