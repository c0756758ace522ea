// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML experiment configuration with strict schema validation.
//!
//! One file describes every role of an experiment; each process picks the
//! section it runs. Any invalid field results in a HardValidationError that
//! prevents startup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::barrier::Expectation;
use crate::error::{HardValidationError, SnapsyncError, SnapsyncResult};
use crate::trigger::WakeTarget;
use crate::types::{Endpoint, Port, WorkerId};

/// Raw master section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawMasterConfig {
    #[serde(default = "default_master_listen")]
    listen: String,
    #[serde(default)]
    datagram_listen: Option<String>,
    #[serde(default = "default_label")]
    label: String,
    #[serde(default)]
    metrics_port: Option<u16>,
}

fn default_master_listen() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_label() -> String {
    "rule".to_string()
}

fn default_armed() -> String {
    "0".to_string()
}

fn default_release() -> String {
    "1".to_string()
}

fn default_rounds() -> u64 {
    1
}

/// A trigger target: either a bare `host:port` or a detailed entry.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTarget {
    Endpoint(String),
    Detailed(RawTargetEntry),
}

#[derive(Debug, Deserialize)]
struct RawTargetEntry {
    #[serde(default)]
    datagram: Option<String>,
    #[serde(default)]
    mmap: Option<PathBuf>,
    #[serde(default = "default_armed")]
    armed: String,
    #[serde(default = "default_release")]
    release: String,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Default, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Accounting {
    #[default]
    Count,
    Identity,
}

#[derive(Debug, Deserialize)]
struct RawTriggerConfig {
    master: String,
    #[serde(default)]
    workers: Vec<RawTarget>,
    #[serde(default)]
    sync_worker: Option<String>,
    #[serde(default)]
    expected: Option<usize>,
    #[serde(default)]
    accounting: Accounting,
    #[serde(default = "default_rounds")]
    rounds: u64,
    #[serde(default)]
    round_interval_ms: u64,
    #[serde(default)]
    connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawWake {
    #[serde(default)]
    datagram: Option<String>,
    #[serde(default)]
    mmap: Option<PathBuf>,
    #[serde(default = "default_armed")]
    armed: String,
}

#[derive(Debug, Deserialize)]
struct RawWorkerConfig {
    id: String,
    master: String,
    wake: RawWake,
    command: String,
    #[serde(default = "default_rounds")]
    rounds: u64,
    #[serde(default)]
    pin_cpu: Option<usize>,
    #[serde(default)]
    sync_listen: Option<String>,
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    master: Option<RawMasterConfig>,
    #[serde(default)]
    trigger: Option<RawTriggerConfig>,
    #[serde(default)]
    workers: Vec<RawWorkerConfig>,
}

/// Validated master configuration.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub listen: Endpoint,
    pub datagram_listen: Option<Endpoint>,
    /// Prefix of the `[label N] duration: X ms` line.
    pub label: String,
    pub metrics_port: Option<Port>,
}

/// A validated trigger target with its optional identity.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub target: WakeTarget,
    pub id: Option<WorkerId>,
}

/// Validated trigger configuration.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub master: Endpoint,
    pub targets: Vec<TargetConfig>,
    pub sync_worker: Option<Endpoint>,
    pub accounting: Accounting,
    /// Expectation armed at the master each round.
    pub expectation: Expectation,
    pub rounds: u64,
    pub round_interval: Duration,
    pub connect_timeout: Option<Duration>,
}

/// How a worker is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeConfig {
    Datagram(Endpoint),
    Mmap { path: PathBuf, armed: u8 },
}

/// Validated worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: WorkerId,
    pub master: Endpoint,
    pub wake: WakeConfig,
    pub command: String,
    /// Zero means run until killed.
    pub rounds: u64,
    pub pin_cpu: Option<usize>,
    /// Also serve the workload as a synchronous `invoke` endpoint.
    pub sync_listen: Option<Endpoint>,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub master: Option<MasterConfig>,
    pub trigger: Option<TriggerConfig>,
    pub workers: Vec<WorkerConfig>,
}

impl Config {
    /// Look up a worker section by id.
    pub fn worker(&self, id: &str) -> Option<&WorkerConfig> {
        self.workers.iter().find(|w| w.id.as_str() == id)
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    /// Returns HardValidationError for any invalid fields.
    pub fn load_file(path: impl AsRef<Path>) -> SnapsyncResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(SnapsyncError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| SnapsyncError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> SnapsyncResult<Config> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| SnapsyncError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawConfig) -> SnapsyncResult<Config> {
        if raw.master.is_none() && raw.trigger.is_none() && raw.workers.is_empty() {
            return Err(HardValidationError::SchemaValidation {
                message: "At least one of master, trigger or workers must be defined"
                    .to_string(),
            }
            .into());
        }

        let master = raw.master.map(Self::validate_master).transpose()?;
        let trigger = raw.trigger.map(Self::validate_trigger).transpose()?;

        let mut workers = Vec::with_capacity(raw.workers.len());
        let mut seen_ids = HashSet::new();
        let mut seen_wakes = HashSet::new();

        for (index, raw_worker) in raw.workers.into_iter().enumerate() {
            let worker = Self::validate_worker(raw_worker, index)?;

            if !seen_ids.insert(worker.id.clone()) {
                return Err(HardValidationError::DuplicateWorkerId {
                    id: worker.id.to_string(),
                }
                .into());
            }

            // Two workers cannot share a wake socket or a signal file.
            let wake_key = match &worker.wake {
                WakeConfig::Datagram(endpoint) => format!("udp:{}", endpoint),
                WakeConfig::Mmap { path, .. } => format!("mmap:{}", path.display()),
            };
            if !seen_wakes.insert(wake_key) {
                if let WakeConfig::Datagram(endpoint) = &worker.wake {
                    return Err(HardValidationError::InvalidPort {
                        port: endpoint.port().value(),
                        reason: format!("{} is already used by another worker", endpoint),
                    }
                    .into());
                }
                return Err(HardValidationError::InvalidFieldValue {
                    field: "wake.mmap",
                    value: worker.id.to_string(),
                    reason: "Signal file is already used by another worker".to_string(),
                }
                .into());
            }

            workers.push(worker);
        }

        Ok(Config {
            master,
            trigger,
            workers,
        })
    }

    fn validate_master(raw: RawMasterConfig) -> SnapsyncResult<MasterConfig> {
        let listen: Endpoint = raw.listen.parse()?;
        let datagram_listen = raw
            .datagram_listen
            .map(|s| s.parse::<Endpoint>())
            .transpose()?;
        let metrics_port = raw.metrics_port.map(Port::new).transpose()?;

        if raw.label.trim().is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "label",
                value: raw.label,
                reason: "Label cannot be empty".to_string(),
            }
            .into());
        }

        Ok(MasterConfig {
            listen,
            datagram_listen,
            label: raw.label,
            metrics_port,
        })
    }

    fn validate_trigger(raw: RawTriggerConfig) -> SnapsyncResult<TriggerConfig> {
        let master: Endpoint = raw.master.parse()?;
        let sync_worker = raw
            .sync_worker
            .map(|s| s.parse::<Endpoint>())
            .transpose()?;

        let mut targets = Vec::with_capacity(raw.workers.len());
        for (index, raw_target) in raw.workers.into_iter().enumerate() {
            targets.push(Self::validate_target(raw_target, index)?);
        }

        let has_mmap = targets
            .iter()
            .any(|t| matches!(t.target, WakeTarget::Mmap { .. }));
        if has_mmap && raw.rounds != 1 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "rounds",
                value: raw.rounds.to_string(),
                reason: "Triggers with mmap targets run exactly one round".to_string(),
            }
            .into());
        }

        if raw.rounds == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "rounds",
                value: "0".to_string(),
                reason: "Trigger must run at least one round".to_string(),
            }
            .into());
        }

        let expectation = match raw.accounting {
            Accounting::Count => {
                let expected = raw.expected.unwrap_or(targets.len());
                Expectation::count(expected).map_err(|e| HardValidationError::InvalidFieldValue {
                    field: "expected",
                    value: expected.to_string(),
                    reason: e.to_string(),
                })?
            }
            Accounting::Identity => {
                let mut ids = Vec::with_capacity(targets.len());
                for (index, target) in targets.iter().enumerate() {
                    let id = target.id.clone().ok_or_else(|| {
                        HardValidationError::MissingRequiredField {
                            field: "id",
                            context: format!(
                                "trigger worker at index {} (identity accounting)",
                                index
                            ),
                        }
                    })?;
                    ids.push(id);
                }
                let expectation = Expectation::identities(ids).map_err(|e| {
                    HardValidationError::SchemaValidation {
                        message: e.to_string(),
                    }
                })?;
                if let Some(expected) = raw.expected {
                    if expected != expectation.expected() {
                        return Err(HardValidationError::InvalidFieldValue {
                            field: "expected",
                            value: expected.to_string(),
                            reason: format!(
                                "Identity accounting expects {} workers",
                                expectation.expected()
                            ),
                        }
                        .into());
                    }
                }
                expectation
            }
        };

        Ok(TriggerConfig {
            master,
            targets,
            sync_worker,
            accounting: raw.accounting,
            expectation,
            rounds: raw.rounds,
            round_interval: Duration::from_millis(raw.round_interval_ms),
            connect_timeout: raw.connect_timeout_ms.map(Duration::from_millis),
        })
    }

    fn validate_target(raw: RawTarget, index: usize) -> SnapsyncResult<TargetConfig> {
        let entry = match raw {
            RawTarget::Endpoint(endpoint) => {
                return Ok(TargetConfig {
                    target: WakeTarget::Datagram(endpoint.parse()?),
                    id: None,
                });
            }
            RawTarget::Detailed(entry) => entry,
        };

        let id = entry.id.map(WorkerId::new).transpose()?;
        let target = match (entry.datagram, entry.mmap) {
            (Some(endpoint), None) => WakeTarget::Datagram(endpoint.parse()?),
            (None, Some(path)) => {
                let armed = parse_flag_byte("armed", &entry.armed)?;
                let release = parse_flag_byte("release", &entry.release)?;
                if armed == release {
                    return Err(HardValidationError::InvalidFieldValue {
                        field: "release",
                        value: entry.release,
                        reason: "Release byte must differ from the armed byte".to_string(),
                    }
                    .into());
                }
                WakeTarget::Mmap {
                    path,
                    armed,
                    release,
                }
            }
            _ => {
                return Err(HardValidationError::SchemaValidation {
                    message: format!(
                        "trigger worker at index {} needs exactly one of datagram or mmap",
                        index
                    ),
                }
                .into());
            }
        };

        Ok(TargetConfig { target, id })
    }

    fn validate_worker(raw: RawWorkerConfig, index: usize) -> SnapsyncResult<WorkerConfig> {
        let context = format!("worker at index {}", index);

        let id = WorkerId::new(&raw.id)?;
        let master: Endpoint = raw.master.parse()?;

        let wake = match (raw.wake.datagram, raw.wake.mmap) {
            (Some(endpoint), None) => WakeConfig::Datagram(endpoint.parse()?),
            (None, Some(path)) => {
                // A released flag stays released until the trigger re-arms it,
                // so a second wait could return immediately.
                if raw.rounds != 1 {
                    return Err(HardValidationError::InvalidFieldValue {
                        field: "rounds",
                        value: raw.rounds.to_string(),
                        reason: "Workers woken by mmap run exactly one round".to_string(),
                    }
                    .into());
                }
                WakeConfig::Mmap {
                    path,
                    armed: parse_flag_byte("armed", &raw.wake.armed)?,
                }
            }
            _ => {
                return Err(HardValidationError::SchemaValidation {
                    message: format!("{} needs exactly one of wake.datagram or wake.mmap", context),
                }
                .into());
            }
        };

        if raw.command.trim().is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: "command",
                context,
            }
            .into());
        }

        let sync_listen = raw
            .sync_listen
            .map(|s| s.parse::<Endpoint>())
            .transpose()?;

        Ok(WorkerConfig {
            id,
            master,
            wake,
            command: raw.command,
            rounds: raw.rounds,
            pin_cpu: raw.pin_cpu,
            sync_listen,
        })
    }
}

/// Parse a flag byte written as a one-character string.
pub fn parse_flag_byte(field: &'static str, value: &str) -> Result<u8, HardValidationError> {
    match value.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(HardValidationError::InvalidFieldValue {
            field,
            value: value.to_string(),
            reason: "Must be exactly one byte".to_string(),
        }),
    }
}
