// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::adapters::ssh::SshSettings;
use crate::app::pipelines::{PipelineSettings, ResourceProfiles};
use crate::app::poller::PollPolicy;
use crate::app::services::script::{Resources, Walltime};
use crate::app::services::validation::is_safe_remote_name;

const APP_DIR_NAME: &str = "seqorbit";
const CONFIG_FILE_NAME: &str = "seqorbit.toml";
const CONFIG_ENV_VAR: &str = "SEQORBIT_CONFIG_PATH";
const SCRIPTS_DIR_NAME: &str = "scripts";

const DEFAULT_PORT: u16 = 22;
const DEFAULT_SCRATCH_ENV_VAR: &str = "SCRATCH";
const DEFAULT_STAGING_DIR: &str = "dec";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
const DEFAULT_POLL_MAX_FAILURES: u32 = 5;
const DEFAULT_POLL_MAX_WAIT_SECS: u64 = 48 * 3600;
const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_CONNECT_BACKOFF_MS: u64 = 1000;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_KEEPALIVE_SECS: u64 = 30;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PREPARE_TIMEOUT_SECS: u64 = 7200;
const DEFAULT_TRANSFER_CHUNK_BYTES: usize = 256 * 1024;
const DEFAULT_DOWNLOAD_DIR: &str = "download";
const DEFAULT_WALLTIME_SECS: u64 = 24 * 3600;

#[derive(Debug, Default, Deserialize)]
struct FileProfile {
    partition: Option<String>,
    walltime: Option<String>,
    nodes: Option<u32>,
    tasks: Option<u32>,
    memory_gb: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FileResources {
    classification: Option<FileProfile>,
    aggregation: Option<FileProfile>,
    extraction: Option<FileProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    port: Option<u16>,
    known_hosts_path: Option<String>,
    scratch_env_var: Option<String>,
    staging_dir: Option<String>,
    poll_interval_secs: Option<u64>,
    poll_max_failures: Option<u32>,
    poll_max_wait_secs: Option<u64>,
    connect_attempts: Option<u32>,
    connect_backoff_ms: Option<u64>,
    connect_timeout_secs: Option<u64>,
    keepalive_secs: Option<u64>,
    command_timeout_secs: Option<u64>,
    prepare_timeout_secs: Option<u64>,
    transfer_chunk_bytes: Option<usize>,
    download_dir: Option<String>,
    scripts_dir: Option<String>,
    verbose: Option<bool>,
    #[serde(default)]
    resources: FileResources,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub known_hosts_path: Option<PathBuf>,
    pub scratch_env_var: String,
    pub staging_dir: String,
    pub poll_interval_secs: u64,
    pub poll_max_failures: u32,
    pub poll_max_wait_secs: u64,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
    pub connect_timeout_secs: u64,
    pub keepalive_secs: u64,
    pub command_timeout_secs: u64,
    pub prepare_timeout_secs: u64,
    pub transfer_chunk_bytes: usize,
    pub download_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub verbose: bool,
    pub resources: ResourceProfiles,
}

impl Config {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            scratch_env_var: self.scratch_env_var.clone(),
            staging_dir: self.staging_dir.clone(),
            download_dir: self.download_dir.clone(),
            scripts_dir: self.scripts_dir.clone(),
            poll: PollPolicy {
                interval: Duration::from_secs(self.poll_interval_secs),
                max_failures: self.poll_max_failures,
                max_wait: Duration::from_secs(self.poll_max_wait_secs),
                query_timeout: Duration::from_secs(self.command_timeout_secs),
            },
            connect_attempts: self.connect_attempts,
            connect_backoff: Duration::from_millis(self.connect_backoff_ms),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            prepare_timeout: Duration::from_secs(self.prepare_timeout_secs),
            resources: self.resources.clone(),
        }
    }

    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            port: self.port,
            known_hosts: self.known_hosts_path.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            keepalive: Duration::from_secs(self.keepalive_secs),
            transfer_chunk_bytes: self.transfer_chunk_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

/// One resolved setting, rendered for the startup log.
#[derive(Debug)]
pub struct ConfigValue {
    pub name: &'static str,
    pub value: String,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub values: Vec<ConfigValue>,
}

impl ConfigReport {
    #[cfg(test)]
    fn source_of(&self, name: &str) -> Option<ConfigSource> {
        self.values
            .iter()
            .find(|value| value.name == name)
            .map(|value| value.source)
    }
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub download_dir: Option<PathBuf>,
    pub staging_dir: Option<String>,
    pub verbose: Option<bool>,
}

/// Resolves one field as override > file > default and records where it came from.
struct Resolver {
    values: Vec<ConfigValue>,
}

impl Resolver {
    fn pick<T: Display>(
        &mut self,
        name: &'static str,
        over: Option<T>,
        file: Option<T>,
        default: T,
    ) -> T {
        let (value, source) = match (over, file) {
            (Some(value), _) => (value, ConfigSource::Override),
            (None, Some(value)) => (value, ConfigSource::ConfigFile),
            (None, None) => (default, ConfigSource::Default),
        };
        self.record(name, value.to_string(), source);
        value
    }

    fn record(&mut self, name: &'static str, value: String, source: ConfigSource) {
        self.values.push(ConfigValue {
            name,
            value,
            source,
        });
    }
}

#[cfg(test)]
fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());
    let mut r = Resolver { values: Vec::new() };

    let port = r.pick("port", None, file.port, DEFAULT_PORT);
    if port == 0 {
        anyhow::bail!("port must be between 1 and 65535");
    }
    let known_hosts_path = match file.known_hosts_path.as_deref() {
        Some(raw) => {
            let path = resolve_path(raw, base_dir);
            r.record("known_hosts_path", path.display().to_string(), ConfigSource::ConfigFile);
            Some(path)
        }
        None => {
            r.record("known_hosts_path", "~/.ssh/known_hosts".to_string(), ConfigSource::Default);
            None
        }
    };

    let scratch_env_var = r.pick(
        "scratch_env_var",
        None,
        file.scratch_env_var,
        DEFAULT_SCRATCH_ENV_VAR.to_string(),
    );
    if scratch_env_var.is_empty()
        || !scratch_env_var
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        anyhow::bail!("scratch_env_var '{scratch_env_var}' is not a shell variable name");
    }
    let staging_dir = r.pick(
        "staging_dir",
        overrides.staging_dir,
        file.staging_dir,
        DEFAULT_STAGING_DIR.to_string(),
    );
    if !is_safe_remote_name(&staging_dir) {
        anyhow::bail!(
            "staging_dir '{staging_dir}' may only contain letters, digits, '.', '_' and '-'"
        );
    }

    let poll_interval_secs = r.pick(
        "poll_interval_secs",
        None,
        file.poll_interval_secs,
        DEFAULT_POLL_INTERVAL_SECS,
    );
    let poll_max_failures = r.pick(
        "poll_max_failures",
        None,
        file.poll_max_failures,
        DEFAULT_POLL_MAX_FAILURES,
    );
    let poll_max_wait_secs = r.pick(
        "poll_max_wait_secs",
        None,
        file.poll_max_wait_secs,
        DEFAULT_POLL_MAX_WAIT_SECS,
    );
    let connect_attempts = r.pick(
        "connect_attempts",
        None,
        file.connect_attempts,
        DEFAULT_CONNECT_ATTEMPTS,
    );
    let connect_backoff_ms = r.pick(
        "connect_backoff_ms",
        None,
        file.connect_backoff_ms,
        DEFAULT_CONNECT_BACKOFF_MS,
    );
    let connect_timeout_secs = r.pick(
        "connect_timeout_secs",
        None,
        file.connect_timeout_secs,
        DEFAULT_CONNECT_TIMEOUT_SECS,
    );
    let keepalive_secs = r.pick("keepalive_secs", None, file.keepalive_secs, DEFAULT_KEEPALIVE_SECS);
    let command_timeout_secs = r.pick(
        "command_timeout_secs",
        None,
        file.command_timeout_secs,
        DEFAULT_COMMAND_TIMEOUT_SECS,
    );
    let prepare_timeout_secs = r.pick(
        "prepare_timeout_secs",
        None,
        file.prepare_timeout_secs,
        DEFAULT_PREPARE_TIMEOUT_SECS,
    );
    let transfer_chunk_bytes = r.pick(
        "transfer_chunk_bytes",
        None,
        file.transfer_chunk_bytes,
        DEFAULT_TRANSFER_CHUNK_BYTES,
    );
    for (name, value) in [
        ("poll_interval_secs", poll_interval_secs),
        ("poll_max_wait_secs", poll_max_wait_secs),
        ("connect_timeout_secs", connect_timeout_secs),
        ("keepalive_secs", keepalive_secs),
        ("command_timeout_secs", command_timeout_secs),
        ("prepare_timeout_secs", prepare_timeout_secs),
        ("transfer_chunk_bytes", transfer_chunk_bytes as u64),
        ("connect_attempts", u64::from(connect_attempts)),
        ("poll_max_failures", u64::from(poll_max_failures)),
    ] {
        if value == 0 {
            anyhow::bail!("{name} must be greater than zero");
        }
    }

    let download_dir = match overrides.download_dir {
        Some(path) => {
            let path = expand_path(path);
            r.record("download_dir", path.display().to_string(), ConfigSource::Override);
            path
        }
        None => {
            let (raw, source) = match file.download_dir.as_deref() {
                Some(raw) => (raw, ConfigSource::ConfigFile),
                None => (DEFAULT_DOWNLOAD_DIR, ConfigSource::Default),
            };
            // The default is relative to the working directory, not the config file.
            let base = if source == ConfigSource::ConfigFile { base_dir } else { None };
            let path = resolve_path(raw, base);
            r.record("download_dir", path.display().to_string(), source);
            path
        }
    };
    let scripts_dir = match file.scripts_dir.as_deref() {
        Some(raw) => {
            let path = resolve_path(raw, base_dir);
            r.record("scripts_dir", path.display().to_string(), ConfigSource::ConfigFile);
            path
        }
        None => {
            let path = default_scripts_dir().with_context(|| {
                "failed to resolve default scripts directory; set scripts_dir in the config file"
            })?;
            r.record("scripts_dir", path.display().to_string(), ConfigSource::Default);
            path
        }
    };
    let verbose = r.pick("verbose", overrides.verbose, file.verbose, false);

    let resources = ResourceProfiles {
        classification: resolve_profile(
            &mut r,
            "resources.classification",
            file.resources.classification,
            default_profile("g100_usr_prod", 100)?,
        )?,
        aggregation: resolve_profile(
            &mut r,
            "resources.aggregation",
            file.resources.aggregation,
            default_profile("g100_usr_bmem", 500)?,
        )?,
        extraction: resolve_profile(
            &mut r,
            "resources.extraction",
            file.resources.extraction,
            default_profile("g100_usr_prod", 100)?,
        )?,
    };

    let config = Config {
        port,
        known_hosts_path,
        scratch_env_var,
        staging_dir,
        poll_interval_secs,
        poll_max_failures,
        poll_max_wait_secs,
        connect_attempts,
        connect_backoff_ms,
        connect_timeout_secs,
        keepalive_secs,
        command_timeout_secs,
        prepare_timeout_secs,
        transfer_chunk_bytes,
        download_dir,
        scripts_dir,
        verbose,
        resources,
    };
    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        values: r.values,
    };
    Ok(LoadResult { config, report })
}

fn default_profile(partition: &str, memory_gb: u32) -> Result<Resources> {
    Ok(Resources {
        partition: partition.to_string(),
        walltime: Walltime::from_secs(DEFAULT_WALLTIME_SECS)?,
        nodes: 1,
        tasks: 48,
        memory_gb,
    })
}

fn resolve_profile(
    r: &mut Resolver,
    name: &'static str,
    file: Option<FileProfile>,
    default: Resources,
) -> Result<Resources> {
    let Some(file) = file else {
        r.record(name, describe_profile(&default), ConfigSource::Default);
        return Ok(default);
    };
    let walltime = match file.walltime.as_deref() {
        Some(raw) => raw
            .parse::<Walltime>()
            .map_err(|err| anyhow::anyhow!("{name}.walltime: {err}"))?,
        None => default.walltime,
    };
    let profile = Resources {
        partition: file.partition.unwrap_or(default.partition),
        walltime,
        nodes: file.nodes.unwrap_or(default.nodes),
        tasks: file.tasks.unwrap_or(default.tasks),
        memory_gb: file.memory_gb.unwrap_or(default.memory_gb),
    };
    if !is_safe_remote_name(&profile.partition) {
        anyhow::bail!("{name}.partition '{}' is not a valid partition name", profile.partition);
    }
    for (field, value) in [
        ("nodes", profile.nodes),
        ("tasks", profile.tasks),
        ("memory_gb", profile.memory_gb),
    ] {
        if value == 0 {
            anyhow::bail!("{name}.{field} must be greater than zero");
        }
    }
    r.record(name, describe_profile(&profile), ConfigSource::ConfigFile);
    Ok(profile)
}

fn describe_profile(profile: &Resources) -> String {
    format!(
        "{} {} {}N/{}n/{}G",
        profile.partition, profile.walltime, profile.nodes, profile.tasks, profile.memory_gb
    )
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn default_scripts_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME).join(SCRIPTS_DIR_NAME))
}
