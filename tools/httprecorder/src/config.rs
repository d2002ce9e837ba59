use crate::errors::RecorderError;
use crate::logging::{JsonlLogger, DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::matcher::{BodyDigestMatcher, RecordMatcher, SimpleMatcher, DEFAULT_IGNORED_QUERY_PARAMS};
use crate::runtime::FileSystem;
use crate::session::SessionLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub records_dir: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecorderConfig {
    pub matcher: MatcherConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatcherConfig {
    pub ignored_query_params: Vec<String>,
    pub matched_headers: Vec<String>,
    pub include_body_digest: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub records_dir: PathBuf,
    pub pretty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// Event log file. Logging is off when unset.
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig {
                ignored_query_params: DEFAULT_IGNORED_QUERY_PARAMS
                    .iter()
                    .map(|name| name.to_string())
                    .collect(),
                matched_headers: Vec::new(),
                include_body_digest: false,
            },
            session: SessionConfig {
                records_dir: PathBuf::from("SessionRecords"),
                pretty: true,
            },
            log: LogConfig {
                path: None,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRecorderConfig {
    matcher: Option<PartialMatcherConfig>,
    session: Option<PartialSessionConfig>,
    log: Option<PartialLogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialMatcherConfig {
    ignored_query_params: Option<Vec<String>>,
    matched_headers: Option<Vec<String>>,
    include_body_digest: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSessionConfig {
    records_dir: Option<PathBuf>,
    pretty: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLogConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

/// Defaults, then the TOML file (if any), then CLI overrides. Relative paths
/// are resolved against `process_cwd`.
pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<RecorderConfig, RecorderError> {
    let mut cfg = RecorderConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialRecorderConfig = toml::from_str(&file_contents)
            .map_err(|e| RecorderError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;

    cfg.session.records_dir = absolutize_path(process_cwd, &cfg.session.records_dir);
    cfg.log.path = cfg
        .log
        .path
        .as_deref()
        .map(|path| absolutize_path(process_cwd, path));
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut RecorderConfig, partial: PartialRecorderConfig) {
    if let Some(matcher) = partial.matcher {
        if let Some(value) = matcher.ignored_query_params {
            cfg.matcher.ignored_query_params = value;
        }
        if let Some(value) = matcher.matched_headers {
            cfg.matcher.matched_headers = value;
        }
        if let Some(value) = matcher.include_body_digest {
            cfg.matcher.include_body_digest = value;
        }
    }

    if let Some(session) = partial.session {
        if let Some(value) = session.records_dir {
            cfg.session.records_dir = value;
        }
        if let Some(value) = session.pretty {
            cfg.session.pretty = value;
        }
    }

    if let Some(log) = partial.log {
        if let Some(value) = log.path {
            cfg.log.path = Some(value);
        }
        if let Some(value) = log.max_payload_bytes {
            cfg.log.max_payload_bytes = value;
        }
        if let Some(value) = log.budget_bytes {
            cfg.log.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut RecorderConfig, overrides: &CliOverrides) {
    if let Some(records_dir) = &overrides.records_dir {
        cfg.session.records_dir = records_dir.clone();
    }
    if let Some(log_path) = &overrides.log_path {
        cfg.log.path = Some(log_path.clone());
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &RecorderConfig) -> Result<(), RecorderError> {
    if cfg.session.records_dir.as_os_str().is_empty()
        || cfg.session.records_dir.to_string_lossy().trim().is_empty()
    {
        return Err(RecorderError::InvalidConfig(
            "session.records_dir must not be empty".to_string(),
        ));
    }

    if cfg
        .matcher
        .ignored_query_params
        .iter()
        .any(|name| name.trim().is_empty())
    {
        return Err(RecorderError::InvalidConfig(
            "matcher.ignored_query_params must not contain blank names".to_string(),
        ));
    }

    if cfg
        .matcher
        .matched_headers
        .iter()
        .any(|name| name.trim().is_empty())
    {
        return Err(RecorderError::InvalidConfig(
            "matcher.matched_headers must not contain blank names".to_string(),
        ));
    }

    if cfg.log.max_payload_bytes == 0 {
        return Err(RecorderError::InvalidConfig(
            "log.max_payload_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

pub fn build_matcher(cfg: &RecorderConfig) -> Arc<dyn RecordMatcher> {
    let simple = SimpleMatcher::new(
        &cfg.matcher.ignored_query_params,
        &cfg.matcher.matched_headers,
    );
    if cfg.matcher.include_body_digest {
        Arc::new(BodyDigestMatcher::new(simple))
    } else {
        Arc::new(simple)
    }
}

pub fn build_logger(cfg: &RecorderConfig) -> Option<JsonlLogger> {
    cfg.log.path.as_ref().map(|path| {
        let mut logger = JsonlLogger::new(path);
        logger.max_payload_bytes = cfg.log.max_payload_bytes;
        logger.budget_bytes = cfg.log.budget_bytes;
        logger
    })
}

pub fn session_layout(cfg: &RecorderConfig) -> SessionLayout {
    SessionLayout::new(cfg.session.records_dir.clone())
}
