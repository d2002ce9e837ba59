//! Record and replay HTTP interactions for repeatable tests.
//!
//! Interactions are captured as [`record::InteractionRecord`]s, grouped by a
//! match key from a [`matcher::RecordMatcher`] inside a
//! [`store::SessionStore`], and persisted per test session through
//! [`session::SessionArchive`].

pub mod config;
pub mod errors;
pub mod format;
pub mod logging;
pub mod matcher;
pub mod record;
pub mod runtime;
pub mod session;
pub mod store;

use clap::{error::ErrorKind, Parser, Subcommand};
use config::{
    build_logger, build_matcher, load_config, session_layout, CliOverrides, RecorderConfig,
};
use errors::RecorderError;
use logging::log_event;
use record::InteractionRecord;
use runtime::ProductionRuntime;
use serde_json::json;
use session::SessionArchive;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::SessionStore;

#[derive(Debug, Clone, Parser)]
#[command(name = "httprecorder")]
#[command(about = "Inspect and maintain recorded HTTP session files")]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, global = true)]
    pub records_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    pub log_path: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// List match keys and how many records each one holds
    Inspect { session: PathBuf },
    /// Print every record as a JSON line, in replay order
    Drain { session: PathBuf },
    /// Print the match key derived for a request
    Key {
        #[arg(long)]
        method: String,
        #[arg(long)]
        target: String,
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
        #[arg(long)]
        body: Option<String>,
    },
    /// Print a payload file in normalised form
    Normalize { file: PathBuf },
    /// Re-derive every match key in a session with the configured matcher
    Rekey {
        session: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Remove all recorded sessions below a records directory
    Clean { dir: Option<PathBuf> },
}

fn parse_header(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got `{value}`")),
    }
}

pub fn run() -> Result<i32, RecorderError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| RecorderError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, RecorderError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(RecorderError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.as_deref().map(|path| absolutize(cwd, path)),
        records_dir: cli.records_dir.clone(),
        log_path: cli.log_path.clone(),
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;
    let ctx = CommandContext::new(&cfg, runtime);

    let outcome = match &cli.command {
        CliCommand::Inspect { session } => ctx.inspect(&absolutize(cwd, session)),
        CliCommand::Drain { session } => ctx.drain(&absolutize(cwd, session)),
        CliCommand::Key {
            method,
            target,
            headers,
            body,
        } => ctx.key(method, target, headers, body.as_deref()),
        CliCommand::Normalize { file } => ctx.normalize(&absolutize(cwd, file)),
        CliCommand::Rekey { session, output } => {
            let session = absolutize(cwd, session);
            let output = output
                .as_deref()
                .map(|path| absolutize(cwd, path))
                .unwrap_or_else(|| session.clone());
            ctx.rekey(&session, &output)
        }
        CliCommand::Clean { dir } => {
            let dir = dir
                .as_deref()
                .map(|path| absolutize(cwd, path))
                .unwrap_or_else(|| session_layout(&cfg).records_dir().to_path_buf());
            ctx.clean(&dir)
        }
    };
    outcome.map(|()| 0)
}

struct CommandContext<'a> {
    runtime: &'a ProductionRuntime,
    archive: SessionArchive,
    matcher: Arc<dyn matcher::RecordMatcher>,
    logger: Option<logging::JsonlLogger>,
}

impl<'a> CommandContext<'a> {
    fn new(cfg: &RecorderConfig, runtime: &'a ProductionRuntime) -> Self {
        let logger = build_logger(cfg);
        let archive = SessionArchive::new(Arc::clone(&runtime.file_system))
            .with_logger(logger.clone())
            .with_pretty(cfg.session.pretty);
        Self {
            runtime,
            archive,
            matcher: build_matcher(cfg),
            logger,
        }
    }

    fn say(&self, line: &str) -> Result<(), RecorderError> {
        self.runtime.terminal.write_line(line)
    }

    fn inspect(&self, session: &Path) -> Result<(), RecorderError> {
        let store = self.archive.load(session, Arc::clone(&self.matcher))?;
        for (key, queue) in store.entries() {
            self.say(&format!("{}\t{key}", queue.len()))?;
        }
        self.say(&format!(
            "{} records under {} keys",
            store.len(),
            store.keys().count()
        ))
    }

    fn drain(&self, session: &Path) -> Result<(), RecorderError> {
        let mut store = self.archive.load(session, Arc::clone(&self.matcher))?;
        let mut drained = 0usize;
        for record in store.drain_all() {
            let line =
                serde_json::to_string(&record).map_err(|e| RecorderError::Io(e.to_string()))?;
            self.say(&line)?;
            drained += 1;
        }
        log_event(
            self.logger.as_ref(),
            "info",
            "records_drained",
            json!({"path": session.display().to_string(), "records": drained}),
        );
        Ok(())
    }

    fn key(
        &self,
        method: &str,
        target: &str,
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<(), RecorderError> {
        let mut record = InteractionRecord::new(method, target);
        for (name, value) in headers {
            record = record.with_request_header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            record = record.with_request_body(body);
        }
        self.say(&self.matcher.matching_key(&record))
    }

    fn normalize(&self, file: &Path) -> Result<(), RecorderError> {
        let contents = self.runtime.file_system.read_to_string(file)?;
        self.say(&format::format_payload(&contents))
    }

    fn rekey(&self, session: &Path, output: &Path) -> Result<(), RecorderError> {
        let mut store = self.archive.load(session, Arc::clone(&self.matcher))?;
        let keys_before = store.keys().count();
        let mut rekeyed = SessionStore::new(Arc::clone(&self.matcher));
        rekeyed.enqueue_range(store.drain_all());
        self.archive.save(&rekeyed, output)?;
        log_event(
            self.logger.as_ref(),
            "info",
            "session_rekeyed",
            json!({
                "from": session.display().to_string(),
                "to": output.display().to_string(),
                "keys_before": keys_before,
                "keys_after": rekeyed.keys().count(),
            }),
        );
        self.say(&format!(
            "rekeyed {} records: {keys_before} keys -> {} keys",
            rekeyed.len(),
            rekeyed.keys().count()
        ))
    }

    fn clean(&self, dir: &Path) -> Result<(), RecorderError> {
        self.runtime.file_system.clean_dir(dir)?;
        log_event(
            self.logger.as_ref(),
            "info",
            "records_dir_cleaned",
            json!({"path": dir.display().to_string()}),
        );
        self.say(&format!("cleaned {}", dir.display()))
    }
}

fn absolutize(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}
