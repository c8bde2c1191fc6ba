//! log4rs wiring. The engine only talks to the `log` facade; these helpers install a backend.

use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

use crate::devlog::DEV_TARGET;
use crate::errors::DbError;
use crate::query::telemetry::{AUDIT_TARGET, QUERY_TARGET};

const ROLL_SIZE: u64 = 10 * 1024 * 1024;
const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";

/// Loads a log4rs YAML file.
///
/// # Errors
/// `Config` if the file cannot be read or parsed.
pub fn init_path(path: &Path) -> Result<(), DbError> {
    log4rs::init_file(path, log4rs::config::Deserializers::default())
        .map_err(|e| DbError::Config(format!("log config {}: {e}", path.display())))
}

#[must_use]
pub fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn rolling(base: &Path, stem: &str, keep: u32) -> Result<RollingFileAppender, DbError> {
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", base.join(format!("{stem}.{{}}.log")).display()), keep)
        .map_err(|e| DbError::Config(format!("log roller for {stem}: {e}")))?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
    Ok(RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(base.join(format!("{stem}.log")), Box::new(policy))?)
}

/// Installs rolling-file logging under `dir` (current directory when `None`):
/// `app.log` for everything, `audit.log` for write audit lines, `query.log` for read telemetry.
/// Trace lines from `devlog!` go to `dev.log` when `enable_dev` is set.
///
/// # Errors
/// `Io`/`Config` when the directory or an appender cannot be created, or a logger is already installed.
pub fn configure_logging(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
    enable_dev: bool,
) -> Result<(), DbError> {
    let base = match dir {
        Some(d) => PathBuf::from(d),
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&base)?;
    let keep = u32::try_from(retention.unwrap_or(7)).unwrap_or(u32::MAX);
    let lvl = parse_level(level);
    let mut builder = Config::builder()
        .appender(Appender::builder().build("app", Box::new(rolling(&base, "app", keep)?)))
        .appender(Appender::builder().build("audit", Box::new(rolling(&base, "audit", keep)?)))
        .appender(Appender::builder().build("query", Box::new(rolling(&base, "query", keep)?)))
        .logger(Logger::builder().appender("audit").additive(false).build(AUDIT_TARGET, lvl))
        .logger(Logger::builder().appender("query").additive(false).build(QUERY_TARGET, lvl));
    if enable_dev {
        builder = builder
            .appender(Appender::builder().build("dev", Box::new(rolling(&base, "dev", keep)?)))
            .logger(Logger::builder().appender("dev").additive(false).build(DEV_TARGET, LevelFilter::Trace));
    } else {
        builder = builder.logger(Logger::builder().additive(false).build(DEV_TARGET, LevelFilter::Off));
    }
    let config = builder
        .build(Root::builder().appender("app").build(lvl))
        .map_err(|e| DbError::Config(format!("log config: {e}")))?;
    log4rs::init_config(config).map_err(|e| DbError::Config(format!("logger already set: {e}")))?;
    Ok(())
}

/// Reads `DOCMOCK_LOG_DIR`, `DOCMOCK_LOG_LEVEL`, `DOCMOCK_LOG_RETENTION` and `DOCMOCK_DEVLOG`.
///
/// # Errors
/// See [`configure_logging`].
pub fn configure_from_env() -> Result<(), DbError> {
    let dir = std::env::var("DOCMOCK_LOG_DIR").ok().map(PathBuf::from);
    let level = std::env::var("DOCMOCK_LOG_LEVEL").ok();
    let retention = std::env::var("DOCMOCK_LOG_RETENTION").ok().and_then(|s| s.parse::<usize>().ok());
    let dev = std::env::var("DOCMOCK_DEVLOG")
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    configure_logging(dir.as_deref(), level.as_deref(), retention, dev)
}
