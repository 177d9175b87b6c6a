//! CLI surface (§6) and the `AppConfig` it produces (§3). Flags are parsed
//! with `clap`'s derive API; `--log-level` falls back to `RUST_LOG` so the
//! usual tracing env-filter conventions still work.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::StartupError;

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_script_timeout_max_ms() -> u64 {
    300_000
}

/// Parsed CLI flags (§6), before being turned into the immutable
/// [`AppConfig`] the rest of the process shares.
#[derive(Debug, Parser)]
#[command(name = "serial-mcp-adapter", about = "MCP bridge for a manifest-driven serial device")]
pub struct Cli {
    /// Serial device path, e.g. /dev/ttyUSB0
    #[arg(long)]
    pub line: PathBuf,

    /// Directory containing <device_id>.json manifest files
    #[arg(long = "manifest-dir")]
    pub manifest_dir: PathBuf,

    /// HTTP listen port
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Serial baud rate
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,

    /// Log level (overridden by RUST_LOG if set)
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Per-request serial transaction timeout, in milliseconds
    #[arg(long = "request-timeout-ms", default_value_t = default_request_timeout_ms())]
    pub request_timeout_ms: u64,
}

/// Immutable, validated process configuration, built once at startup and
/// shared behind an `Arc` (§3).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub line: PathBuf,
    pub manifest_dir: PathBuf,
    pub port: u16,
    pub baud: u32,
    pub log_level: String,
    pub request_timeout: Duration,
    pub script_timeout_max: Duration,
}

impl AppConfig {
    /// Builds a config from parsed CLI flags, applying the `RUST_LOG`
    /// environment override for log level.
    pub fn from_cli(cli: Cli) -> Result<AppConfig, StartupError> {
        if cli.request_timeout_ms == 0 {
            return Err(StartupError::Config(
                "--request-timeout-ms must be greater than zero".into(),
            ));
        }
        if !cli.manifest_dir.is_dir() {
            return Err(StartupError::Config(format!(
                "--manifest-dir {} is not a directory",
                cli.manifest_dir.display()
            )));
        }

        let log_level = std::env::var("RUST_LOG").unwrap_or(cli.log_level);

        Ok(AppConfig {
            line: cli.line,
            manifest_dir: cli.manifest_dir,
            port: cli.port,
            baud: cli.baud,
            log_level,
            request_timeout: Duration::from_millis(cli.request_timeout_ms),
            script_timeout_max: Duration::from_millis(default_script_timeout_max_ms()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli(manifest_dir: PathBuf) -> Cli {
        Cli {
            line: PathBuf::from("/dev/ttyUSB0"),
            manifest_dir,
            port: 8080,
            baud: 115_200,
            log_level: "info".into(),
            request_timeout_ms: 30_000,
        }
    }

    #[test]
    fn defaults_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::remove_var("RUST_LOG");
        }
        let cfg = AppConfig::from_cli(base_cli(dir.path().to_path_buf())).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.baud, 115_200);
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.script_timeout_max, Duration::from_secs(300));
    }

    #[test]
    fn rust_log_env_overrides_flag() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var("RUST_LOG", "debug");
        }
        let mut cli = base_cli(dir.path().to_path_buf());
        cli.log_level = "warn".into();
        let cfg = AppConfig::from_cli(cli).unwrap();
        assert_eq!(cfg.log_level, "debug");
        unsafe {
            std::env::remove_var("RUST_LOG");
        }
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = base_cli(dir.path().to_path_buf());
        cli.request_timeout_ms = 0;
        assert!(AppConfig::from_cli(cli).is_err());
    }

    #[test]
    fn missing_manifest_dir_is_rejected() {
        let cli = base_cli(PathBuf::from("/nonexistent/manifest-dir"));
        assert!(AppConfig::from_cli(cli).is_err());
    }
}
