//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CliArgs, Command, EngineOverrides, JobArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "inkpress";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MAX_REQUEST_BYTES: u64 = 16 * 1024 * 1024;
const DEFAULT_MERGE_CONCURRENCY: u32 = 4;
pub(crate) const DEFAULT_PDF_CLI_PATH: &str = "pdfcpu";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub browser: BrowserSettings,
    pub pdf: PdfSettings,
    pub conversions: ConversionSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub max_request_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Default)]
pub struct BrowserSettings {
    /// Explicit Chromium binary; discovered on the system when unset.
    pub executable: Option<PathBuf>,
    pub no_sandbox: bool,
    /// Extra launch arguments passed verbatim.
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PdfSettings {
    pub cli_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ConversionSettings {
    pub scratch_dir: PathBuf,
    pub merge_concurrency: NonZeroU32,
    /// Zero leaves merges without a default deadline.
    pub merge_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("INKPRESS")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("browser.args")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Convert(args)) | Some(Command::Merge(args)) => {
            raw.apply_engine_overrides(&args.engines)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    browser: RawBrowserSettings,
    pdf: RawPdfSettings,
    conversions: RawConversionSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(limit) = overrides.server_max_request_bytes {
            self.server.max_request_bytes = Some(limit);
        }
        self.apply_engine_overrides(&overrides.engines);
    }

    fn apply_engine_overrides(&mut self, overrides: &EngineOverrides) {
        if let Some(path) = overrides.browser_executable.as_ref() {
            self.browser.executable = Some(path.clone());
        }
        if let Some(no_sandbox) = overrides.browser_no_sandbox {
            self.browser.no_sandbox = Some(no_sandbox);
        }
        if let Some(path) = overrides.pdf_cli_path.as_ref() {
            self.pdf.cli_path = Some(path.clone());
        }
        if let Some(dir) = overrides.scratch_dir.as_ref() {
            self.conversions.scratch_dir = Some(dir.clone());
        }
        if let Some(value) = overrides.merge_concurrency {
            self.conversions.merge_concurrency = Some(value);
        }
        if let Some(value) = overrides.merge_timeout_ms {
            self.conversions.merge_timeout_ms = Some(value);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            browser,
            pdf,
            conversions,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            browser: build_browser_settings(browser),
            pdf: build_pdf_settings(pdf)?,
            conversions: build_conversion_settings(conversions)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let max_request_bytes_value = server
        .max_request_bytes
        .unwrap_or(DEFAULT_MAX_REQUEST_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("server.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "server.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        max_request_bytes,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_browser_settings(browser: RawBrowserSettings) -> BrowserSettings {
    let executable = browser
        .executable
        .filter(|path| !path.as_os_str().is_empty());
    let args = browser
        .args
        .into_iter()
        .map(|arg| arg.trim().to_string())
        .filter(|arg| !arg.is_empty())
        .collect();
    BrowserSettings {
        executable,
        no_sandbox: browser.no_sandbox.unwrap_or(false),
        args,
    }
}

fn build_pdf_settings(pdf: RawPdfSettings) -> Result<PdfSettings, LoadError> {
    let cli_path = pdf
        .cli_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PDF_CLI_PATH));
    if cli_path.as_os_str().is_empty() {
        return Err(LoadError::invalid("pdf.cli_path", "must not be empty"));
    }
    Ok(PdfSettings { cli_path })
}

fn build_conversion_settings(
    conversions: RawConversionSettings,
) -> Result<ConversionSettings, LoadError> {
    let scratch_dir = conversions
        .scratch_dir
        .unwrap_or_else(|| std::env::temp_dir().join("inkpress").join("html"));
    if scratch_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "conversions.scratch_dir",
            "must not be empty",
        ));
    }

    let merge_concurrency = non_zero_u32(
        conversions
            .merge_concurrency
            .unwrap_or(DEFAULT_MERGE_CONCURRENCY)
            .into(),
        "conversions.merge_concurrency",
    )?;

    Ok(ConversionSettings {
        scratch_dir,
        merge_concurrency,
        merge_timeout: Duration::from_millis(conversions.merge_timeout_ms.unwrap_or(0)),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrowserSettings {
    executable: Option<PathBuf>,
    no_sandbox: Option<bool>,
    args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPdfSettings {
    cli_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawConversionSettings {
    scratch_dir: Option<PathBuf>,
    merge_concurrency: Option<u32>,
    merge_timeout_ms: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
