use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the inkpress binary.
#[derive(Debug, Parser)]
#[command(name = "inkpress", version, about = "HTML and URL to PDF conversion service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "INKPRESS_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the conversion HTTP service.
    Serve(Box<ServeArgs>),
    /// Convert one document described by a conversion JSON file.
    Convert(JobArgs),
    /// Merge several documents described by a merge JSON file.
    Merge(JobArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct EngineOverrides {
    /// Override the Chromium executable used for rendering.
    #[arg(long = "browser-executable", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub browser_executable: Option<PathBuf>,

    /// Launch Chromium without its sandbox.
    #[arg(
        long = "browser-no-sandbox",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub browser_no_sandbox: Option<bool>,

    /// Override the pdfcpu executable path.
    #[arg(long = "pdf-cli-path", value_name = "PATH")]
    pub pdf_cli_path: Option<PathBuf>,

    /// Override the directory that stages inline HTML sources.
    #[arg(long = "conversions-scratch-dir", value_name = "PATH")]
    pub scratch_dir: Option<PathBuf>,

    /// Override how many merge documents render at once.
    #[arg(long = "conversions-merge-concurrency", value_name = "COUNT")]
    pub merge_concurrency: Option<u32>,

    /// Override the default merge deadline in milliseconds (0 disables it).
    #[arg(long = "conversions-merge-timeout-ms", value_name = "MILLIS")]
    pub merge_timeout_ms: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub engines: EngineOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the maximum accepted request body size in bytes.
    #[arg(long = "server-max-request-bytes", value_name = "BYTES")]
    pub server_max_request_bytes: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct JobArgs {
    #[command(flatten)]
    pub engines: EngineOverrides,

    /// Request JSON to read; `-` reads standard input.
    #[arg(long, short = 'i', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Where to write the resulting PDF.
    #[arg(long, short = 'o', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,
}
