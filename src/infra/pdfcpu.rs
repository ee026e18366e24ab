//! PDF manipulation through the `pdfcpu` command-line tool.

use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::{fs, process::Command};
use tracing::{info, warn};

use crate::{
    application::engine::{EngineError, PdfEngine},
    domain::options::WatermarkConfig,
};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampMode {
    Text,
    Image,
    Pdf,
}

impl StampMode {
    fn as_str(self) -> &'static str {
        match self {
            StampMode::Text => "text",
            StampMode::Image => "image",
            StampMode::Pdf => "pdf",
        }
    }
}

/// A parsed `"<content>[, key:value]*"` stamp descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampDescriptor {
    pub mode: StampMode,
    pub content: String,
    pub params: Vec<(String, String)>,
}

impl StampDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, EngineError> {
        let invalid = |reason: &str| EngineError::Descriptor {
            descriptor: descriptor.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = descriptor.split(',');
        let content = parts.next().unwrap_or_default().trim();
        if content.is_empty() {
            return Err(invalid("missing stamp content"));
        }

        let mut params = Vec::new();
        for part in parts {
            let (key, value) = part
                .split_once(':')
                .ok_or_else(|| invalid("parameters must be key:value pairs"))?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return Err(invalid("parameters need a key and a value"));
            }
            params.push((key.to_string(), value.to_string()));
        }

        Ok(Self {
            mode: stamp_mode(content),
            content: content.to_string(),
            params,
        })
    }

    /// Parameters in the form the CLI expects for its description argument.
    pub fn description(&self) -> String {
        self.params
            .iter()
            .map(|(key, value)| format!("{key}:{value}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn stamp_mode(content: &str) -> StampMode {
    let extension = Path::new(content)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("pdf") => StampMode::Pdf,
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => StampMode::Image,
        _ => StampMode::Text,
    }
}

#[derive(Debug, Clone)]
pub struct PdfCpu {
    cli_path: PathBuf,
}

impl PdfCpu {
    pub fn new(cli_path: impl Into<PathBuf>) -> Self {
        Self {
            cli_path: cli_path.into(),
        }
    }

    async fn run(&self, op: &'static str, args: Vec<OsString>) -> Result<(), EngineError> {
        let started_at = Instant::now();
        let output = Command::new(&self.cli_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                warn!(
                    target = "inkpress::infra::pdfcpu",
                    op,
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn_cli",
                    error = %err,
                    "Failed to spawn pdfcpu"
                );
                if err.kind() == ErrorKind::NotFound {
                    EngineError::Unavailable(err)
                } else {
                    EngineError::Io(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "inkpress::infra::pdfcpu",
                op,
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "pdfcpu_cli",
                stderr = %stderr,
                "pdfcpu invocation failed"
            );
            return Err(EngineError::Cli { exit_code, stderr });
        }

        info!(
            target = "inkpress::infra::pdfcpu",
            op,
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "pdfcpu invocation finished"
        );
        Ok(())
    }
}

/// Scratch space for one CLI invocation; removed on drop.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Result<Self, EngineError> {
        let dir = tempfile::Builder::new().prefix("inkpress-pdf-").tempdir()?;
        Ok(Self { dir })
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, EngineError> {
        let path = self.dir.path().join(name);
        fs::write(&path, bytes).await?;
        Ok(path)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, EngineError> {
        Ok(fs::read(path).await?)
    }
}

#[async_trait]
impl PdfEngine for PdfCpu {
    async fn merge(&self, parts: Vec<Vec<u8>>) -> Result<Vec<u8>, EngineError> {
        let workspace = Workspace::new()?;
        let output = workspace.path("merged.pdf");
        let mut args: Vec<OsString> = vec!["merge".into(), output.clone().into()];
        for (index, part) in parts.iter().enumerate() {
            let path = workspace.write(&format!("part-{index:04}.pdf"), part).await?;
            args.push(path.into());
        }
        self.run("pdfcpu::merge", args).await?;
        workspace.read(&output).await
    }

    async fn watermark(
        &self,
        pdf: Vec<u8>,
        config: &WatermarkConfig,
    ) -> Result<Vec<u8>, EngineError> {
        let stamp = StampDescriptor::parse(&config.query)?;
        let workspace = Workspace::new()?;
        let input = workspace.write("input.pdf", &pdf).await?;
        let output = workspace.path("stamped.pdf");

        let command = if config.on_top { "stamp" } else { "watermark" };
        let mut args: Vec<OsString> = vec![command.into(), "add".into()];
        if !config.pages.is_empty() {
            args.push("-pages".into());
            args.push(config.pages.join(",").into());
        }
        args.push("-mode".into());
        args.push(stamp.mode.as_str().into());
        args.push("--".into());
        args.push(stamp.content.clone().into());
        args.push(stamp.description().into());
        args.push(input.into());
        args.push(output.clone().into());

        self.run("pdfcpu::watermark", args).await?;
        workspace.read(&output).await
    }

    async fn encrypt(
        &self,
        pdf: Vec<u8>,
        owner_password: &str,
        user_password: &str,
    ) -> Result<Vec<u8>, EngineError> {
        let workspace = Workspace::new()?;
        let input = workspace.write("input.pdf", &pdf).await?;
        let output = workspace.path("encrypted.pdf");

        let mut args: Vec<OsString> = vec![
            "encrypt".into(),
            "-mode".into(),
            "aes".into(),
            "-key".into(),
            "256".into(),
        ];
        if !user_password.is_empty() {
            args.push("-upw".into());
            args.push(user_password.into());
        }
        // The CLI always requires an owner password; a lone user password doubles as it.
        let owner_password = if owner_password.is_empty() {
            user_password
        } else {
            owner_password
        };
        if !owner_password.is_empty() {
            args.push("-opw".into());
            args.push(owner_password.into());
        }
        args.push(input.into());
        args.push(output.clone().into());

        self.run("pdfcpu::encrypt", args).await?;
        workspace.read(&output).await
    }
}
