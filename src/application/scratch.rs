//! Scoped storage for inline HTML sources the browser must load from disk.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Scratch {
    root: PathBuf,
}

impl Scratch {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Write `html` to a uniquely named file under the root.
    pub async fn materialize(&self, html: &str) -> io::Result<ScratchFile> {
        let file = tempfile::Builder::new()
            .prefix("inkpress-")
            .suffix(".html")
            .tempfile_in(&self.root)?;
        let staged = ScratchFile { file };
        tokio::fs::write(staged.path(), html).await?;
        Ok(staged)
    }
}

/// A staged HTML file. Removed on [`ScratchFile::release`] or, failing that, on drop.
#[derive(Debug)]
pub struct ScratchFile {
    file: NamedTempFile,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.file.path().display())
    }

    /// Remove the file. Failures are logged and counted but never fail the conversion.
    pub fn release(self) {
        let path = self.file.path().to_path_buf();
        if let Err(err) = self.file.close() {
            metrics::counter!("inkpress_scratch_cleanup_failures_total").increment(1);
            warn!(
                target = "inkpress::application::scratch",
                op = "scratch::release",
                result = "error",
                path = %path.display(),
                error = %err,
                "Failed to remove staged HTML source"
            );
        }
    }
}
