//! Seams to the external rendering and PDF manipulation engines.

use std::io;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::options::{Media, PrintParams, WaitUntil, WatermarkConfig};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("browser error: {message}")]
    Browser { message: String },
    #[error("pdf error: {message}")]
    Pdf { message: String },
    #[error("pdf CLI invocation failed (exit {exit_code:?}): {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("pdf CLI unavailable: {0}")]
    Unavailable(io::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid stamp descriptor `{descriptor}`: {reason}")]
    Descriptor { descriptor: String, reason: String },
}

impl EngineError {
    pub fn browser(message: impl Into<String>) -> Self {
        Self::Browser {
            message: message.into(),
        }
    }

    pub fn pdf(message: impl Into<String>) -> Self {
        Self::Pdf {
            message: message.into(),
        }
    }
}

/// Page settings applied before navigation.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSetup {
    pub viewport_width: i64,
    pub viewport_height: i64,
    pub block_ads: bool,
    pub headers: Map<String, Value>,
    pub media: Media,
}

/// Fires once when the subscribed lifecycle event occurs. A dropped sender means the
/// page went away before the event fired.
pub type ReadinessSignal = oneshot::Receiver<()>;

/// Opaque handle to a DOM node owned by a [`BrowserPage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(pub i64);

/// A browser able to open isolated pages.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>, EngineError>;
}

/// One browser tab driven through a single conversion.
#[async_trait]
pub trait BrowserPage: Send {
    async fn configure(&mut self, setup: &PageSetup) -> Result<(), EngineError>;

    /// Subscribe to a lifecycle event. The subscription must be live when this returns.
    async fn subscribe(&mut self, event: WaitUntil) -> Result<ReadinessSignal, EngineError>;

    async fn navigate(&mut self, url: &str) -> Result<(), EngineError>;

    /// Resolve once `selector` matches an element.
    async fn wait_for_selector(&mut self, selector: &str) -> Result<(), EngineError>;

    async fn outer_html(&mut self, selector: &str) -> Result<String, EngineError>;

    /// The document's `body` element, if it has one.
    async fn body(&mut self) -> Result<Option<NodeHandle>, EngineError>;

    async fn set_outer_html(&mut self, node: NodeHandle, html: &str) -> Result<(), EngineError>;

    async fn print_to_pdf(&mut self, params: &PrintParams) -> Result<Vec<u8>, EngineError>;

    async fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// PDF byte-level operations.
#[async_trait]
pub trait PdfEngine: Send + Sync {
    /// Merge documents in the given order.
    async fn merge(&self, parts: Vec<Vec<u8>>) -> Result<Vec<u8>, EngineError>;

    /// Parse the stamp descriptor and apply it to the selected pages.
    async fn watermark(
        &self,
        pdf: Vec<u8>,
        config: &WatermarkConfig,
    ) -> Result<Vec<u8>, EngineError>;

    /// AES-256 encryption with the given passwords.
    async fn encrypt(
        &self,
        pdf: Vec<u8>,
        owner_password: &str,
        user_password: &str,
    ) -> Result<Vec<u8>, EngineError>;
}
