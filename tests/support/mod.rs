//! In-memory engines standing in for Chromium and pdfcpu.

#![allow(dead_code)]

use std::{
    num::NonZeroU32,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::Router;
use inkpress::{
    application::{
        convert::ConversionService,
        engine::{
            BrowserEngine, BrowserPage, EngineError, NodeHandle, PageSetup, PdfEngine,
            ReadinessSignal,
        },
    },
    config::ConversionSettings,
    domain::options::{PrintParams, WaitUntil, WatermarkConfig},
    infra::http::{HttpState, build_router},
};
use tempfile::TempDir;
use tokio::sync::oneshot;

/// Pages print `%PDF:` followed by the document they navigated to: the staged HTML for
/// inline sources, the URL otherwise. Documents mentioning `explode` fail to print.
#[derive(Debug, Clone, Default)]
pub struct StubBrowser {
    pub opened: Arc<Mutex<usize>>,
    pub closed: Arc<Mutex<usize>>,
}

struct StubPage {
    browser: StubBrowser,
    ready: Option<oneshot::Sender<()>>,
    document: String,
}

#[async_trait]
impl BrowserEngine for StubBrowser {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>, EngineError> {
        *self.opened.lock().expect("opened lock") += 1;
        Ok(Box::new(StubPage {
            browser: self.clone(),
            ready: None,
            document: String::new(),
        }))
    }
}

#[async_trait]
impl BrowserPage for StubPage {
    async fn configure(&mut self, _setup: &PageSetup) -> Result<(), EngineError> {
        Ok(())
    }

    async fn subscribe(&mut self, _event: WaitUntil) -> Result<ReadinessSignal, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.ready = Some(tx);
        Ok(rx)
    }

    async fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
        self.document = match url.strip_prefix("file://") {
            Some(path) => tokio::fs::read_to_string(path).await?,
            None => url.to_string(),
        };
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(());
        }
        Ok(())
    }

    async fn wait_for_selector(&mut self, _selector: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn outer_html(&mut self, _selector: &str) -> Result<String, EngineError> {
        Ok(self.document.clone())
    }

    async fn body(&mut self) -> Result<Option<NodeHandle>, EngineError> {
        Ok(Some(NodeHandle(1)))
    }

    async fn set_outer_html(&mut self, _node: NodeHandle, html: &str) -> Result<(), EngineError> {
        self.document = html.to_string();
        Ok(())
    }

    async fn print_to_pdf(&mut self, _params: &PrintParams) -> Result<Vec<u8>, EngineError> {
        if self.document.contains("explode") {
            return Err(EngineError::browser("renderer crashed"));
        }
        Ok(format!("%PDF:{}", self.document).into_bytes())
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        *self.browser.closed.lock().expect("closed lock") += 1;
        Ok(())
    }
}

/// Joins merged parts with `|` and tags watermark and encryption passes.
#[derive(Debug, Clone, Default)]
pub struct StubPdf;

#[async_trait]
impl PdfEngine for StubPdf {
    async fn merge(&self, parts: Vec<Vec<u8>>) -> Result<Vec<u8>, EngineError> {
        Ok(parts.join(&b'|'))
    }

    async fn watermark(
        &self,
        mut pdf: Vec<u8>,
        config: &WatermarkConfig,
    ) -> Result<Vec<u8>, EngineError> {
        pdf.extend_from_slice(format!("+wm({})", config.query).as_bytes());
        Ok(pdf)
    }

    async fn encrypt(
        &self,
        mut pdf: Vec<u8>,
        _owner_password: &str,
        _user_password: &str,
    ) -> Result<Vec<u8>, EngineError> {
        pdf.extend_from_slice(b"+aes");
        Ok(pdf)
    }
}

pub struct TestApp {
    pub router: Router,
    pub browser: StubBrowser,
    _scratch: TempDir,
}

pub fn test_app(body_limit: usize) -> TestApp {
    let scratch = TempDir::new().expect("temp dir");
    let browser = StubBrowser::default();
    let settings = ConversionSettings {
        scratch_dir: scratch.path().join("html"),
        merge_concurrency: NonZeroU32::new(3).expect("non-zero"),
        merge_timeout: Duration::from_secs(30),
    };
    let service = ConversionService::new(Arc::new(browser.clone()), Arc::new(StubPdf), &settings)
        .expect("conversion service");
    TestApp {
        router: build_router(HttpState { service }, body_limit),
        browser,
        _scratch: scratch,
    }
}
