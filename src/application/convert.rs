//! Entry points used by the HTTP layer and the CLI: one document or a merge.

use std::{future::Future, io, sync::Arc, time::Instant};

use tracing::{info, warn};

use crate::{
    application::{
        deadline::{CancelHandle, CancelToken},
        engine::{BrowserEngine, EngineError, PdfEngine},
        error::ConversionError,
        merge::MergeCoordinator,
        postprocess::postprocess,
        resolve,
        scratch::Scratch,
        session,
    },
    config::ConversionSettings,
    domain::options::{ConversionSpec, MergeSpec},
};

const SOURCE: &str = "inkpress::application::convert";

#[derive(Clone)]
pub struct ConversionService {
    browser: Arc<dyn BrowserEngine>,
    pdf: Arc<dyn PdfEngine>,
    scratch: Scratch,
    merger: MergeCoordinator,
}

impl ConversionService {
    pub fn new(
        browser: Arc<dyn BrowserEngine>,
        pdf: Arc<dyn PdfEngine>,
        settings: &ConversionSettings,
    ) -> io::Result<Self> {
        let scratch = Scratch::new(&settings.scratch_dir)?;
        let merger = MergeCoordinator::new(
            browser.clone(),
            pdf.clone(),
            scratch.clone(),
            settings.merge_concurrency.get() as usize,
            settings.merge_timeout,
        );
        Ok(Self {
            browser,
            pdf,
            scratch,
            merger,
        })
    }

    /// Resolve a conversion request body and render it.
    pub async fn convert_json(&self, body: &[u8]) -> Result<Vec<u8>, ConversionError> {
        let spec = resolve::conversion_from_slice(body)?;
        self.convert(spec).await
    }

    /// Resolve a merge request body and render it.
    pub async fn merge_json(&self, body: &[u8]) -> Result<Vec<u8>, ConversionError> {
        let spec = resolve::merge_from_slice(body)?;
        self.merge(spec).await
    }

    /// Render one document, then apply its watermark and encryption.
    pub async fn convert(&self, spec: ConversionSpec) -> Result<Vec<u8>, ConversionError> {
        let service = self.clone();
        self.observe("convert", move |cancel| async move {
            let pdf = session::render(service.browser.as_ref(), &service.scratch, &spec, cancel)
                .await?;
            postprocess(
                service.pdf.as_ref(),
                pdf,
                &spec.owner_password,
                &spec.user_password,
                spec.watermark.as_ref(),
            )
            .await
            .map_err(ConversionError::from)
        })
        .await
    }

    pub async fn merge(&self, spec: MergeSpec) -> Result<Vec<u8>, ConversionError> {
        metrics::histogram!("inkpress_merge_documents").record(spec.documents.len() as f64);
        let merger = self.merger.clone();
        self.observe("merge", move |cancel| async move {
            merger.merge(spec, cancel).await
        })
        .await
    }

    /// Run `work` on its own task. Dropping the returned future cancels the work, which
    /// then unwinds and closes its pages.
    async fn observe<W, F>(&self, kind: &'static str, work: W) -> Result<Vec<u8>, ConversionError>
    where
        W: FnOnce(CancelToken) -> F,
        F: Future<Output = Result<Vec<u8>, ConversionError>> + Send + 'static,
    {
        let started_at = Instant::now();
        let (guard, token) = CancelHandle::new();
        let result = match tokio::spawn(work(token)).await {
            Ok(result) => result,
            Err(err) => Err(ConversionError::Engine(EngineError::browser(format!(
                "{kind} task failed: {err}"
            )))),
        };
        drop(guard);

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        metrics::histogram!("inkpress_conversion_ms", "kind" => kind).record(elapsed_ms as f64);
        match &result {
            Ok(pdf) => {
                metrics::counter!("inkpress_conversions_total", "kind" => kind).increment(1);
                info!(
                    target = SOURCE,
                    op = kind,
                    result = "ok",
                    elapsed_ms,
                    pdf_bytes = pdf.len(),
                    "Conversion finished"
                );
            }
            Err(err) => {
                metrics::counter!(
                    "inkpress_conversion_failures_total",
                    "kind" => kind,
                    "code" => err.code()
                )
                .increment(1);
                warn!(
                    target = SOURCE,
                    op = kind,
                    result = "error",
                    elapsed_ms,
                    error_code = err.code(),
                    error = %err,
                    "Conversion failed"
                );
            }
        }
        result
    }
}
