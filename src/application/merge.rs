//! Fan-out rendering of several documents and ordered fan-in into one PDF.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinSet,
};
use tracing::debug;

use crate::{
    application::{
        deadline::{CancelHandle, CancelToken, Deadline},
        engine::{BrowserEngine, EngineError, PdfEngine},
        error::ConversionError,
        postprocess::postprocess,
        scratch::Scratch,
        session,
    },
    domain::options::{ConversionSpec, MergeSpec},
};

type PartResult = (usize, Result<Vec<u8>, ConversionError>);

#[derive(Clone)]
pub struct MergeCoordinator {
    browser: Arc<dyn BrowserEngine>,
    pdf: Arc<dyn PdfEngine>,
    scratch: Scratch,
    workers: Arc<Semaphore>,
    default_timeout: Duration,
}

impl MergeCoordinator {
    /// `concurrency` bounds how many documents render at once across every merge sharing
    /// this coordinator. `default_timeout` applies when a merge carries none; zero is
    /// unbounded.
    pub fn new(
        browser: Arc<dyn BrowserEngine>,
        pdf: Arc<dyn PdfEngine>,
        scratch: Scratch,
        concurrency: usize,
        default_timeout: Duration,
    ) -> Self {
        Self {
            browser,
            pdf,
            scratch,
            workers: Arc::new(Semaphore::new(concurrency.max(1))),
            default_timeout,
        }
    }

    pub async fn merge(
        &self,
        mut spec: MergeSpec,
        cancel: CancelToken,
    ) -> Result<Vec<u8>, ConversionError> {
        spec.clear_document_credentials();
        if spec.documents.is_empty() {
            return Err(ConversionError::NoSource);
        }

        let timeout = if spec.timeout.is_zero() {
            self.default_timeout
        } else {
            spec.timeout
        };
        let deadline = Deadline::after(timeout, cancel);

        let (siblings, token) = CancelHandle::new();
        let count = spec.documents.len();
        let (tx, mut rx) = mpsc::channel::<PartResult>(count);
        let mut tasks = JoinSet::new();
        for (index, document) in std::mem::take(&mut spec.documents).into_iter().enumerate() {
            tasks.spawn(render_part(
                self.clone(),
                index,
                document,
                token.clone(),
                tx.clone(),
            ));
        }
        drop(tx);

        let collected = deadline
            .run(async {
                let mut slots: Vec<Option<Vec<u8>>> = vec![None; count];
                for _ in 0..count {
                    match rx.recv().await {
                        Some((index, Ok(pdf))) => slots[index] = Some(pdf),
                        Some((index, Err(err))) => {
                            debug!(
                                target = "inkpress::application::merge",
                                op = "merge::collect",
                                result = "error",
                                index,
                                error = %err,
                                "Merge part failed"
                            );
                            return Err(err);
                        }
                        None => break,
                    }
                }
                slots
                    .into_iter()
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| {
                        ConversionError::Engine(EngineError::browser(
                            "a merge part ended without a result",
                        ))
                    })
            })
            .await;

        // Parts still in flight wind down on cancellation and close their pages.
        siblings.cancel();
        tasks.detach_all();

        let parts = collected.map_err(|_| ConversionError::Timeout)??;
        debug!(
            target = "inkpress::application::merge",
            op = "merge::collect",
            result = "ok",
            parts = parts.len(),
            "Merge parts collected"
        );

        deadline
            .run(async {
                let merged = self.pdf.merge(parts).await?;
                postprocess(
                    self.pdf.as_ref(),
                    merged,
                    &spec.owner_password,
                    &spec.user_password,
                    spec.watermark.as_ref(),
                )
                .await
            })
            .await
            .map_err(|_| ConversionError::Timeout)?
            .map_err(ConversionError::from)
    }
}

async fn render_part(
    coordinator: MergeCoordinator,
    index: usize,
    document: ConversionSpec,
    token: CancelToken,
    results: mpsc::Sender<PartResult>,
) {
    let waiting = Deadline::unbounded(token.clone());
    let Ok(Ok(_permit)) = waiting.run(coordinator.workers.clone().acquire_owned()).await else {
        return;
    };

    let result = match session::render(
        coordinator.browser.as_ref(),
        &coordinator.scratch,
        &document,
        token,
    )
    .await
    {
        Ok(pdf) => postprocess(
            coordinator.pdf.as_ref(),
            pdf,
            "",
            "",
            document.watermark.as_ref(),
        )
        .await
        .map_err(ConversionError::from),
        Err(err) => Err(err),
    };
    let _ = results.send((index, result)).await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::{sync::oneshot, time::sleep};

    use super::*;
    use crate::{
        application::{
            engine::{BrowserPage, NodeHandle, PageSetup, ReadinessSignal},
            postprocess::tests::FakePdf,
        },
        domain::options::{PrintParams, WaitUntil, WatermarkConfig},
    };

    /// Pages render their URL back as bytes after the delay encoded in it
    /// (`doc-<n>-<delay ms>`). URLs containing `fail` fail to print.
    #[derive(Debug, Clone, Default)]
    struct ScriptedBrowser {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    struct ScriptedPage {
        browser: ScriptedBrowser,
        url: String,
    }

    #[async_trait]
    impl BrowserEngine for ScriptedBrowser {
        async fn open_page(&self) -> Result<Box<dyn BrowserPage>, EngineError> {
            Ok(Box::new(ScriptedPage {
                browser: self.clone(),
                url: String::new(),
            }))
        }
    }

    #[async_trait]
    impl BrowserPage for ScriptedPage {
        async fn configure(&mut self, _setup: &PageSetup) -> Result<(), EngineError> {
            Ok(())
        }

        async fn subscribe(&mut self, _event: WaitUntil) -> Result<ReadinessSignal, EngineError> {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(());
            Ok(rx)
        }

        async fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
            self.url = url.to_string();
            Ok(())
        }

        async fn wait_for_selector(&mut self, _selector: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn outer_html(&mut self, _selector: &str) -> Result<String, EngineError> {
            Ok(String::new())
        }

        async fn body(&mut self) -> Result<Option<NodeHandle>, EngineError> {
            Ok(None)
        }

        async fn set_outer_html(
            &mut self,
            _node: NodeHandle,
            _html: &str,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        async fn print_to_pdf(&mut self, _params: &PrintParams) -> Result<Vec<u8>, EngineError> {
            let active = self.browser.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.browser.peak.fetch_max(active, Ordering::SeqCst);
            let delay = self
                .url
                .rsplit('-')
                .next()
                .and_then(|ms| ms.parse().ok())
                .unwrap_or(0);
            sleep(Duration::from_millis(delay)).await;
            self.browser.active.fetch_sub(1, Ordering::SeqCst);
            if self.url.contains("fail") {
                return Err(EngineError::browser(format!("cannot print {}", self.url)));
            }
            Ok(self.url.clone().into_bytes())
        }

        async fn close(self: Box<Self>) -> Result<(), EngineError> {
            self.browser.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn document(url: String) -> ConversionSpec {
        ConversionSpec {
            url,
            owner_password: "part-secret".into(),
            ..Default::default()
        }
    }

    fn coordinator(
        browser: &ScriptedBrowser,
        pdf: &FakePdf,
        dir: &TempDir,
        concurrency: usize,
    ) -> MergeCoordinator {
        MergeCoordinator::new(
            Arc::new(browser.clone()),
            Arc::new(pdf.clone()),
            Scratch::new(dir.path()).expect("scratch"),
            concurrency,
            Duration::ZERO,
        )
    }

    /// Deterministic permutations of 0..n from a seed.
    fn shuffled(n: usize, seed: u64) -> Vec<u64> {
        let mut order: Vec<u64> = (0..n as u64).collect();
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        for i in (1..n).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            order.swap(i, (state % (i as u64 + 1)) as usize);
        }
        order
    }

    #[tokio::test(start_paused = true)]
    async fn parts_are_merged_in_input_order_regardless_of_completion() {
        for seed in 1..=8 {
            let dir = TempDir::new().expect("temp dir");
            let browser = ScriptedBrowser::default();
            let pdf = FakePdf::default();
            let merger = coordinator(&browser, &pdf, &dir, 8);

            let delays = shuffled(6, seed);
            let documents = delays
                .iter()
                .enumerate()
                .map(|(i, delay)| document(format!("https://docs.test/doc-{i}-{}", delay * 10)))
                .collect();
            let spec = MergeSpec {
                documents,
                ..Default::default()
            };

            let merged = merger
                .merge(spec, CancelToken::never())
                .await
                .expect("merged");
            let expected = (0..6)
                .map(|i| format!("https://docs.test/doc-{i}-{}", delays[i] * 10))
                .collect::<Vec<_>>()
                .join("|");
            assert_eq!(String::from_utf8(merged).expect("utf8"), expected, "seed {seed}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_error_wins_and_skips_engine_merge() {
        let dir = TempDir::new().expect("temp dir");
        let browser = ScriptedBrowser::default();
        let pdf = FakePdf::default();
        let merger = coordinator(&browser, &pdf, &dir, 5);

        let documents = (0..5)
            .map(|i| {
                if i == 2 {
                    document("https://docs.test/fail-10".into())
                } else {
                    document(format!("https://docs.test/doc-{i}-10000"))
                }
            })
            .collect();
        let spec = MergeSpec {
            documents,
            ..Default::default()
        };

        let started = tokio::time::Instant::now();
        let err = merger
            .merge(spec, CancelToken::never())
            .await
            .expect_err("part 2 fails");
        match err {
            ConversionError::Engine(EngineError::Browser { message }) => {
                assert!(message.contains("fail-10"), "{message}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(pdf.calls().iter().all(|call| !call.starts_with("merge")));

        // Cancelled siblings still close their pages.
        sleep(Duration::from_millis(1)).await;
        assert_eq!(browser.closed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn merge_deadline_yields_timeout() {
        let dir = TempDir::new().expect("temp dir");
        let browser = ScriptedBrowser::default();
        let pdf = FakePdf::default();
        let merger = coordinator(&browser, &pdf, &dir, 4);

        let spec = MergeSpec {
            documents: vec![
                document("https://docs.test/doc-0-10".into()),
                document("https://docs.test/doc-1-60000".into()),
            ],
            timeout: Duration::from_millis(500),
            ..Default::default()
        };

        let err = merger
            .merge(spec, CancelToken::never())
            .await
            .expect_err("merge times out");
        assert!(matches!(err, ConversionError::Timeout), "{err:?}");
        assert!(pdf.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn worker_pool_bounds_concurrent_renders() {
        let dir = TempDir::new().expect("temp dir");
        let browser = ScriptedBrowser::default();
        let pdf = FakePdf::default();
        let merger = coordinator(&browser, &pdf, &dir, 2);

        let spec = MergeSpec {
            documents: (0..6)
                .map(|i| document(format!("https://docs.test/doc-{i}-100")))
                .collect(),
            ..Default::default()
        };

        merger
            .merge(spec, CancelToken::never())
            .await
            .expect("merged");
        assert_eq!(browser.peak.load(Ordering::SeqCst), 2);
        assert_eq!(browser.closed.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn security_applies_once_to_the_merged_document() {
        let dir = TempDir::new().expect("temp dir");
        let browser = ScriptedBrowser::default();
        let pdf = FakePdf::default();
        let merger = coordinator(&browser, &pdf, &dir, 4);

        let mut first = document("https://docs.test/doc-0-5".into());
        first.watermark = Some(WatermarkConfig {
            query: "PART".into(),
            ..Default::default()
        });
        let spec = MergeSpec {
            documents: vec![first, document("https://docs.test/doc-1-1".into())],
            owner_password: "owner".into(),
            user_password: "user".into(),
            watermark: Some(WatermarkConfig {
                query: "MERGED".into(),
                on_top: true,
                pages: vec!["1".into()],
            }),
            ..Default::default()
        };

        let merged = merger
            .merge(spec, CancelToken::never())
            .await
            .expect("merged");
        assert_eq!(
            String::from_utf8(merged).expect("utf8"),
            "https://docs.test/doc-0-5+wm|https://docs.test/doc-1-1+wm+aes"
        );
        assert_eq!(
            pdf.calls(),
            vec!["watermark PART", "merge 2", "watermark MERGED", "encrypt owner/user"]
        );
    }

    #[tokio::test]
    async fn empty_merge_has_no_source() {
        let dir = TempDir::new().expect("temp dir");
        let merger = coordinator(&ScriptedBrowser::default(), &FakePdf::default(), &dir, 1);
        let err = merger
            .merge(MergeSpec::default(), CancelToken::never())
            .await
            .expect_err("nothing to merge");
        assert!(matches!(err, ConversionError::NoSource));
    }
}
