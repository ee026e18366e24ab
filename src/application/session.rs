//! Drives one browser page from a blank tab to PDF bytes.
//!
//! The pipeline is an explicit state machine. [`next_stage`] is the transition table;
//! [`RenderSession::step`] performs the work of the current stage and moves to the next
//! one, to [`SessionState::Done`], or to [`SessionState::Failed`].

use std::{future::Future, time::Instant};

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::{
    application::{
        deadline::{CancelToken, Deadline},
        engine::{BrowserEngine, BrowserPage, EngineError, PageSetup, ReadinessSignal},
        error::ConversionError,
        scratch::{Scratch, ScratchFile},
    },
    domain::options::{ConversionSpec, Source},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Configuring,
    Navigating,
    WaitingReady,
    WaitingSelector,
    Delaying,
    ExtractingSelector,
    Rendering,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Configuring => "configuring",
            Stage::Navigating => "navigating",
            Stage::WaitingReady => "waiting_ready",
            Stage::WaitingSelector => "waiting_selector",
            Stage::Delaying => "delaying",
            Stage::ExtractingSelector => "extracting_selector",
            Stage::Rendering => "rendering",
        }
    }
}

#[derive(Debug)]
pub enum SessionState {
    At(Stage),
    Done(Vec<u8>),
    Failed(ConversionError),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::At(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::At(stage) => stage.as_str(),
            SessionState::Done(_) => "done",
            SessionState::Failed(_) => "failed",
        }
    }
}

/// The stage that follows `stage` when it completes successfully.
///
/// Optional stages are skipped when the conversion does not ask for them. `Rendering` only
/// leaves through `Done` or `Failed`, so it maps to itself.
pub fn next_stage(stage: Stage, spec: &ConversionSpec) -> Stage {
    match stage {
        Stage::Init => Stage::Configuring,
        Stage::Configuring => Stage::Navigating,
        Stage::Navigating => Stage::WaitingReady,
        Stage::WaitingReady if spec.wait_for_selector.is_some() => Stage::WaitingSelector,
        Stage::WaitingReady | Stage::WaitingSelector if !spec.delay.is_zero() => Stage::Delaying,
        Stage::WaitingReady | Stage::WaitingSelector | Stage::Delaying
            if spec.selector.is_some() =>
        {
            Stage::ExtractingSelector
        }
        Stage::WaitingReady
        | Stage::WaitingSelector
        | Stage::Delaying
        | Stage::ExtractingSelector
        | Stage::Rendering => Stage::Rendering,
    }
}

/// Open a page and render `spec` on it.
pub async fn render(
    browser: &dyn BrowserEngine,
    scratch: &Scratch,
    spec: &ConversionSpec,
    cancel: CancelToken,
) -> Result<Vec<u8>, ConversionError> {
    if spec.source().is_none() {
        return Err(ConversionError::NoSource);
    }
    let deadline = Deadline::after(spec.timeout, cancel);
    let page = bounded(&deadline, browser.open_page()).await?;
    RenderSession::new(spec, page, scratch, deadline).run().await
}

pub struct RenderSession<'a> {
    spec: &'a ConversionSpec,
    scratch: &'a Scratch,
    page: Box<dyn BrowserPage>,
    deadline: Deadline,
    readiness: Option<ReadinessSignal>,
    staged: Option<ScratchFile>,
    state: SessionState,
}

impl<'a> RenderSession<'a> {
    pub fn new(
        spec: &'a ConversionSpec,
        page: Box<dyn BrowserPage>,
        scratch: &'a Scratch,
        deadline: Deadline,
    ) -> Self {
        Self {
            spec,
            scratch,
            page,
            deadline,
            readiness: None,
            staged: None,
            state: SessionState::At(Stage::Init),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Perform the current stage. Does nothing once the session is terminal.
    pub async fn step(&mut self) {
        let SessionState::At(stage) = self.state else {
            return;
        };
        let started_at = Instant::now();
        let next = match self.execute(stage).await {
            Ok(Some(pdf)) => SessionState::Done(pdf),
            Ok(None) => SessionState::At(next_stage(stage, self.spec)),
            Err(err) => SessionState::Failed(err),
        };
        debug!(
            target = "inkpress::application::session",
            op = "session::step",
            from = stage.as_str(),
            to = next.label(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Render session transition"
        );
        self.state = next;
    }

    /// Step until terminal, then close the page and drop any staged source.
    pub async fn run(mut self) -> Result<Vec<u8>, ConversionError> {
        while !self.state.is_terminal() {
            self.step().await;
        }

        if let Err(err) = self.page.close().await {
            warn!(
                target = "inkpress::application::session",
                op = "session::close",
                result = "error",
                error = %err,
                "Failed to close browser page"
            );
        }
        if let Some(staged) = self.staged.take() {
            staged.release();
        }

        match self.state {
            SessionState::Done(pdf) => Ok(pdf),
            SessionState::Failed(err) => Err(err),
            SessionState::At(_) => Err(ConversionError::Timeout),
        }
    }

    async fn execute(&mut self, stage: Stage) -> Result<Option<Vec<u8>>, ConversionError> {
        let spec = self.spec;
        match stage {
            Stage::Init => {
                if let Source::Html(html) = spec.source().ok_or(ConversionError::NoSource)? {
                    let staged = self
                        .scratch
                        .materialize(html)
                        .await
                        .map_err(ConversionError::Scratch)?;
                    self.staged = Some(staged);
                }
            }
            Stage::Configuring => {
                let setup = PageSetup {
                    viewport_width: spec.viewport_width,
                    viewport_height: spec.viewport_height,
                    block_ads: spec.block_ads,
                    headers: spec.headers.clone(),
                    media: spec.emulate_media,
                };
                bounded(&self.deadline, self.page.configure(&setup)).await?;
                // Subscribed before navigation so a fast page cannot fire the signal unseen.
                let signal = bounded(&self.deadline, self.page.subscribe(spec.wait_until)).await?;
                self.readiness = Some(signal);
            }
            Stage::Navigating => {
                let url = match &self.staged {
                    Some(staged) => staged.url(),
                    None => spec.url.clone(),
                };
                bounded(&self.deadline, self.page.navigate(&url)).await?;
            }
            Stage::WaitingReady => {
                let signal = self
                    .readiness
                    .take()
                    .ok_or_else(|| EngineError::browser("readiness signal was not subscribed"))?;
                let fired = async {
                    signal.await.map_err(|_| {
                        EngineError::browser(format!(
                            "page closed before `{}` fired",
                            spec.wait_until.as_str()
                        ))
                    })
                };
                if spec.wait_until_timeout.is_zero() {
                    bounded(&self.deadline, fired).await?;
                } else {
                    self.deadline
                        .run(timeout(spec.wait_until_timeout, fired))
                        .await
                        .map_err(|_| ConversionError::Timeout)?
                        .map_err(|_| ConversionError::WaitUntilTimeout)??;
                }
            }
            Stage::WaitingSelector => {
                if let Some(selector) = spec.wait_for_selector.as_deref() {
                    let found = self.page.wait_for_selector(selector);
                    if spec.wait_for_selector_timeout.is_zero() {
                        bounded(&self.deadline, found).await?;
                    } else {
                        self.deadline
                            .run(timeout(spec.wait_for_selector_timeout, found))
                            .await
                            .map_err(|_| ConversionError::Timeout)?
                            .map_err(|_| ConversionError::Timeout)??;
                    }
                }
            }
            Stage::Delaying => {
                self.deadline
                    .run(sleep(spec.delay))
                    .await
                    .map_err(|_| ConversionError::Timeout)?;
            }
            Stage::ExtractingSelector => {
                if let Some(selector) = spec.selector.as_deref() {
                    let html = bounded(&self.deadline, self.page.outer_html(selector)).await?;
                    let body = bounded(&self.deadline, self.page.body())
                        .await?
                        .ok_or(ConversionError::NoBody)?;
                    let replacement = format!("<body>{html}</body>");
                    bounded(&self.deadline, self.page.set_outer_html(body, &replacement)).await?;
                }
            }
            Stage::Rendering => {
                let pdf = bounded(&self.deadline, self.page.print_to_pdf(&spec.print)).await?;
                return Ok(Some(pdf));
            }
        }
        Ok(None)
    }
}

/// Run an engine call under the deadline; expiry becomes [`ConversionError::Timeout`].
async fn bounded<T, F>(deadline: &Deadline, future: F) -> Result<T, ConversionError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    match deadline.run(future).await {
        Ok(result) => result.map_err(ConversionError::from),
        Err(_) => Err(ConversionError::Timeout),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    use super::*;
    use crate::{
        application::{deadline::CancelHandle, engine::NodeHandle},
        domain::options::{PrintParams, WaitUntil},
    };

    #[derive(Debug, Clone)]
    pub(crate) struct FakePage {
        pub calls: Arc<Mutex<Vec<String>>>,
        /// `None` never fires the readiness signal.
        pub ready_after: Option<Duration>,
        pub selector_after: Option<Duration>,
        pub has_body: bool,
        pub fail_print: bool,
        pub pdf: Vec<u8>,
        pending: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    }

    impl FakePage {
        pub(crate) fn new() -> Self {
            Self {
                calls: Arc::default(),
                ready_after: Some(Duration::ZERO),
                selector_after: Some(Duration::ZERO),
                has_body: true,
                fail_print: false,
                pdf: b"%PDF-fake".to_vec(),
                pending: Arc::default(),
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().expect("calls lock").push(call.into());
        }
    }

    #[async_trait]
    impl BrowserPage for FakePage {
        async fn configure(&mut self, setup: &PageSetup) -> Result<(), EngineError> {
            self.record(format!(
                "configure {}x{} {}",
                setup.viewport_width,
                setup.viewport_height,
                setup.media.as_str()
            ));
            Ok(())
        }

        async fn subscribe(&mut self, event: WaitUntil) -> Result<ReadinessSignal, EngineError> {
            self.record(format!("subscribe {}", event.as_str()));
            let (tx, rx) = oneshot::channel();
            *self.pending.lock().expect("pending lock") = Some(tx);
            Ok(rx)
        }

        async fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
            self.record(format!("navigate {url}"));
            // Only a listener registered before navigation observes the event.
            if let Some(delay) = self.ready_after {
                if let Some(tx) = self.pending.lock().expect("pending lock").take() {
                    tokio::spawn(async move {
                        sleep(delay).await;
                        let _ = tx.send(());
                    });
                }
            }
            Ok(())
        }

        async fn wait_for_selector(&mut self, selector: &str) -> Result<(), EngineError> {
            self.record(format!("wait_for_selector {selector}"));
            match self.selector_after {
                Some(delay) => sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
            Ok(())
        }

        async fn outer_html(&mut self, selector: &str) -> Result<String, EngineError> {
            self.record(format!("outer_html {selector}"));
            Ok("<div id=\"report\">hi</div>".to_string())
        }

        async fn body(&mut self) -> Result<Option<NodeHandle>, EngineError> {
            self.record("body");
            Ok(self.has_body.then_some(NodeHandle(7)))
        }

        async fn set_outer_html(
            &mut self,
            node: NodeHandle,
            html: &str,
        ) -> Result<(), EngineError> {
            self.record(format!("set_outer_html {} {html}", node.0));
            Ok(())
        }

        async fn print_to_pdf(&mut self, _params: &PrintParams) -> Result<Vec<u8>, EngineError> {
            self.record("print");
            if self.fail_print {
                return Err(EngineError::browser("printing failed"));
            }
            Ok(self.pdf.clone())
        }

        async fn close(self: Box<Self>) -> Result<(), EngineError> {
            self.record("close");
            Ok(())
        }
    }

    fn html_spec() -> ConversionSpec {
        ConversionSpec {
            html: "<p>hello</p>".into(),
            ..Default::default()
        }
    }

    async fn run_session(
        spec: &ConversionSpec,
        page: FakePage,
        scratch: &Scratch,
    ) -> Result<Vec<u8>, ConversionError> {
        let deadline = Deadline::after(spec.timeout, CancelToken::never());
        RenderSession::new(spec, Box::new(page), scratch, deadline)
            .run()
            .await
    }

    #[test]
    fn transition_table_visits_only_requested_stages() {
        let plain = ConversionSpec::default();
        assert_eq!(next_stage(Stage::Init, &plain), Stage::Configuring);
        assert_eq!(next_stage(Stage::Configuring, &plain), Stage::Navigating);
        assert_eq!(next_stage(Stage::Navigating, &plain), Stage::WaitingReady);
        assert_eq!(next_stage(Stage::WaitingReady, &plain), Stage::Rendering);

        let full = ConversionSpec {
            wait_for_selector: Some("#ready".into()),
            delay: Duration::from_millis(5),
            selector: Some("#report".into()),
            ..Default::default()
        };
        assert_eq!(next_stage(Stage::WaitingReady, &full), Stage::WaitingSelector);
        assert_eq!(next_stage(Stage::WaitingSelector, &full), Stage::Delaying);
        assert_eq!(next_stage(Stage::Delaying, &full), Stage::ExtractingSelector);
        assert_eq!(next_stage(Stage::ExtractingSelector, &full), Stage::Rendering);

        let extract_only = ConversionSpec {
            selector: Some("main".into()),
            ..Default::default()
        };
        assert_eq!(
            next_stage(Stage::WaitingReady, &extract_only),
            Stage::ExtractingSelector
        );
    }

    #[tokio::test(start_paused = true)]
    async fn html_source_renders_from_staged_file() {
        let dir = TempDir::new().expect("temp dir");
        let scratch = Scratch::new(dir.path()).expect("scratch");
        let page = FakePage::new();

        let pdf = run_session(&html_spec(), page.clone(), &scratch)
            .await
            .expect("pdf");
        assert_eq!(pdf, b"%PDF-fake");

        let calls = page.calls();
        assert_eq!(calls[0], "configure 1920x1080 screen");
        assert_eq!(calls[1], "subscribe load");
        assert!(calls[2].starts_with("navigate file://"), "{calls:?}");
        assert_eq!(calls[3..], ["print".to_string(), "close".to_string()]);

        let leftover = std::fs::read_dir(dir.path()).expect("read dir").count();
        assert_eq!(leftover, 0, "staged html should be removed");
    }

    #[tokio::test(start_paused = true)]
    async fn url_source_is_navigated_directly() {
        let dir = TempDir::new().expect("temp dir");
        let scratch = Scratch::new(dir.path()).expect("scratch");
        let page = FakePage::new();
        let spec = ConversionSpec {
            url: "https://example.com/report".into(),
            wait_until: WaitUntil::Dom,
            ..Default::default()
        };

        run_session(&spec, page.clone(), &scratch)
            .await
            .expect("pdf");
        let calls = page.calls();
        assert!(calls.contains(&"subscribe dom".to_string()));
        assert!(calls.contains(&"navigate https://example.com/report".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timer_yields_wait_until_timeout() {
        let dir = TempDir::new().expect("temp dir");
        let scratch = Scratch::new(dir.path()).expect("scratch");
        let mut page = FakePage::new();
        page.ready_after = None;
        let spec = ConversionSpec {
            wait_until_timeout: Duration::from_millis(200),
            timeout: Duration::from_secs(10),
            ..html_spec()
        };

        let err = run_session(&spec, page.clone(), &scratch)
            .await
            .expect_err("wait should time out");
        assert!(matches!(err, ConversionError::WaitUntilTimeout), "{err:?}");
        assert_eq!(page.calls().last().map(String::as_str), Some("close"));
    }

    #[tokio::test(start_paused = true)]
    async fn session_deadline_yields_timeout() {
        let dir = TempDir::new().expect("temp dir");
        let scratch = Scratch::new(dir.path()).expect("scratch");
        let mut page = FakePage::new();
        page.ready_after = None;
        let spec = ConversionSpec {
            timeout: Duration::from_millis(300),
            ..html_spec()
        };

        let err = run_session(&spec, page.clone(), &scratch)
            .await
            .expect_err("session should time out");
        assert!(matches!(err, ConversionError::Timeout), "{err:?}");
        assert_eq!(page.calls().last().map(String::as_str), Some("close"));
        assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_deadline_beats_longer_readiness_timer() {
        let dir = TempDir::new().expect("temp dir");
        let scratch = Scratch::new(dir.path()).expect("scratch");
        let mut page = FakePage::new();
        page.ready_after = None;
        let spec = ConversionSpec {
            timeout: Duration::from_millis(100),
            wait_until_timeout: Duration::from_secs(5),
            ..html_spec()
        };

        let err = run_session(&spec, page, &scratch)
            .await
            .expect_err("session should time out");
        assert!(matches!(err, ConversionError::Timeout), "{err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_selector_times_out() {
        let dir = TempDir::new().expect("temp dir");
        let scratch = Scratch::new(dir.path()).expect("scratch");
        let mut page = FakePage::new();
        page.selector_after = None;
        let spec = ConversionSpec {
            wait_for_selector: Some("#ready".into()),
            wait_for_selector_timeout: Duration::from_millis(50),
            ..html_spec()
        };

        let err = run_session(&spec, page, &scratch)
            .await
            .expect_err("selector wait should time out");
        assert!(matches!(err, ConversionError::Timeout), "{err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn delay_pauses_after_readiness() {
        let dir = TempDir::new().expect("temp dir");
        let scratch = Scratch::new(dir.path()).expect("scratch");
        let spec = ConversionSpec {
            delay: Duration::from_millis(750),
            ..html_spec()
        };

        let started = tokio::time::Instant::now();
        run_session(&spec, FakePage::new(), &scratch)
            .await
            .expect("pdf");
        assert!(started.elapsed() >= Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn selector_extraction_replaces_body() {
        let dir = TempDir::new().expect("temp dir");
        let scratch = Scratch::new(dir.path()).expect("scratch");
        let page = FakePage::new();
        let spec = ConversionSpec {
            selector: Some("#report".into()),
            ..html_spec()
        };

        run_session(&spec, page.clone(), &scratch)
            .await
            .expect("pdf");
        let calls = page.calls();
        assert!(calls.contains(&"outer_html #report".to_string()));
        assert!(calls.contains(&"set_outer_html 7 <body><div id=\"report\">hi</div></body>".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn selector_extraction_without_body_fails() {
        let dir = TempDir::new().expect("temp dir");
        let scratch = Scratch::new(dir.path()).expect("scratch");
        let mut page = FakePage::new();
        page.has_body = false;
        let spec = ConversionSpec {
            selector: Some("#report".into()),
            ..html_spec()
        };

        let err = run_session(&spec, page.clone(), &scratch)
            .await
            .expect_err("no body");
        assert!(matches!(err, ConversionError::NoBody), "{err:?}");
        assert!(!page.calls().contains(&"print".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn engine_failures_pass_through() {
        let dir = TempDir::new().expect("temp dir");
        let scratch = Scratch::new(dir.path()).expect("scratch");
        let mut page = FakePage::new();
        page.fail_print = true;

        let err = run_session(&html_spec(), page.clone(), &scratch)
            .await
            .expect_err("print fails");
        match err {
            ConversionError::Engine(EngineError::Browser { message }) => {
                assert_eq!(message, "printing failed")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(page.calls().last().map(String::as_str), Some("close"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_reported_as_timeout() {
        let dir = TempDir::new().expect("temp dir");
        let scratch = Scratch::new(dir.path()).expect("scratch");
        let mut page = FakePage::new();
        page.ready_after = None;
        let spec = html_spec();
        let (handle, token) = CancelHandle::new();

        let deadline = Deadline::after(spec.timeout, token);
        let session = RenderSession::new(&spec, Box::new(page), &scratch, deadline);
        let task = async move { session.run().await };
        let canceller = async move {
            sleep(Duration::from_millis(10)).await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(task, canceller);
        assert!(matches!(result, Err(ConversionError::Timeout)), "{result:?}");
    }

    #[tokio::test]
    async fn missing_source_fails_before_configuring() {
        let dir = TempDir::new().expect("temp dir");
        let scratch = Scratch::new(dir.path()).expect("scratch");
        let page = FakePage::new();

        let err = run_session(&ConversionSpec::default(), page.clone(), &scratch)
            .await
            .expect_err("no source");
        assert!(matches!(err, ConversionError::NoSource));
        assert_eq!(page.calls(), vec!["close".to_string()]);
    }
}
