//! Headless Chromium driven over the DevTools protocol.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::{
        dom::{NodeId, SetOuterHtmlParams},
        emulation::{SetDeviceMetricsOverrideParams, SetEmulatedMediaParams},
        network::{self, Headers, SetExtraHttpHeadersParams},
        page::{
            EventDomContentEventFired, EventLoadEventFired, NavigateParams, PrintToPdfParams,
            SetAdBlockingEnabledParams,
        },
    },
    page::Page,
};
use futures::StreamExt;
use serde_json::Value;
use tokio::{sync::oneshot, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    application::engine::{
        BrowserEngine, BrowserPage, EngineError, NodeHandle, PageSetup, ReadinessSignal,
    },
    config::BrowserSettings,
    domain::options::{PrintParams, WaitUntil},
    infra::error::InfraError,
};

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct ChromiumBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromiumBrowser {
    /// Launch Chromium and spawn the task that pumps its protocol events.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self, InfraError> {
        let mut builder = BrowserConfig::builder()
            .arg("--hide-scrollbars")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--allow-file-access-from-files");
        if let Some(executable) = settings.executable.as_ref() {
            builder = builder.chrome_executable(executable);
        }
        if settings.no_sandbox {
            builder = builder.no_sandbox();
        }
        for arg in &settings.args {
            builder = builder.arg(arg.as_str());
        }
        let config = builder.build().map_err(InfraError::browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| InfraError::browser(err.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(
                        target = "inkpress::infra::browser",
                        op = "browser::handler",
                        error = %err,
                        "Browser event error"
                    );
                }
            }
        });

        info!(
            target = "inkpress::infra::browser",
            op = "browser::launch",
            result = "ok",
            no_sandbox = settings.no_sandbox,
            "Chromium launched"
        );
        Ok(Self { browser, handler })
    }

    /// Close the browser process and wait for it to exit.
    pub async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            warn!(
                target = "inkpress::infra::browser",
                op = "browser::close",
                result = "error",
                error = %err,
                "Failed to close Chromium"
            );
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl BrowserEngine for ChromiumBrowser {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>, EngineError> {
        let page = self.browser.new_page("about:blank").await.map_err(cdp)?;
        Ok(Box::new(ChromiumPage { page }))
    }
}

pub struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn configure(&mut self, setup: &PageSetup) -> Result<(), EngineError> {
        self.page
            .execute(SetDeviceMetricsOverrideParams::new(
                setup.viewport_width,
                setup.viewport_height,
                1.0,
                false,
            ))
            .await
            .map_err(cdp)?;
        self.page
            .execute(SetAdBlockingEnabledParams::new(setup.block_ads))
            .await
            .map_err(cdp)?;
        if !setup.headers.is_empty() {
            self.page
                .execute(network::EnableParams::default())
                .await
                .map_err(cdp)?;
            let headers = Headers::new(Value::Object(setup.headers.clone()));
            self.page
                .execute(SetExtraHttpHeadersParams::new(headers))
                .await
                .map_err(cdp)?;
        }
        self.page
            .execute(SetEmulatedMediaParams {
                media: Some(setup.media.as_str().to_string()),
                ..Default::default()
            })
            .await
            .map_err(cdp)?;
        Ok(())
    }

    async fn subscribe(&mut self, event: WaitUntil) -> Result<ReadinessSignal, EngineError> {
        let (tx, rx) = oneshot::channel();
        match event {
            WaitUntil::Load => {
                let mut events = self
                    .page
                    .event_listener::<EventLoadEventFired>()
                    .await
                    .map_err(cdp)?;
                tokio::spawn(async move {
                    if events.next().await.is_some() {
                        let _ = tx.send(());
                    }
                });
            }
            WaitUntil::Dom => {
                let mut events = self
                    .page
                    .event_listener::<EventDomContentEventFired>()
                    .await
                    .map_err(cdp)?;
                tokio::spawn(async move {
                    if events.next().await.is_some() {
                        let _ = tx.send(());
                    }
                });
            }
        }
        Ok(rx)
    }

    async fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
        let response = self
            .page
            .execute(NavigateParams::new(url))
            .await
            .map_err(cdp)?;
        match response.result.error_text.as_deref() {
            Some(error) if !error.is_empty() => Err(EngineError::browser(format!(
                "navigation to {url} failed: {error}"
            ))),
            _ => Ok(()),
        }
    }

    async fn wait_for_selector(&mut self, selector: &str) -> Result<(), EngineError> {
        loop {
            let found = self.page.find_elements(selector).await.map_err(cdp)?;
            if !found.is_empty() {
                return Ok(());
            }
            sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn outer_html(&mut self, selector: &str) -> Result<String, EngineError> {
        let element = self.page.find_element(selector).await.map_err(cdp)?;
        let html = element.outer_html().await.map_err(cdp)?;
        Ok(html.unwrap_or_default())
    }

    async fn body(&mut self) -> Result<Option<NodeHandle>, EngineError> {
        let bodies = self.page.find_elements("body").await.map_err(cdp)?;
        Ok(bodies
            .first()
            .map(|element| NodeHandle(*element.node_id.inner())))
    }

    async fn set_outer_html(&mut self, node: NodeHandle, html: &str) -> Result<(), EngineError> {
        self.page
            .execute(SetOuterHtmlParams::new(NodeId::new(node.0), html))
            .await
            .map_err(cdp)?;
        Ok(())
    }

    async fn print_to_pdf(&mut self, params: &PrintParams) -> Result<Vec<u8>, EngineError> {
        self.page.pdf(print_to_pdf_params(params)).await.map_err(cdp)
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.page.close().await.map_err(cdp)
    }
}

fn print_to_pdf_params(params: &PrintParams) -> PrintToPdfParams {
    let non_empty = |value: &str| (!value.is_empty()).then(|| value.to_string());
    PrintToPdfParams {
        landscape: Some(params.landscape),
        display_header_footer: Some(params.display_header_footer),
        print_background: Some(params.print_background),
        scale: Some(params.scale),
        paper_width: Some(params.paper_width),
        paper_height: Some(params.paper_height),
        margin_top: Some(params.margins.top),
        margin_bottom: Some(params.margins.bottom),
        margin_left: Some(params.margins.left),
        margin_right: Some(params.margins.right),
        page_ranges: non_empty(&params.page_ranges),
        header_template: non_empty(&params.header_template),
        footer_template: non_empty(&params.footer_template),
        prefer_css_page_size: Some(params.prefer_css_page_size),
        ..Default::default()
    }
}

fn cdp(err: chromiumoxide::error::CdpError) -> EngineError {
    EngineError::browser(err.to_string())
}
