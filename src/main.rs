use std::{future::IntoFuture, path::Path, process, sync::Arc};

use inkpress::{
    application::{
        convert::ConversionService,
        engine::{BrowserEngine, PdfEngine},
        error::AppError,
    },
    config,
    infra::{
        browser::ChromiumBrowser,
        error::InfraError,
        http::{self, HttpState},
        pdfcpu::PdfCpu,
        telemetry,
    },
};
use tokio::{io::AsyncReadExt, sync::oneshot, time::sleep};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    let browser = Arc::new(ChromiumBrowser::launch(&settings.browser).await?);
    let engine: Arc<dyn BrowserEngine> = browser.clone();
    let pdf: Arc<dyn PdfEngine> = Arc::new(PdfCpu::new(&settings.pdf.cli_path));
    let service =
        ConversionService::new(engine, pdf, &settings.conversions).map_err(InfraError::from)?;

    let result = match command {
        config::Command::Serve(_) => serve_http(&settings, service).await,
        config::Command::Convert(args) => run_job(service, &args, JobKind::Convert).await,
        config::Command::Merge(args) => run_job(service, &args, JobKind::Merge).await,
    };

    // Sessions still winding down keep their own handle; the process exit reaps Chromium then.
    if let Some(browser) = Arc::into_inner(browser) {
        browser.close().await;
    }

    result
}

#[derive(Debug, Clone, Copy)]
enum JobKind {
    Convert,
    Merge,
}

async fn run_job(
    service: ConversionService,
    args: &config::JobArgs,
    kind: JobKind,
) -> Result<(), AppError> {
    let body = read_input(&args.input).await?;
    let pdf = match kind {
        JobKind::Convert => service.convert_json(&body).await?,
        JobKind::Merge => service.merge_json(&body).await?,
    };
    tokio::fs::write(&args.output, &pdf)
        .await
        .map_err(InfraError::from)?;

    info!(
        target = "inkpress::cli",
        op = ?kind,
        output = %args.output.display(),
        pdf_bytes = pdf.len(),
        "PDF written"
    );
    Ok(())
}

async fn read_input(path: &Path) -> Result<Vec<u8>, AppError> {
    if path == Path::new("-") {
        let mut body = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut body)
            .await
            .map_err(InfraError::from)?;
        return Ok(body);
    }
    Ok(tokio::fs::read(path).await.map_err(InfraError::from)?)
}

async fn serve_http(settings: &config::Settings, service: ConversionService) -> Result<(), AppError> {
    let body_limit = usize::try_from(settings.server.max_request_bytes.get())
        .map_err(|_| InfraError::configuration("server.max_request_bytes exceeds usize"))?;
    let router = http::build_router(HttpState { service }, body_limit);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "inkpress::http",
        addr = %settings.server.addr,
        "Listening for conversion requests"
    );

    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        })
        .into_future();

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            if signalled_rx.await.is_ok() {
                sleep(grace).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            warn!(
                target = "inkpress::http",
                grace_seconds = grace.as_secs(),
                "Graceful shutdown timed out; dropping in-flight requests"
            );
        }
    }

    info!(target = "inkpress::http", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "inkpress::http", error = %err, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(target = "inkpress::http", error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!(target = "inkpress::http", "Shutdown signal received");
}
