use tracing::debug;

use crate::{
    application::engine::{EngineError, PdfEngine},
    domain::options::WatermarkConfig,
};

/// Apply the watermark, then encryption, to a finished document.
///
/// Without a watermark and without passwords the bytes come back untouched.
pub async fn postprocess(
    pdf_engine: &dyn PdfEngine,
    pdf: Vec<u8>,
    owner_password: &str,
    user_password: &str,
    watermark: Option<&WatermarkConfig>,
) -> Result<Vec<u8>, EngineError> {
    let mut pdf = pdf;
    if let Some(config) = watermark {
        debug!(
            target = "inkpress::application::postprocess",
            op = "postprocess::watermark",
            on_top = config.on_top,
            pages = config.pages.len(),
            "Applying watermark"
        );
        pdf = pdf_engine.watermark(pdf, config).await?;
    }
    if !owner_password.is_empty() || !user_password.is_empty() {
        debug!(
            target = "inkpress::application::postprocess",
            op = "postprocess::encrypt",
            "Encrypting document"
        );
        pdf = pdf_engine.encrypt(pdf, owner_password, user_password).await?;
    }
    Ok(pdf)
}
