use urlpdf_chrome::BrowserError;
use urlpdf_core::watermark::WatermarkError;

/// Everything that can go wrong while rendering one job.
///
/// The `Display` text is what the client sees as the job's `errorMsg`.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Target PDF file is empty or doesnt exist")]
    EmptyOutput,

    #[error("printToPDF returned no data")]
    MissingData,

    #[error("Invalid PDF data from browser: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watermark failed: {0}")]
    Watermark(#[from] WatermarkError),

    #[error("Render task failed: {0}")]
    Join(String),

    #[error("Render task panicked: {0}")]
    Panicked(String),
}
