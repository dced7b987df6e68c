use std::path::Path;

use async_trait::async_trait;
use urlpdf_core::convert::ConvertRequest;

use crate::error::RenderError;
use crate::render::RenderPipeline;

/// Executes one claimed job, producing the PDF at `output`.
///
/// The scheduler only depends on this trait, so it can run the real browser
/// pipeline in production and a scripted runner in tests.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, request: &ConvertRequest, output: &Path) -> Result<(), RenderError>;
}

#[async_trait]
impl JobRunner for RenderPipeline {
    async fn run(&self, request: &ConvertRequest, output: &Path) -> Result<(), RenderError> {
        self.render(request, output).await
    }
}
