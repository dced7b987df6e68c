//! URL-to-PDF rendering for a single job.
//!
//! Each render gets its own browser process on a freshly reserved port.
//! The printed document goes to a temp file beside the output, is checked,
//! renamed into place, and then watermarked through a second temp file, so
//! the output path only ever holds a complete PDF.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use urlpdf_chrome::{BrowserSession, LaunchOptions, PortAllocator};
use urlpdf_core::convert::{ConvertRequest, PrintOptions};
use urlpdf_core::watermark::add_watermark;

use crate::error::RenderError;

/// Suffix of the temp file receiving the raw print output.
pub const PRINT_TEMP_SUFFIX: &str = ".print.tmp";

/// Suffix of the temp file receiving the watermarked copy.
pub const WATERMARK_TEMP_SUFFIX: &str = ".wm.tmp";

/// Default number of browser start attempts per render.
pub const DEFAULT_START_ATTEMPTS: u32 = 5;

/// Default pause between navigation and printing.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(6);

/// Tunables for [`RenderPipeline`].
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub launch: LaunchOptions,
    /// Time the page gets to load after `Page.navigate`.
    pub settle_delay: Duration,
    /// Text stamped on every large page; `None` disables watermarking.
    pub watermark_label: Option<String>,
    pub start_attempts: u32,
}

impl RenderConfig {
    pub fn new(launch: LaunchOptions) -> Self {
        Self {
            launch,
            settle_delay: DEFAULT_SETTLE_DELAY,
            watermark_label: None,
            start_attempts: DEFAULT_START_ATTEMPTS,
        }
    }
}

/// Drives a headless browser to turn one URL into one PDF file.
pub struct RenderPipeline {
    allocator: PortAllocator,
    config: RenderConfig,
}

impl RenderPipeline {
    pub fn new(allocator: PortAllocator, config: RenderConfig) -> Self {
        Self { allocator, config }
    }

    /// Render `request.url` to `output`.
    ///
    /// On failure every temp file and any partially installed output are
    /// removed. The browser session is always closed.
    pub async fn render(&self, request: &ConvertRequest, output: &Path) -> Result<(), RenderError> {
        let print_tmp = temp_path(output, PRINT_TEMP_SUFFIX);
        let watermark_tmp = temp_path(output, WATERMARK_TEMP_SUFFIX);

        let result = self
            .render_to(request, output, &print_tmp, &watermark_tmp)
            .await;

        if result.is_err() {
            remove_if_exists(&print_tmp).await;
            remove_if_exists(&watermark_tmp).await;
            remove_if_exists(output).await;
        }
        result
    }

    async fn render_to(
        &self,
        request: &ConvertRequest,
        output: &Path,
        print_tmp: &Path,
        watermark_tmp: &Path,
    ) -> Result<(), RenderError> {
        let options = PrintOptions::resolve(request);
        let pdf = self.print(&request.url, &options).await?;

        tokio::fs::write(print_tmp, &pdf).await?;
        install_print_output(print_tmp, output).await?;

        if let Some(label) = &self.config.watermark_label {
            apply_watermark(output, watermark_tmp, label).await?;
        }
        Ok(())
    }

    /// Open a session, print the page, and close the session regardless of
    /// the outcome.
    async fn print(&self, url: &str, options: &PrintOptions) -> Result<Vec<u8>, RenderError> {
        let mut session = self.open_session().await?;
        let port = session.port();
        tracing::debug!(port, url, "Printing page");

        let printed = print_page(&mut session, url, options, self.config.settle_delay).await;
        session.close().await;
        printed
    }

    /// Start a browser, retrying on a fresh port up to the configured number
    /// of attempts. Running out of ports is not retried.
    async fn open_session(&self) -> Result<BrowserSession, RenderError> {
        let attempts = self.config.start_attempts.max(1);
        let mut attempt = 1;
        loop {
            let reservation = self.allocator.acquire().await?;
            let port = reservation.port();
            match BrowserSession::open(&self.config.launch, reservation).await {
                Ok(session) => return Ok(session),
                Err(e) if attempt < attempts => {
                    tracing::warn!(attempt, port, error = %e, "Browser start failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(attempt, port, error = %e, "Browser start failed");
                    return Err(e.into());
                }
            }
        }
    }
}

async fn print_page(
    session: &mut BrowserSession,
    url: &str,
    options: &PrintOptions,
    settle_delay: Duration,
) -> Result<Vec<u8>, RenderError> {
    session
        .call("Network.setCacheDisabled", json!({ "cacheDisabled": true }))
        .await?;

    let navigated = session.call("Page.navigate", json!({ "url": url })).await?;
    if let Some(error_text) = navigated.get("errorText").and_then(Value::as_str) {
        // The browser still renders its error page; print that.
        tracing::warn!(url, error_text, "Navigation reported an error");
    }

    tokio::time::sleep(settle_delay).await;

    let printed = session
        .call("Page.printToPDF", options.to_print_params())
        .await?;
    let data = printed
        .get("data")
        .and_then(Value::as_str)
        .ok_or(RenderError::MissingData)?;
    Ok(BASE64.decode(data)?)
}

/// Check the raw print output and rename it onto `output`.
async fn install_print_output(print_tmp: &Path, output: &Path) -> Result<(), RenderError> {
    match tokio::fs::metadata(print_tmp).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {}
        _ => return Err(RenderError::EmptyOutput),
    }
    tokio::fs::rename(print_tmp, output).await?;
    Ok(())
}

/// Watermark `output` into `watermark_tmp` on the blocking pool, then rename
/// the result over `output`.
async fn apply_watermark(
    output: &Path,
    watermark_tmp: &Path,
    label: &str,
) -> Result<(), RenderError> {
    let source = output.to_path_buf();
    let destination = watermark_tmp.to_path_buf();
    let label = label.to_string();

    let summary = tokio::task::spawn_blocking(move || add_watermark(&source, &destination, &label))
        .await
        .map_err(|e| RenderError::Join(e.to_string()))??;

    tokio::fs::rename(watermark_tmp, output).await?;
    tracing::debug!(
        pages_marked = summary.pages_marked,
        pages_skipped = summary.pages_skipped,
        "Watermark applied",
    );
    Ok(())
}

/// `<output><suffix>`, in the same directory as `output` so the final rename
/// never crosses filesystems.
pub fn temp_path(output: &Path, suffix: &str) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed leftover render file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use urlpdf_chrome::BrowserError;

    use super::*;

    fn a4_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Content {
            operations: vec![Operation::new("w", vec![Object::Integer(1)])],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => Object::Integer(1),
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn temp_path_appends_suffix() {
        let out = Path::new("/srv/pdf/ABC.pdf");
        assert_eq!(
            temp_path(out, PRINT_TEMP_SUFFIX),
            PathBuf::from("/srv/pdf/ABC.pdf.print.tmp")
        );
        assert_eq!(
            temp_path(out, WATERMARK_TEMP_SUFFIX),
            PathBuf::from("/srv/pdf/ABC.pdf.wm.tmp")
        );
    }

    #[tokio::test]
    async fn empty_print_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("job.pdf.print.tmp");
        let out = dir.path().join("job.pdf");
        tokio::fs::write(&tmp, b"").await.unwrap();

        assert_matches!(
            install_print_output(&tmp, &out).await,
            Err(RenderError::EmptyOutput)
        );
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn missing_print_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            install_print_output(&dir.path().join("nope"), &dir.path().join("job.pdf")).await,
            Err(RenderError::EmptyOutput)
        );
    }

    #[tokio::test]
    async fn print_output_is_renamed_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("job.pdf.print.tmp");
        let out = dir.path().join("job.pdf");
        tokio::fs::write(&tmp, b"%PDF-1.5 body").await.unwrap();

        install_print_output(&tmp, &out).await.unwrap();
        assert!(!tmp.exists());
        assert_eq!(std::fs::read(&out).unwrap(), b"%PDF-1.5 body");
    }

    #[tokio::test]
    async fn watermark_replaces_output_and_cleans_temp() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("job.pdf");
        let wm_tmp = temp_path(&out, WATERMARK_TEMP_SUFFIX);
        let original = a4_pdf();
        std::fs::write(&out, &original).unwrap();

        apply_watermark(&out, &wm_tmp, "Rendered by urlpdf").await.unwrap();

        assert!(!wm_tmp.exists());
        let stamped = std::fs::read(&out).unwrap();
        assert!(stamped.starts_with(b"%PDF-"));
        assert_ne!(stamped, original);
    }

    #[tokio::test]
    async fn watermark_failure_leaves_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("job.pdf");
        let wm_tmp = temp_path(&out, WATERMARK_TEMP_SUFFIX);
        std::fs::write(&out, b"not a pdf").unwrap();

        assert_matches!(
            apply_watermark(&out, &wm_tmp, "label").await,
            Err(RenderError::Watermark(_))
        );
        assert_eq!(std::fs::read(&out).unwrap(), b"not a pdf");
    }

    #[tokio::test]
    async fn unlaunchable_browser_fails_after_all_attempts_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let markers = dir.path().join("markers");
        std::fs::create_dir(&markers).unwrap();
        let out = dir.path().join("job.pdf");

        let allocator = PortAllocator::new(&markers).with_range(19000, 19400, 100);
        let mut config = RenderConfig::new(LaunchOptions::new(dir.path().join("no-browser")));
        config.start_attempts = 2;
        config.settle_delay = Duration::ZERO;
        let pipeline = RenderPipeline::new(allocator, config);

        let result = pipeline
            .render(&ConvertRequest::for_url("https://example.com"), &out)
            .await;

        assert_matches!(
            result,
            Err(RenderError::Browser(BrowserError::LaunchFailed(_)))
        );
        assert!(!out.exists());
        assert!(!temp_path(&out, PRINT_TEMP_SUFFIX).exists());
        assert_eq!(std::fs::read_dir(&markers).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn port_exhaustion_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = PortAllocator::new(dir.path()).with_range(19500, 19500, 0);
        let pipeline = RenderPipeline::new(
            allocator,
            RenderConfig::new(LaunchOptions::new(dir.path().join("no-browser"))),
        );

        let result = pipeline
            .render(
                &ConvertRequest::for_url("https://example.com"),
                &dir.path().join("job.pdf"),
            )
            .await;
        assert_matches!(
            result,
            Err(RenderError::Browser(BrowserError::ResourceExhausted))
        );
    }

    #[test]
    fn error_messages_are_client_readable() {
        assert_eq!(
            RenderError::from(BrowserError::ResourceExhausted).to_string(),
            "Cant find free port"
        );
        assert_eq!(
            RenderError::EmptyOutput.to_string(),
            "Target PDF file is empty or doesnt exist"
        );
    }
}
