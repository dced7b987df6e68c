//! Conversion request payload, admission validation, and print defaults.
//!
//! The HTTP layer deserializes a [`ConvertRequest`] from the signed body,
//! calls [`ConvertRequest::validate`] before any job is created, and the
//! render pipeline later turns it into fully-resolved [`PrintOptions`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default paper width in millimetres (A4).
pub const DEFAULT_PAPER_WIDTH_MM: f64 = 210.0;

/// Default paper height in millimetres (A4).
pub const DEFAULT_PAPER_HEIGHT_MM: f64 = 297.0;

/// Upper bound for a default margin, in millimetres.
pub const DEFAULT_MARGIN_CAP_MM: f64 = 20.0;

/// Default margin as a fraction of the corresponding paper dimension.
pub const DEFAULT_MARGIN_RATIO: f64 = 0.15;

/// Inches per millimetre, as expected by the print command.
pub const INCHES_PER_MM: f64 = 0.0393700787;

/// Largest accepted paper dimension, in millimetres.
const MAX_PAPER_DIMENSION_MM: f64 = 5000.0;

/// Longest accepted output file name, in characters.
pub const MAX_FILE_NAME_LEN: usize = 200;

/// Longest accepted target URL, in bytes.
const MAX_URL_LEN: usize = 8192;

/// Longest accepted header/footer template, in bytes.
const MAX_TEMPLATE_LEN: usize = 64 * 1024;

/// Header template used when the request does not provide one.
pub const DEFAULT_HEADER_TEMPLATE: &str = "<div></div>";

/// Footer template used when the request does not provide one: a centred
/// "page N / total" label.
pub const DEFAULT_FOOTER_TEMPLATE: &str = r#"
<p style="font-size:2mm; font-family: Arial, Helvetica, sans-serif; text-align:center; width:100%;">
	<span class="pageNumber"></span> / <span class="totalPages"></span>
</p>
"#;

// ---------------------------------------------------------------------------
// Request payload
// ---------------------------------------------------------------------------

/// Body of `POST /convert`. All lengths are in millimetres.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    pub url: String,
    #[serde(default)]
    pub paper_width: Option<f64>,
    #[serde(default)]
    pub paper_height: Option<f64>,
    #[serde(default)]
    pub margin_top: Option<f64>,
    #[serde(default)]
    pub margin_bottom: Option<f64>,
    #[serde(default)]
    pub margin_left: Option<f64>,
    #[serde(default)]
    pub margin_right: Option<f64>,
    #[serde(default)]
    pub print_background: Option<bool>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl ConvertRequest {
    /// Convenience constructor for a request with only a target URL.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Validate every field. Called before a job record is created.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_url(&self.url)?;

        if let Some(w) = self.paper_width {
            validate_paper_dimension("paperWidth", w)?;
        }
        if let Some(h) = self.paper_height {
            validate_paper_dimension("paperHeight", h)?;
        }
        for (field, value) in [
            ("marginTop", self.margin_top),
            ("marginBottom", self.margin_bottom),
            ("marginLeft", self.margin_left),
            ("marginRight", self.margin_right),
        ] {
            if let Some(v) = value {
                validate_margin(field, v)?;
            }
        }
        for (field, value) in [("header", &self.header), ("footer", &self.footer)] {
            if let Some(t) = value {
                if t.len() > MAX_TEMPLATE_LEN {
                    return Err(CoreError::Validation(format!(
                        "{field} must not exceed {MAX_TEMPLATE_LEN} bytes"
                    )));
                }
            }
        }
        if let Some(name) = &self.file_name {
            validate_file_name(name)?;
        }

        // Margins must leave a printable area.
        let opts = PrintOptions::resolve(self);
        if opts.margin_top + opts.margin_bottom >= opts.paper_height
            || opts.margin_left + opts.margin_right >= opts.paper_width
        {
            return Err(CoreError::Validation(
                "Margins leave no printable area on the page".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Field validation
// ---------------------------------------------------------------------------

/// The target URL must be an absolute `http://` or `https://` URL.
pub fn validate_url(url: &str) -> Result<(), CoreError> {
    if url.len() > MAX_URL_LEN {
        return Err(CoreError::Validation(format!(
            "url must not exceed {MAX_URL_LEN} bytes"
        )));
    }
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    match rest {
        Some(host) if !host.is_empty() && !url.chars().any(char::is_whitespace) => Ok(()),
        _ => Err(CoreError::Validation(
            "url must start with http:// or https://".to_string(),
        )),
    }
}

/// Validate an optional output file name.
///
/// Rules:
/// - Must end in `.pdf` or `.PDF`.
/// - Must not contain path separators.
/// - Must not start with a dot.
/// - Must not exceed [`MAX_FILE_NAME_LEN`] characters.
/// - Must not have leading or trailing whitespace, nor control characters.
pub fn validate_file_name(name: &str) -> Result<(), CoreError> {
    if name.trim() != name {
        return Err(CoreError::Validation(
            "fileName must not have leading or trailing whitespace".to_string(),
        ));
    }
    if name.chars().count() > MAX_FILE_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "fileName must not exceed {MAX_FILE_NAME_LEN} characters"
        )));
    }
    if !(name.ends_with(".pdf") || name.ends_with(".PDF")) {
        return Err(CoreError::Validation(
            "fileName must end with .pdf".to_string(),
        ));
    }
    if name.starts_with('.') {
        return Err(CoreError::Validation(
            "fileName must not start with a dot".to_string(),
        ));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(CoreError::Validation(
            "fileName must not contain path separators".to_string(),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(CoreError::Validation(
            "fileName must not contain control characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_paper_dimension(field: &str, value: f64) -> Result<(), CoreError> {
    if !value.is_finite() || value <= 0.0 || value > MAX_PAPER_DIMENSION_MM {
        return Err(CoreError::Validation(format!(
            "{field} must be a positive number of millimetres up to {MAX_PAPER_DIMENSION_MM}"
        )));
    }
    Ok(())
}

fn validate_margin(field: &str, value: f64) -> Result<(), CoreError> {
    if !value.is_finite() || value < 0.0 {
        return Err(CoreError::Validation(format!(
            "{field} must be a non-negative number of millimetres"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Resolved print options
// ---------------------------------------------------------------------------

/// Fully-resolved print settings: every optional request field replaced by
/// its default.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintOptions {
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin_top: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub print_background: bool,
    pub header_template: String,
    pub footer_template: String,
}

impl PrintOptions {
    /// Apply defaults to every unset field of `request`.
    ///
    /// Vertical margins default to `min(20mm, 15% of height)`, horizontal
    /// margins to `min(20mm, 15% of width)`.
    pub fn resolve(request: &ConvertRequest) -> Self {
        let paper_width = request.paper_width.unwrap_or(DEFAULT_PAPER_WIDTH_MM);
        let paper_height = request.paper_height.unwrap_or(DEFAULT_PAPER_HEIGHT_MM);
        let vertical = default_margin(paper_height);
        let horizontal = default_margin(paper_width);

        Self {
            paper_width,
            paper_height,
            margin_top: request.margin_top.unwrap_or(vertical),
            margin_bottom: request.margin_bottom.unwrap_or(vertical),
            margin_left: request.margin_left.unwrap_or(horizontal),
            margin_right: request.margin_right.unwrap_or(horizontal),
            print_background: request.print_background.unwrap_or(false),
            header_template: request
                .header
                .clone()
                .unwrap_or_else(|| DEFAULT_HEADER_TEMPLATE.to_string()),
            footer_template: request
                .footer
                .clone()
                .unwrap_or_else(|| DEFAULT_FOOTER_TEMPLATE.to_string()),
        }
    }

    /// Parameters for the `Page.printToPDF` command, lengths in inches.
    pub fn to_print_params(&self) -> serde_json::Value {
        serde_json::json!({
            "paperWidth": mm_to_inch(self.paper_width),
            "paperHeight": mm_to_inch(self.paper_height),
            "printBackground": self.print_background,
            "displayHeaderFooter": true,
            "headerTemplate": self.header_template,
            "footerTemplate": self.footer_template,
            "marginTop": mm_to_inch(self.margin_top),
            "marginBottom": mm_to_inch(self.margin_bottom),
            "marginLeft": mm_to_inch(self.margin_left),
            "marginRight": mm_to_inch(self.margin_right),
        })
    }
}

/// Default margin for a paper dimension: `min(20mm, 15% of dimension)`.
pub fn default_margin(dimension_mm: f64) -> f64 {
    DEFAULT_MARGIN_CAP_MM.min(dimension_mm * DEFAULT_MARGIN_RATIO)
}

pub fn mm_to_inch(mm: f64) -> f64 {
    mm * INCHES_PER_MM
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    // -- url ----------------------------------------------------------------

    #[test]
    fn http_and_https_urls_are_accepted() {
        assert!(validate_url("http://example.com").is_ok());
        assert!(validate_url("https://example.com/a?b=c").is_ok());
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert_matches!(validate_url("ftp://example.com"), Err(CoreError::Validation(_)));
        assert_matches!(validate_url("file:///etc/passwd"), Err(CoreError::Validation(_)));
        assert_matches!(validate_url("example.com"), Err(CoreError::Validation(_)));
        assert_matches!(validate_url("https://"), Err(CoreError::Validation(_)));
        assert_matches!(validate_url(""), Err(CoreError::Validation(_)));
    }

    #[test]
    fn url_with_whitespace_is_rejected() {
        assert!(validate_url("https://exa mple.com").is_err());
    }

    // -- fileName -----------------------------------------------------------

    #[test]
    fn valid_file_names() {
        assert!(validate_file_name("report.pdf").is_ok());
        assert!(validate_file_name("REPORT.PDF").is_ok());
        assert!(validate_file_name("my report (1).pdf").is_ok());
    }

    #[test]
    fn invalid_file_names() {
        for name in ["../x.pdf", "x.txt", " x.pdf", "x.pdf ", ".x.pdf", "a\\b.pdf", "x.Pdf"] {
            assert_matches!(
                validate_file_name(name),
                Err(CoreError::Validation(_)),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn file_name_length_limit() {
        let ok = format!("{}.pdf", "a".repeat(MAX_FILE_NAME_LEN - 4));
        assert!(validate_file_name(&ok).is_ok());
        let too_long = format!("{}.pdf", "a".repeat(MAX_FILE_NAME_LEN - 3));
        assert_eq!(too_long.len(), 201);
        assert!(validate_file_name(&too_long).is_err());
    }

    // -- request ------------------------------------------------------------

    #[test]
    fn minimal_request_is_valid() {
        assert!(ConvertRequest::for_url("https://example.com").validate().is_ok());
    }

    #[test]
    fn request_deserializes_camel_case() {
        let req: ConvertRequest = serde_json::from_str(
            r#"{"url":"https://example.com","paperWidth":100,"marginTop":5,"printBackground":true,"fileName":"a.pdf"}"#,
        )
        .unwrap();
        assert_eq!(req.paper_width, Some(100.0));
        assert_eq!(req.margin_top, Some(5.0));
        assert_eq!(req.print_background, Some(true));
        assert_eq!(req.file_name.as_deref(), Some("a.pdf"));
        assert_eq!(req.paper_height, None);
    }

    #[test]
    fn non_positive_paper_is_rejected() {
        let req = ConvertRequest {
            paper_width: Some(0.0),
            ..ConvertRequest::for_url("https://example.com")
        };
        assert_matches!(req.validate(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn negative_margin_is_rejected() {
        let req = ConvertRequest {
            margin_left: Some(-1.0),
            ..ConvertRequest::for_url("https://example.com")
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn margins_consuming_the_page_are_rejected() {
        let req = ConvertRequest {
            paper_height: Some(100.0),
            margin_top: Some(60.0),
            margin_bottom: Some(40.0),
            ..ConvertRequest::for_url("https://example.com")
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn invalid_file_name_fails_request_validation() {
        let req = ConvertRequest {
            file_name: Some("x.txt".into()),
            ..ConvertRequest::for_url("https://example.com")
        };
        assert!(req.validate().is_err());
    }

    // -- defaults -----------------------------------------------------------

    #[test]
    fn defaults_are_a4_with_capped_margins() {
        let opts = PrintOptions::resolve(&ConvertRequest::for_url("https://example.com"));
        assert!(approx(opts.paper_width, 210.0));
        assert!(approx(opts.paper_height, 297.0));
        // 15% of both A4 dimensions exceeds 20mm, so the cap applies.
        assert!(approx(opts.margin_top, 20.0));
        assert!(approx(opts.margin_left, 20.0));
        assert!(!opts.print_background);
        assert_eq!(opts.header_template, DEFAULT_HEADER_TEMPLATE);
        assert!(opts.footer_template.contains("pageNumber"));
        assert!(opts.footer_template.contains("totalPages"));
    }

    #[test]
    fn small_paper_uses_proportional_margins() {
        let req = ConvertRequest {
            paper_width: Some(100.0),
            paper_height: Some(80.0),
            ..ConvertRequest::for_url("https://example.com")
        };
        let opts = PrintOptions::resolve(&req);
        assert!(approx(opts.margin_left, 15.0));
        assert!(approx(opts.margin_right, 15.0));
        assert!(approx(opts.margin_top, 12.0));
        assert!(approx(opts.margin_bottom, 12.0));
    }

    #[test]
    fn explicit_values_win_over_defaults() {
        let req = ConvertRequest {
            margin_top: Some(0.0),
            print_background: Some(true),
            header: Some("<b>h</b>".into()),
            ..ConvertRequest::for_url("https://example.com")
        };
        let opts = PrintOptions::resolve(&req);
        assert!(approx(opts.margin_top, 0.0));
        assert!(opts.print_background);
        assert_eq!(opts.header_template, "<b>h</b>");
    }

    #[test]
    fn print_params_are_in_inches() {
        let opts = PrintOptions::resolve(&ConvertRequest::for_url("https://example.com"));
        let params = opts.to_print_params();
        let width = params["paperWidth"].as_f64().unwrap();
        assert!(approx(width, 210.0 * INCHES_PER_MM));
        assert!((width - 8.2677).abs() < 1e-3);
        assert_eq!(params["displayHeaderFooter"], true);
        assert_eq!(params["printBackground"], false);
    }
}
