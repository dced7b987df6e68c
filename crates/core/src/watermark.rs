//! PDF watermarking.
//!
//! Stamps a small grey text label onto every page large enough to carry it
//! (at least 150mm in both dimensions). Portrait pages get the label rotated
//! 90° along the left edge, landscape pages get it horizontally near the top
//! left. Smaller pages are passed through untouched.
//!
//! The existing page content is wrapped in `q ... Q` so that whatever
//! transform the renderer left active cannot displace the label.

use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// PDF points per millimetre.
const POINTS_PER_MM: f32 = 72.0 / 25.4;

/// Pages narrower or shorter than this (in mm) are left unmodified.
pub const MIN_PAGE_SIZE_MM: f32 = 150.0;

/// Label font size in points.
const FONT_SIZE: f32 = 6.0;

/// Label grey level (0 = black, 1 = white).
const GREY_LEVEL: f32 = 0.5;

/// Resource name under which the label font is registered on each page.
const FONT_RESOURCE_NAME: &[u8] = b"UrlpdfWm";

/// Fallback when a page has no media box anywhere in its ancestry (US Letter).
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Guard against cyclic `Parent` chains in malformed files.
const MAX_PARENT_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF is encrypted")]
    Encrypted,

    #[error("Source and destination must differ")]
    SamePath,
}

/// Outcome of a watermarking pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkSummary {
    pub pages_marked: usize,
    pub pages_skipped: usize,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Read `source`, watermark it with `label`, and write the result to
/// `destination`. The two paths must differ.
pub fn add_watermark(
    source: &Path,
    destination: &Path,
    label: &str,
) -> Result<WatermarkSummary, WatermarkError> {
    if source == destination {
        return Err(WatermarkError::SamePath);
    }
    let bytes = std::fs::read(source)?;
    let (output, summary) = watermark_pdf(&bytes, label)?;
    std::fs::write(destination, output)?;
    Ok(summary)
}

/// Watermark an in-memory PDF, returning the new document bytes.
pub fn watermark_pdf(
    input: &[u8],
    label: &str,
) -> Result<(Vec<u8>, WatermarkSummary), WatermarkError> {
    let mut doc = Document::load_mem(input)?;
    if doc.is_encrypted() {
        return Err(WatermarkError::Encrypted);
    }

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut summary = WatermarkSummary {
        pages_marked: 0,
        pages_skipped: 0,
    };

    let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    for page_id in page_ids {
        let media_box = media_box(&doc, page_id);
        match label_operations(media_box, label) {
            Some(operations) => {
                stamp_page(&mut doc, page_id, font_id, operations)?;
                summary.pages_marked += 1;
            }
            None => summary.pages_skipped += 1,
        }
    }

    let mut output = Vec::with_capacity(input.len() + 1024);
    doc.save_to(&mut output)?;
    Ok((output, summary))
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Content operations drawing the label on a page with the given media box,
/// or `None` when the page is too small.
fn label_operations(media_box: [f32; 4], label: &str) -> Option<Vec<Operation>> {
    let [llx, lly, urx, ury] = media_box;
    let width = (urx - llx).abs();
    let height = (ury - lly).abs();
    if width / POINTS_PER_MM < MIN_PAGE_SIZE_MM || height / POINTS_PER_MM < MIN_PAGE_SIZE_MM {
        return None;
    }

    let origin_x = llx.min(urx);
    let origin_y = lly.min(ury);
    let matrix: [f32; 6] = if height > width {
        // Portrait: text runs upward along the left edge.
        [
            0.0,
            1.0,
            -1.0,
            0.0,
            origin_x + 15.0 * POINTS_PER_MM,
            origin_y + 20.0 * POINTS_PER_MM,
        ]
    } else {
        [
            1.0,
            0.0,
            0.0,
            1.0,
            origin_x + 20.0 * POINTS_PER_MM,
            origin_y + height - 10.0 * POINTS_PER_MM,
        ]
    };

    Some(vec![
        Operation::new("Q", vec![]),
        Operation::new("q", vec![]),
        Operation::new("g", vec![GREY_LEVEL.into()]),
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![Object::Name(FONT_RESOURCE_NAME.to_vec()), FONT_SIZE.into()],
        ),
        Operation::new("Tm", matrix.iter().map(|v| (*v).into()).collect()),
        Operation::new("Tj", vec![Object::string_literal(encode_label(label))]),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ])
}

/// Encode the label for a WinAnsi-encoded standard font. Characters outside
/// Latin-1 are replaced with `?`.
fn encode_label(label: &str) -> Vec<u8> {
    label
        .chars()
        .map(|c| match u32::from(c) {
            code @ 0x20..=0x7e | code @ 0xa0..=0xff => code as u8,
            _ => b'?',
        })
        .collect()
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Resolve a direct object or follow a single reference.
fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Look up an inheritable page attribute, walking up the page tree.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_object(page_id).ok()?.as_dict().ok()?;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(value) = current.get(key) {
            return resolve(doc, value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_object(parent).ok()?.as_dict().ok()?;
    }
    None
}

fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let Some(Object::Array(values)) = inherited(doc, page_id, b"MediaBox") else {
        return DEFAULT_MEDIA_BOX;
    };
    let numbers: Vec<f32> = values
        .iter()
        .filter_map(|v| resolve(doc, v).and_then(number))
        .collect();
    match numbers.as_slice() {
        [a, b, c, d] => [*a, *b, *c, *d],
        _ => DEFAULT_MEDIA_BOX,
    }
}

// ---------------------------------------------------------------------------
// Page mutation
// ---------------------------------------------------------------------------

fn stamp_page(
    doc: &mut Document,
    page_id: ObjectId,
    font_id: ObjectId,
    operations: Vec<Operation>,
) -> Result<(), WatermarkError> {
    // Resources may be inherited or indirect; materialise a direct copy on
    // the page with the label font added.
    let mut resources = match inherited(doc, page_id, b"Resources") {
        Some(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    };
    let mut fonts = match resources.get(b"Font").ok().and_then(|f| resolve(doc, f)) {
        Some(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    };
    fonts.set(FONT_RESOURCE_NAME.to_vec(), Object::Reference(font_id));
    resources.set("Font", Object::Dictionary(fonts));

    let existing: Vec<Object> = {
        let page = doc.get_object(page_id)?.as_dict()?;
        match page.get(b"Contents") {
            Ok(Object::Array(items)) => items.clone(),
            Ok(Object::Reference(id)) => vec![Object::Reference(*id)],
            _ => Vec::new(),
        }
    };

    let open_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let overlay = Content { operations }.encode()?;
    let overlay_id = doc.add_object(Stream::new(dictionary! {}, overlay));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing);
    contents.push(Object::Reference(overlay_id));

    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    page.set("Resources", Object::Dictionary(resources));
    page.set("Contents", Object::Array(contents));
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
