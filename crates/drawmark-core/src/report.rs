//! Report composition
//!
//! Turns rasterized drawing pages and photo markers into a single PDF:
//!
//! - one output page per drawing page, full-bleed, sized to the page's
//!   aspect ratio with the long side at 842pt
//! - an A4 photo appendix (only when there are markers): heading block,
//!   markers grouped by page then reference number, each with a caption,
//!   its wrapped note and every photo scaled to fit, closed by the
//!   project's conclusion
//!
//! Rasters are re-encoded to baseline JPEG (alpha flattened onto white) and
//! embedded with `DCTDecode`. Text uses the standard Helvetica faces with
//! WinAnsi encoding.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use thiserror::Error;
use tracing::warn;

const DRAWING_LONG_SIDE: f32 = 842.0;
const A4_WIDTH: f32 = 595.0;
const A4_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 40.0;
const CONTENT_WIDTH: f32 = A4_WIDTH - 2.0 * MARGIN;
const MAX_PHOTO_HEIGHT: f32 = 360.0;
const UNAVAILABLE: &str = "[image unavailable]";
const PRODUCER: &str = concat!("Drawmark ", env!("CARGO_PKG_VERSION"));

/// Errors raised before or during composition
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("report has no drawing pages")]
    NoPages,

    #[error("project id is required")]
    MissingProject,

    #[error("drawing page {page} is invalid: {reason}")]
    InvalidPage { page: usize, reason: String },

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("PDF generation failed: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("failed to serialize report: {0}")]
    Io(#[from] std::io::Error),
}

pub type ComposeResult<T> = Result<T, ComposeError>;

/// Project metadata shown in the document info and appendix heading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectInfo {
    pub id: String,
    pub name: Option<String>,
    pub client_name: Option<String>,
    pub owner_name: Option<String>,
    pub owner_email: Option<String>,
    pub description: Option<String>,
    pub conclusion: Option<String>,
}

impl ProjectInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// "Name <email>", or whichever half is known
    fn owner_line(&self) -> Option<String> {
        match (non_blank(&self.owner_name), non_blank(&self.owner_email)) {
            (Some(name), Some(email)) => Some(format!("{} <{}>", name, email)),
            (Some(name), None) => Some(name.to_string()),
            (None, Some(email)) => Some(email.to_string()),
            (None, None) => None,
        }
    }
}

/// One rasterized drawing page
#[derive(Debug, Clone, PartialEq)]
pub struct RasterPage {
    /// Pixel dimensions as reported by the client; they set the page aspect
    pub width: u32,
    pub height: u32,
    /// Encoded image bytes (PNG, JPEG, ...)
    pub data: Vec<u8>,
}

/// A marker photo, already fetched or known to be missing
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerImage {
    Bytes(Vec<u8>),
    Unavailable { source: String, reason: String },
}

/// A photo marker placed on a drawing page
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoMarker {
    pub id: String,
    pub page: u32,
    pub ref_no: Option<i64>,
    pub note: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub images: Vec<MarkerImage>,
}

impl PhotoMarker {
    /// "Ref <n> - Page <p> - <timestamp>", skipping unknown parts
    pub fn caption(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(ref_no) = self.ref_no {
            parts.push(format!("Ref {}", ref_no));
        }
        parts.push(format!("Page {}", self.page));
        if let Some(created_at) = self.created_at {
            parts.push(created_at.format("%Y-%m-%d %H:%M UTC").to_string());
        }
        parts.join(" - ")
    }
}

/// Everything needed to compose one report
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub project: ProjectInfo,
    pub file_name: String,
    pub pages: Vec<RasterPage>,
    pub markers: Vec<PhotoMarker>,
}

/// A raster re-encoded for embedding
struct EncodedImage {
    width: u32,
    height: u32,
    jpeg: Vec<u8>,
}

/// A validated drawing page
struct Drawing {
    width: f32,
    height: f32,
    image: EncodedImage,
}

#[derive(Clone, Copy)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource_name(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

/// Compose the report PDF
///
/// All validation happens before anything is rendered.
pub fn compose(request: &ReportRequest) -> ComposeResult<Vec<u8>> {
    let drawings = validate(request)?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let fonts = register_fonts(&mut doc);

    let mut kids = Vec::with_capacity(drawings.len());
    for drawing in &drawings {
        kids.push(add_drawing_page(&mut doc, pages_id, &fonts, drawing)?);
    }

    if !request.markers.is_empty() {
        let mut appendix = PageBuilder::new(&mut doc, pages_id, fonts);
        render_appendix(&mut appendix, request)?;
        kids.extend(appendix.finish()?);
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(info_dictionary(request));
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    doc.compress();
    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// Check the request and decode every drawing page
fn validate(request: &ReportRequest) -> ComposeResult<Vec<Drawing>> {
    if request.pages.is_empty() {
        return Err(ComposeError::NoPages);
    }
    if request.project.id.trim().is_empty() {
        return Err(ComposeError::MissingProject);
    }

    let mut drawings = Vec::with_capacity(request.pages.len());
    for (index, page) in request.pages.iter().enumerate() {
        if page.width == 0 || page.height == 0 {
            return Err(ComposeError::InvalidPage {
                page: index + 1,
                reason: format!("size {}x{}", page.width, page.height),
            });
        }
        let image = encode_jpeg(&page.data).map_err(|e| ComposeError::InvalidPage {
            page: index + 1,
            reason: e.to_string(),
        })?;

        let (width, height) = fit_long_side(page.width as f32, page.height as f32, DRAWING_LONG_SIDE);
        drawings.push(Drawing { width, height, image });
    }
    Ok(drawings)
}

/// Scale so the longer side equals `long_side`
fn fit_long_side(width: f32, height: f32, long_side: f32) -> (f32, f32) {
    if width >= height {
        (long_side, long_side * height / width)
    } else {
        (long_side * width / height, long_side)
    }
}

/// Scale down (never up) to fit inside the box
fn fit_within(width: f32, height: f32, max_width: f32, max_height: f32) -> (f32, f32) {
    let scale = (max_width / width).min(max_height / height).min(1.0);
    (width * scale, height * scale)
}

/// Decode any supported raster and re-encode it as RGB JPEG
fn encode_jpeg(bytes: &[u8]) -> Result<EncodedImage, image::ImageError> {
    let rgb = flatten_onto_white(image::load_from_memory(bytes)?);
    let (width, height) = rgb.dimensions();

    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(rgb).write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)?;
    Ok(EncodedImage { width, height, jpeg })
}

fn flatten_onto_white(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn register_fonts(doc: &mut Document) -> Dictionary {
    let mut fonts = Dictionary::new();
    for (font, base) in [(Font::Regular, "Helvetica"), (Font::Bold, "Helvetica-Bold")] {
        let id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => base,
            "Encoding" => "WinAnsiEncoding",
        });
        fonts.set(font.resource_name(), id);
    }
    fonts
}

fn add_image(doc: &mut Document, image: &EncodedImage) -> ObjectId {
    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(image.width),
        "Height" => i64::from(image.height),
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "DCTDecode",
    };
    // Already compressed
    doc.add_object(Stream::new(dict, image.jpeg.clone()).with_compression(false))
}

fn draw_image_ops(name: &str, x: f32, y: f32, width: f32, height: f32) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![width.into(), 0.into(), 0.into(), height.into(), x.into(), y.into()],
        ),
        Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ]
}

fn add_page(
    doc: &mut Document,
    parent: ObjectId,
    width: f32,
    height: f32,
    fonts: &Dictionary,
    xobjects: Dictionary,
    operations: Vec<Operation>,
) -> ComposeResult<ObjectId> {
    let content = Content { operations }.encode()?;
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => parent,
        "MediaBox" => vec![0.into(), 0.into(), Object::Real(width), Object::Real(height)],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "Font" => fonts.clone(),
            "XObject" => xobjects,
        },
    }))
}

fn add_drawing_page(doc: &mut Document, parent: ObjectId, fonts: &Dictionary, drawing: &Drawing) -> ComposeResult<ObjectId> {
    let image_id = add_image(doc, &drawing.image);
    let mut xobjects = Dictionary::new();
    xobjects.set("Im0", image_id);

    let ops = draw_image_ops("Im0", 0.0, 0.0, drawing.width, drawing.height);
    add_page(doc, parent, drawing.width, drawing.height, fonts, xobjects, ops)
}

/// Lays out flowing content on A4 pages, breaking as needed
struct PageBuilder<'a> {
    doc: &'a mut Document,
    parent: ObjectId,
    fonts: Dictionary,
    kids: Vec<ObjectId>,
    ops: Vec<Operation>,
    xobjects: Dictionary,
    cursor: f32,
}

impl<'a> PageBuilder<'a> {
    fn new(doc: &'a mut Document, parent: ObjectId, fonts: Dictionary) -> Self {
        Self {
            doc,
            parent,
            fonts,
            kids: Vec::new(),
            ops: Vec::new(),
            xobjects: Dictionary::new(),
            cursor: A4_HEIGHT - MARGIN,
        }
    }

    /// Start a new page if `height` does not fit below the cursor
    fn reserve(&mut self, height: f32) -> ComposeResult<()> {
        if self.cursor - height < MARGIN && !self.ops.is_empty() {
            self.flush()?;
        }
        Ok(())
    }

    fn gap(&mut self, height: f32) {
        self.cursor -= height;
    }

    fn line(&mut self, text: &str, font: Font, size: f32) -> ComposeResult<()> {
        let leading = size * 1.35;
        self.reserve(leading)?;
        self.cursor -= leading;

        let baseline = self.cursor + size * 0.3;
        self.ops.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![font.resource_name().into(), size.into()]),
            Operation::new("Td", vec![MARGIN.into(), baseline.into()]),
            Operation::new("Tj", vec![Object::String(encode_win_ansi(text), StringFormat::Literal)]),
            Operation::new("ET", vec![]),
        ]);
        Ok(())
    }

    fn paragraph(&mut self, text: &str, font: Font, size: f32) -> ComposeResult<()> {
        for line in wrap_text(text, max_chars(size)) {
            self.line(&line, font, size)?;
        }
        Ok(())
    }

    fn image(&mut self, image: &EncodedImage) -> ComposeResult<()> {
        let (width, height) = fit_within(
            image.width as f32,
            image.height as f32,
            CONTENT_WIDTH,
            MAX_PHOTO_HEIGHT,
        );
        self.reserve(height)?;
        self.cursor -= height;

        let name = format!("Im{}", self.xobjects.len());
        let id = add_image(self.doc, image);
        self.xobjects.set(name.as_str(), id);
        self.ops.extend(draw_image_ops(&name, MARGIN, self.cursor, width, height));
        Ok(())
    }

    fn flush(&mut self) -> ComposeResult<()> {
        let ops = std::mem::take(&mut self.ops);
        let xobjects = std::mem::replace(&mut self.xobjects, Dictionary::new());
        let id = add_page(self.doc, self.parent, A4_WIDTH, A4_HEIGHT, &self.fonts, xobjects, ops)?;
        self.kids.push(id);
        self.cursor = A4_HEIGHT - MARGIN;
        Ok(())
    }

    fn finish(mut self) -> ComposeResult<Vec<ObjectId>> {
        if !self.ops.is_empty() {
            self.flush()?;
        }
        Ok(self.kids)
    }
}

fn render_appendix(out: &mut PageBuilder<'_>, request: &ReportRequest) -> ComposeResult<()> {
    let project = &request.project;
    let title = non_blank(&project.name).unwrap_or(&request.file_name);

    out.line(&format!("Photo Appendix - {}", title), Font::Bold, 16.0)?;
    if let Some(client) = non_blank(&project.client_name) {
        out.line(&format!("Client: {}", client), Font::Regular, 10.0)?;
    }
    if let Some(owner) = project.owner_line() {
        out.line(&format!("Owner: {}", owner), Font::Regular, 10.0)?;
    }
    if let Some(description) = non_blank(&project.description) {
        out.paragraph(description, Font::Regular, 10.0)?;
    }
    out.gap(12.0);

    for marker in ordered_markers(&request.markers) {
        out.line(&marker.caption(), Font::Bold, 11.0)?;
        if let Some(note) = non_blank(&marker.note) {
            out.paragraph(note, Font::Regular, 10.0)?;
        }

        for image in &marker.images {
            match image {
                MarkerImage::Bytes(bytes) => match encode_jpeg(bytes) {
                    Ok(encoded) => {
                        out.gap(4.0);
                        out.image(&encoded)?;
                    }
                    Err(e) => {
                        warn!("Marker {} has an undecodable image: {}", marker.id, e);
                        out.line(UNAVAILABLE, Font::Regular, 10.0)?;
                    }
                },
                MarkerImage::Unavailable { source, reason } => {
                    warn!("Marker {} image {} unavailable: {}", marker.id, source, reason);
                    out.line(UNAVAILABLE, Font::Regular, 10.0)?;
                }
            }
        }
        out.gap(14.0);
    }

    if let Some(conclusion) = non_blank(&project.conclusion) {
        out.line("Conclusion", Font::Bold, 12.0)?;
        out.paragraph(conclusion, Font::Regular, 10.0)?;
    }
    Ok(())
}

/// By originating page, then refNo; markers without one go last within their page
fn ordered_markers(markers: &[PhotoMarker]) -> Vec<&PhotoMarker> {
    let mut ordered: Vec<&PhotoMarker> = markers.iter().collect();
    ordered.sort_by(|a, b| {
        a.page
            .cmp(&b.page)
            .then_with(|| a.ref_no.is_none().cmp(&b.ref_no.is_none()))
            .then_with(|| a.ref_no.cmp(&b.ref_no))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    ordered
}

fn info_dictionary(request: &ReportRequest) -> Dictionary {
    let project = &request.project;
    let text = |s: &str| Object::String(encode_win_ansi(s), StringFormat::Literal);

    let mut info = Dictionary::new();
    info.set("Title", text(non_blank(&project.name).unwrap_or(&request.file_name)));
    if let Some(owner) = non_blank(&project.owner_name) {
        info.set("Author", text(owner));
    }
    if let Some(client) = non_blank(&project.client_name) {
        info.set("Subject", text(client));
    }
    info.set("Producer", text(PRODUCER));
    info
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Approximate characters per line for Helvetica at `size`
fn max_chars(size: f32) -> usize {
    ((CONTENT_WIDTH / (size * 0.5)) as usize).max(8)
}

/// Greedy word wrap; hard-splits words longer than a line
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                lines.push(word.drain(..max_chars).collect());
            }
            let word: String = word.into_iter().collect();
            if word.is_empty() {
                continue;
            }

            let needed = if current.is_empty() { 0 } else { current.chars().count() + 1 };
            if needed + word.chars().count() > max_chars {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    lines
}

/// Latin-1 subset of WinAnsi; anything else becomes '?'
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match u32::from(c) {
            0x20..=0x7E | 0xA0..=0xFF => c as u8,
            _ if c == '\t' => b' ',
            _ => b'?',
        })
        .collect()
}
