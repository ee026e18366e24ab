//! Resolved conversion parameters. Values here are fully validated; all lengths are inches.

use std::time::Duration;

use serde_json::{Map, Value};

pub const DEFAULT_VIEWPORT_WIDTH: i64 = 1920;
pub const DEFAULT_VIEWPORT_HEIGHT: i64 = 1080;
pub const DEFAULT_PAPER_WIDTH: f64 = 8.5;
pub const DEFAULT_PAPER_HEIGHT: f64 = 11.0;
pub const DEFAULT_MARGIN: f64 = 0.4;
pub const DEFAULT_SCALE: f64 = 1.0;
/// Stand-in for a margin that resolved to exactly zero.
pub const ZERO_MARGIN: f64 = 0.000_000_01;
pub const PIXELS_PER_INCH: f64 = 96.0;

/// Named paper presets, width × height in inches.
const PAPER_FORMATS: &[(&str, f64, f64)] = &[
    ("letter", 8.5, 11.0),
    ("legal", 8.5, 14.0),
    ("tabloid", 11.0, 17.0),
    ("ledger", 17.0, 11.0),
    ("a0", 33.1, 46.8),
    ("a1", 23.4, 33.1),
    ("a2", 16.54, 23.4),
    ("a3", 11.7, 16.54),
    ("a4", 8.27, 11.7),
    ("a5", 5.83, 8.27),
    ("a6", 4.13, 5.83),
];

/// Pixels per unit for the two-letter suffixes accepted in length strings.
const UNIT_PIXELS: &[(&str, f64)] = &[("px", 1.0), ("in", 96.0), ("cm", 37.8), ("mm", 3.78)];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperSize {
    pub width: f64,
    pub height: f64,
}

/// Look up a named paper preset, ignoring case.
pub fn paper_format(name: &str) -> Option<PaperSize> {
    PAPER_FORMATS
        .iter()
        .find(|(preset, _, _)| preset.eq_ignore_ascii_case(name))
        .map(|&(_, width, height)| PaperSize { width, height })
}

/// Pixel ratio for a unit suffix, ignoring case.
pub fn unit_pixels(unit: &str) -> Option<f64> {
    UNIT_PIXELS
        .iter()
        .find(|(suffix, _)| suffix.eq_ignore_ascii_case(unit))
        .map(|&(_, ratio)| ratio)
}

/// Convert a pixel length to inches, rounded to two decimals.
pub fn pixels_to_inches(pixels: f64) -> f64 {
    ((pixels * 100.0) / PIXELS_PER_INCH).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Media {
    #[default]
    Screen,
    Print,
}

impl Media {
    pub fn as_str(self) -> &'static str {
        match self {
            Media::Screen => "screen",
            Media::Print => "print",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "screen" => Some(Media::Screen),
            "print" => Some(Media::Print),
            _ => None,
        }
    }
}

/// Page lifecycle signal a conversion waits for after navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitUntil {
    #[default]
    Load,
    Dom,
}

impl WaitUntil {
    pub fn as_str(self) -> &'static str {
        match self {
            WaitUntil::Load => "load",
            WaitUntil::Dom => "dom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "load" => Some(WaitUntil::Load),
            "dom" => Some(WaitUntil::Dom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Margins {
    pub fn uniform(value: f64) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }

    /// Replace every side that is exactly zero with [`ZERO_MARGIN`].
    pub fn nudge_zero_sides(self) -> Self {
        let nudge = |side: f64| if side == 0.0 { ZERO_MARGIN } else { side };
        Self {
            top: nudge(self.top),
            right: nudge(self.right),
            bottom: nudge(self.bottom),
            left: nudge(self.left),
        }
    }
}

impl Default for Margins {
    fn default() -> Self {
        Self::uniform(DEFAULT_MARGIN)
    }
}

/// Parameters handed to the browser's print-to-PDF capability.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintParams {
    pub landscape: bool,
    pub display_header_footer: bool,
    pub print_background: bool,
    pub scale: f64,
    pub paper_width: f64,
    pub paper_height: f64,
    pub margins: Margins,
    pub page_ranges: String,
    pub header_template: String,
    pub footer_template: String,
    pub prefer_css_page_size: bool,
}

impl Default for PrintParams {
    fn default() -> Self {
        Self {
            landscape: false,
            display_header_footer: false,
            print_background: true,
            scale: DEFAULT_SCALE,
            paper_width: DEFAULT_PAPER_WIDTH,
            paper_height: DEFAULT_PAPER_HEIGHT,
            margins: Margins::default(),
            page_ranges: String::new(),
            header_template: String::new(),
            footer_template: String::new(),
            prefer_css_page_size: false,
        }
    }
}

/// Stamp or watermark applied by the PDF engine after rendering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatermarkConfig {
    /// Free-form stamp descriptor, interpreted by the PDF engine.
    pub query: String,
    pub on_top: bool,
    /// Page selections; empty means every page.
    pub pages: Vec<String>,
}

/// Where the document to render comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source<'a> {
    Html(&'a str),
    Url(&'a str),
}

/// Fully resolved parameters for rendering one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionSpec {
    pub html: String,
    pub url: String,
    pub print: PrintParams,
    pub viewport_width: i64,
    pub viewport_height: i64,
    pub block_ads: bool,
    pub selector: Option<String>,
    pub wait_for_selector: Option<String>,
    pub wait_for_selector_timeout: Duration,
    pub wait_until: WaitUntil,
    pub wait_until_timeout: Duration,
    pub delay: Duration,
    pub timeout: Duration,
    pub headers: Map<String, Value>,
    pub emulate_media: Media,
    pub owner_password: String,
    pub user_password: String,
    pub watermark: Option<WatermarkConfig>,
}

impl Default for ConversionSpec {
    fn default() -> Self {
        Self {
            html: String::new(),
            url: String::new(),
            print: PrintParams::default(),
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            block_ads: false,
            selector: None,
            wait_for_selector: None,
            wait_for_selector_timeout: Duration::ZERO,
            wait_until: WaitUntil::default(),
            wait_until_timeout: Duration::ZERO,
            delay: Duration::ZERO,
            timeout: Duration::ZERO,
            headers: Map::new(),
            emulate_media: Media::default(),
            owner_password: String::new(),
            user_password: String::new(),
            watermark: None,
        }
    }
}

impl ConversionSpec {
    /// The document source; a URL takes precedence over inline HTML.
    pub fn source(&self) -> Option<Source<'_>> {
        if !self.url.is_empty() {
            Some(Source::Url(&self.url))
        } else if !self.html.is_empty() {
            Some(Source::Html(&self.html))
        } else {
            None
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.owner_password.is_empty() || !self.user_password.is_empty()
    }

    pub(crate) fn clear_credentials(&mut self) {
        self.owner_password.clear();
        self.user_password.clear();
    }
}

/// Ordered documents merged into one PDF, with security applied once to the result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergeSpec {
    pub documents: Vec<ConversionSpec>,
    pub owner_password: String,
    pub user_password: String,
    pub watermark: Option<WatermarkConfig>,
    /// Deadline for the whole merge; zero defers to the caller's configuration.
    pub timeout: Duration,
}

impl MergeSpec {
    /// Strip per-document credentials; parts are never encrypted individually.
    pub(crate) fn clear_document_credentials(&mut self) {
        for document in &mut self.documents {
            document.clear_credentials();
        }
    }
}
