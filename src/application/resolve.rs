//! Request option resolution: loosely typed JSON payloads into validated specs.
//!
//! Resolution is pure and deterministic. Absent keys take their documented default;
//! a key that is present with the wrong JSON type is rejected rather than ignored.
//! Lengths accept bare numbers (pixels) or strings with an optional `px`, `in`, `cm`
//! or `mm` suffix, and are stored as inches rounded to two decimals.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::domain::{
    error::ParseError,
    options::{
        ConversionSpec, Margins, Media, MergeSpec, PrintParams, WaitUntil, WatermarkConfig,
        paper_format, pixels_to_inches, unit_pixels,
    },
};

/// Decode a request body and resolve it as a single conversion.
pub fn conversion_from_slice(body: &[u8]) -> Result<ConversionSpec, ParseError> {
    let raw: Value = serde_json::from_slice(body).map_err(|_| ParseError::invalid_json())?;
    resolve_conversion(&raw)
}

/// Decode a request body and resolve it as a merge of several conversions.
pub fn merge_from_slice(body: &[u8]) -> Result<MergeSpec, ParseError> {
    let raw: Value = serde_json::from_slice(body).map_err(|_| ParseError::invalid_json())?;
    resolve_merge(&raw)
}

pub fn resolve_conversion(raw: &Value) -> Result<ConversionSpec, ParseError> {
    let map = raw.as_object().ok_or_else(ParseError::invalid_json)?;
    resolve_fields(&Fields::new(map))
}

/// Resolve a merge payload. Fails fast on the first invalid document.
pub fn resolve_merge(raw: &Value) -> Result<MergeSpec, ParseError> {
    let map = raw.as_object().ok_or_else(ParseError::invalid_json)?;
    let fields = Fields::new(map);

    let documents = match map.get("documents") {
        None => return Err(ParseError::missing("documents")),
        Some(Value::Array(items)) => items,
        Some(other) => return Err(ParseError::type_mismatch("documents", other)),
    };

    let documents = documents
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let document = item
                .as_object()
                .ok_or_else(|| ParseError::type_mismatch(format!("documents[{index}]"), item))?;
            resolve_fields(&Fields::new(document))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut spec = MergeSpec {
        documents,
        owner_password: fields.string("ownerPassword", "")?,
        user_password: fields.string("userPassword", "")?,
        watermark: resolve_watermark(&fields)?,
        timeout: fields.duration("timeout")?,
    };
    spec.clear_document_credentials();
    Ok(spec)
}

fn resolve_fields(fields: &Fields<'_>) -> Result<ConversionSpec, ParseError> {
    let defaults = PrintParams::default();

    let mut paper_width = fields.unit("paperWidth", defaults.paper_width)?;
    let mut paper_height = fields.unit("paperHeight", defaults.paper_height)?;
    if let Some(size) = paper_format(&fields.string("format", "")?) {
        paper_width = size.width;
        paper_height = size.height;
    }

    let print = PrintParams {
        landscape: fields.bool("landscape", defaults.landscape)?,
        display_header_footer: fields.bool("displayHeaderFooter", defaults.display_header_footer)?,
        print_background: fields.bool("printBackground", defaults.print_background)?,
        scale: fields.float("scale", defaults.scale)?,
        paper_width,
        paper_height,
        margins: resolve_margins(fields)?,
        page_ranges: fields.string("pageRanges", "")?,
        header_template: fields.string("headerTemplate", "")?,
        footer_template: fields.string("footerTemplate", "")?,
        prefer_css_page_size: fields.bool("preferCSSPageSize", defaults.prefer_css_page_size)?,
    };

    let defaults = ConversionSpec::default();

    Ok(ConversionSpec {
        html: fields.string("html", "")?,
        url: fields.string("url", "")?,
        print,
        viewport_width: fields.int("viewportWidth", defaults.viewport_width)?,
        viewport_height: fields.int("viewportHeight", defaults.viewport_height)?,
        block_ads: fields.bool("blockAds", defaults.block_ads)?,
        selector: fields.optional_string("selector")?,
        wait_for_selector: fields.optional_string("waitForSelector")?,
        wait_for_selector_timeout: fields.duration("waitForSelectorTimeout")?,
        wait_until: fields.one_of("waitUntil", WaitUntil::default(), WaitUntil::parse)?,
        wait_until_timeout: fields.duration("waitUntilTimeout")?,
        delay: fields.duration("delay")?,
        timeout: fields.duration("timeout")?,
        headers: fields.object("headers")?.cloned().unwrap_or_default(),
        emulate_media: fields.one_of("emulateMedia", Media::default(), Media::parse)?,
        owner_password: fields.string("ownerPassword", "")?,
        user_password: fields.string("userPassword", "")?,
        watermark: resolve_watermark(fields)?,
    })
}

/// Margin precedence: numeric `margin`, then shorthand string `margin`, then per-side keys.
fn resolve_margins(fields: &Fields<'_>) -> Result<Margins, ParseError> {
    let margins = match fields.get("margin") {
        Some(Value::Number(number)) if number.as_f64().is_some_and(|px| px > -1.0) => {
            Margins::uniform(pixels_to_inches(number.as_f64().unwrap_or_default()))
        }
        Some(raw @ Value::String(shorthand)) if !shorthand.is_empty() => {
            margin_shorthand(shorthand).ok_or_else(|| ParseError::invalid_unit("margin", raw))?
        }
        Some(Value::Number(_)) | Some(Value::String(_)) | None => Margins {
            top: fields.unit("marginTop", Margins::default().top)?,
            right: fields.unit("marginRight", Margins::default().right)?,
            bottom: fields.unit("marginBottom", Margins::default().bottom)?,
            left: fields.unit("marginLeft", Margins::default().left)?,
        },
        Some(other) => return Err(ParseError::type_mismatch("margin", other)),
    };

    Ok(margins.nudge_zero_sides())
}

/// Expand a CSS-style margin shorthand of one to four lengths.
pub fn margin_shorthand(raw: &str) -> Option<Margins> {
    let sides = raw
        .split_whitespace()
        .map(length_to_inches)
        .collect::<Option<Vec<_>>>()?;

    match sides.as_slice() {
        [all] => Some(Margins::uniform(*all)),
        [vertical, horizontal] => Some(Margins {
            top: *vertical,
            right: *horizontal,
            bottom: *vertical,
            left: *horizontal,
        }),
        [top, horizontal, bottom] => Some(Margins {
            top: *top,
            right: *horizontal,
            bottom: *bottom,
            left: *horizontal,
        }),
        [top, right, bottom, left] => Some(Margins {
            top: *top,
            right: *right,
            bottom: *bottom,
            left: *left,
        }),
        _ => None,
    }
}

/// Parse a length value: bare numbers are pixels, strings may carry a unit suffix.
pub fn parse_unit(key: &str, raw: &Value) -> Result<f64, ParseError> {
    match raw {
        Value::Number(number) => number
            .as_f64()
            .map(pixels_to_inches)
            .ok_or_else(|| ParseError::invalid_unit(key, raw)),
        Value::String(text) => {
            length_to_inches(text).ok_or_else(|| ParseError::invalid_unit(key, raw))
        }
        other => Err(ParseError::type_mismatch(key, other)),
    }
}

/// Convert a length string such as `"2.5cm"` or `"12"` to inches.
///
/// Unrecognised suffixes are dropped and the number is read as pixels.
pub fn length_to_inches(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let split = raw.len().checked_sub(2).filter(|at| raw.is_char_boundary(*at));
    let (number, ratio) = match split.and_then(|at| unit_pixels(&raw[at..]).map(|r| (at, r))) {
        Some((at, ratio)) => (&raw[..at], ratio),
        None => (raw, 1.0),
    };

    let number = number.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let value: f64 = number.trim().parse().ok()?;
    value
        .is_finite()
        .then(|| pixels_to_inches(value * ratio))
}

fn resolve_watermark(fields: &Fields<'_>) -> Result<Option<WatermarkConfig>, ParseError> {
    let Some(map) = fields.object("watermark")? else {
        return Ok(None);
    };
    let nested = Fields::nested(map, "watermark");

    let query = match map.get("query") {
        None => return Err(ParseError::missing("watermark.query")),
        Some(_) => nested.string("query", "")?,
    };

    Ok(Some(WatermarkConfig {
        query,
        on_top: nested.bool("onTop", false)?,
        pages: nested.string_or_strings("pages")?,
    }))
}

/// Typed accessors over a JSON object. Errors carry the (optionally prefixed) key.
struct Fields<'a> {
    map: &'a Map<String, Value>,
    prefix: Option<&'static str>,
}

impl<'a> Fields<'a> {
    fn new(map: &'a Map<String, Value>) -> Self {
        Self { map, prefix: None }
    }

    fn nested(map: &'a Map<String, Value>, prefix: &'static str) -> Self {
        Self {
            map,
            prefix: Some(prefix),
        }
    }

    fn key(&self, key: &str) -> String {
        match self.prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.to_string(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key)
    }

    fn string(&self, key: &str, default: &str) -> Result<String, ParseError> {
        match self.get(key) {
            None => Ok(default.to_string()),
            Some(Value::String(value)) => Ok(value.clone()),
            Some(other) => Err(ParseError::type_mismatch(self.key(key), other)),
        }
    }

    fn optional_string(&self, key: &str) -> Result<Option<String>, ParseError> {
        let value = self.string(key, "")?;
        Ok((!value.is_empty()).then_some(value))
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool, ParseError> {
        match self.get(key) {
            None => Ok(default),
            Some(Value::Bool(value)) => Ok(*value),
            Some(other) => Err(ParseError::type_mismatch(self.key(key), other)),
        }
    }

    fn float(&self, key: &str, default: f64) -> Result<f64, ParseError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw @ Value::Number(number)) => number
                .as_f64()
                .ok_or_else(|| ParseError::type_mismatch(self.key(key), raw)),
            Some(other) => Err(ParseError::type_mismatch(self.key(key), other)),
        }
    }

    /// Integers arrive as JSON numbers; fractional parts are truncated.
    fn int(&self, key: &str, default: i64) -> Result<i64, ParseError> {
        if self.get(key).is_none() {
            return Ok(default);
        }
        self.float(key, 0.0).map(|value| value as i64)
    }

    /// Millisecond durations; negative values clamp to zero.
    fn duration(&self, key: &str) -> Result<Duration, ParseError> {
        let millis = self.int(key, 0)?.max(0);
        Ok(Duration::from_millis(millis.unsigned_abs()))
    }

    fn unit(&self, key: &str, default: f64) -> Result<f64, ParseError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => parse_unit(&self.key(key), raw),
        }
    }

    fn one_of<T>(
        &self,
        key: &str,
        default: T,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, ParseError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw @ Value::String(value)) => {
                parse(value).ok_or_else(|| ParseError::invalid_enum(self.key(key), raw))
            }
            Some(other) => Err(ParseError::type_mismatch(self.key(key), other)),
        }
    }

    fn object(&self, key: &str) -> Result<Option<&'a Map<String, Value>>, ParseError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(ParseError::type_mismatch(self.key(key), other)),
        }
    }

    fn string_or_strings(&self, key: &str) -> Result<Vec<String>, ParseError> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(Value::String(single)) => Ok(vec![single.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(value) => Ok(value.clone()),
                    other => Err(ParseError::type_mismatch(self.key(key), other)),
                })
                .collect(),
            Some(other) => Err(ParseError::type_mismatch(self.key(key), other)),
        }
    }
}
