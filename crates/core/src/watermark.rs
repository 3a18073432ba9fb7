// crates/core/src/watermark.rs
//! Pixel-level watermark composition.
//!
//! `apply` is the unit of work a batch job dispatches per file: decode the
//! source, build the watermark layer described by the template, paste it and
//! encode the result. Every failure path is a typed [`ApplyError`] so the
//! caller can record it without aborting the batch.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use regex_lite::Regex;

use crate::error::ApplyError;
use crate::format::OutputFormat;
use crate::template::{Position, Template, TemplateKind};

/// Well-known font locations tried when the template has no `font_path`.
const FONT_CANDIDATES: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/Library/Fonts/Arial Unicode.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Apply `template` to `src` and write the result to `dst`.
pub fn apply(
    src: &Path,
    dst: &Path,
    template: &Template,
    format: OutputFormat,
    quality: u8,
) -> Result<(), ApplyError> {
    let decoded = image::open(src).map_err(|source| ApplyError::Decode {
        path: src.to_path_buf(),
        source,
    })?;
    let mut base = decoded.to_rgba8();
    let (bw, bh) = base.dimensions();

    let layer = match template.kind {
        TemplateKind::Text => {
            let text = expand_date_macros(template.text(), src);
            text_layer(bw, bh, &text, template)?
        }
        TemplateKind::Image => image_layer(bw, template)?,
    };

    paste(
        &mut base,
        &layer,
        template.position,
        template.margin,
        template.tile_gap,
    );

    encode(&base, src, dst, format, quality)
}

fn encode(
    composited: &RgbaImage,
    src: &Path,
    dst: &Path,
    format: OutputFormat,
    quality: u8,
) -> Result<(), ApplyError> {
    let target = format.resolve(src);
    if target == ImageFormat::Jpeg {
        // JPEG has no alpha channel; flatten before encoding.
        let rgb = image::DynamicImage::ImageRgba8(composited.clone()).to_rgb8();
        let file = File::create(dst).map_err(|source| ApplyError::Io {
            path: dst.to_path_buf(),
            source,
        })?;
        let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality.clamp(1, 100));
        rgb.write_with_encoder(encoder)
            .map_err(|source| ApplyError::Encode {
                path: dst.to_path_buf(),
                source,
            })
    } else {
        composited
            .save_with_format(dst, target)
            .map_err(|source| ApplyError::Encode {
                path: dst.to_path_buf(),
                source,
            })
    }
}

/// Expand `{date}` / `{date:format}` macros using the source file's
/// modification time. An unreadable mtime leaves the macro empty; a format
/// string chrono cannot render falls back to the default pattern.
pub fn expand_date_macros(text: &str, src: &Path) -> String {
    if !text.contains("{date") {
        return text.to_string();
    }
    let stamp = std::fs::metadata(src)
        .and_then(|m| m.modified())
        .ok()
        .map(chrono::DateTime::<chrono::Local>::from);

    let re = Regex::new(r"\{date(?::([^}]+))?\}").expect("date macro regex is valid");
    re.replace_all(text, |caps: &regex_lite::Captures| {
        let Some(stamp) = stamp else {
            return String::new();
        };
        let fmt = caps.get(1).map(|m| m.as_str()).unwrap_or(DEFAULT_DATE_FORMAT);
        render_date(&stamp, fmt)
            .or_else(|| render_date(&stamp, DEFAULT_DATE_FORMAT))
            .unwrap_or_default()
    })
    .into_owned()
}

fn render_date(stamp: &chrono::DateTime<chrono::Local>, fmt: &str) -> Option<String> {
    use std::fmt::Write as _;
    let mut out = String::new();
    // chrono surfaces bad user format strings as a fmt::Error.
    write!(out, "{}", stamp.format(fmt)).ok()?;
    Some(out)
}

/// Parse `#RGB` / `#RRGGBB`, defaulting to white on anything malformed.
pub(crate) fn parse_hex_color(s: &str) -> [u8; 3] {
    const WHITE: [u8; 3] = [255, 255, 255];
    let hex = s.trim().trim_start_matches('#');
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return WHITE,
    };
    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16);
    match (channel(0), channel(2), channel(4)) {
        (Ok(r), Ok(g), Ok(b)) => [r, g, b],
        _ => WHITE,
    }
}

fn find_font_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "configured font not found, trying fallbacks");
    }
    FONT_CANDIDATES
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

fn load_font(template: &Template) -> Result<FontVec, ApplyError> {
    let path =
        find_font_file(template.font_path.as_deref()).ok_or(ApplyError::FontUnavailable)?;
    let bytes = std::fs::read(&path).map_err(|source| ApplyError::Io {
        path: path.clone(),
        source,
    })?;
    FontVec::try_from_vec(bytes).map_err(|_| ApplyError::FontInvalid { path })
}

/// Render the text stamp into its own transparent layer: drop shadow first,
/// then the colored text, with padding so neither gets clipped.
fn text_layer(
    base_w: u32,
    base_h: u32,
    text: &str,
    template: &Template,
) -> Result<RgbaImage, ApplyError> {
    let font = load_font(template)?;
    let target_w = (base_w as f32 * template.clamped_scale()).max(10.0);

    // Binary-search the pixel size whose rendered width fits the target.
    let mut lo = 8u32;
    let mut hi = 1000u32;
    let mut chosen = 8u32;
    while lo <= hi {
        let mid = (lo + hi) / 2;
        let (w, _) = text_size(PxScale::from(mid as f32), &font, text);
        if (w as f32) < target_w {
            chosen = mid;
            lo = mid + 1;
        } else {
            hi = mid - 1;
        }
    }

    let scale = PxScale::from(chosen as f32);
    let (tw, th) = text_size(scale, &font, text);
    let tw = (tw as i64).max(1) as u32;
    let th = (th as i64).max(1) as u32;

    let base_pad = (base_w.min(base_h) / 100).max(2);
    let shadow = (base_pad * 3 / 5).max(1);
    let pad = base_pad + shadow + 4;

    let mut layer = RgbaImage::new(tw + pad * 2, th + pad * 2);
    let alpha = (255.0 * template.clamped_opacity()) as u8;
    draw_text_mut(
        &mut layer,
        Rgba([0, 0, 0, alpha]),
        (pad + shadow) as i32,
        (pad + shadow) as i32,
        scale,
        &font,
        text,
    );
    let [r, g, b] = parse_hex_color(template.text_color());
    draw_text_mut(
        &mut layer,
        Rgba([r, g, b, alpha]),
        pad as i32,
        pad as i32,
        scale,
        &font,
        text,
    );

    Ok(rotate_expanded(layer, template.rotation))
}

/// Load and prepare the overlay image layer: resize to the template scale,
/// attenuate its alpha by the opacity, then rotate.
fn image_layer(base_w: u32, template: &Template) -> Result<RgbaImage, ApplyError> {
    let path = template
        .image_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("(unset)"));
    if !path.exists() {
        return Err(ApplyError::WatermarkImageMissing { path });
    }
    let mark = image::open(&path)
        .map_err(|source| ApplyError::Decode {
            path: path.clone(),
            source,
        })?
        .to_rgba8();

    let target_w = (base_w as f32 * template.clamped_scale()).max(1.0);
    let factor = target_w / mark.width() as f32;
    let nw = ((mark.width() as f32 * factor) as u32).max(1);
    let nh = ((mark.height() as f32 * factor) as u32).max(1);
    let mut mark = imageops::resize(&mark, nw, nh, FilterType::Lanczos3);

    let opacity = template.clamped_opacity();
    for px in mark.pixels_mut() {
        px.0[3] = (px.0[3] as f32 * opacity) as u8;
    }

    Ok(rotate_expanded(mark, template.rotation))
}

/// Rotate a layer by an arbitrary angle, expanding the canvas so nothing is
/// clipped. Zero rotation is a no-op.
fn rotate_expanded(layer: RgbaImage, degrees: f32) -> RgbaImage {
    if degrees == 0.0 {
        return layer;
    }
    let theta = degrees.to_radians();
    let (w, h) = (layer.width() as f32, layer.height() as f32);
    let new_w = (w * theta.cos().abs() + h * theta.sin().abs()).ceil() as u32;
    let new_h = (w * theta.sin().abs() + h * theta.cos().abs()).ceil() as u32;
    let new_w = new_w.max(layer.width());
    let new_h = new_h.max(layer.height());

    let mut canvas = RgbaImage::new(new_w, new_h);
    imageops::overlay(
        &mut canvas,
        &layer,
        ((new_w - layer.width()) / 2) as i64,
        ((new_h - layer.height()) / 2) as i64,
    );
    rotate_about_center(&canvas, theta, Interpolation::Bilinear, Rgba([0, 0, 0, 0]))
}

/// Alpha-composite the layer onto the base at the template position.
fn paste(base: &mut RgbaImage, layer: &RgbaImage, position: Position, margin: u32, tile_gap: u32) {
    let (bw, bh) = (base.width() as i64, base.height() as i64);
    let (lw, lh) = (layer.width() as i64, layer.height() as i64);
    let max_x = (bw - lw).max(0);
    let max_y = (bh - lh).max(0);
    let margin = margin as i64;

    if position == Position::Tile {
        let step_x = lw + tile_gap as i64;
        let step_y = lh + tile_gap as i64;
        let mut row = 0i64;
        let mut y = margin;
        while y < bh + step_y {
            // Stagger odd rows by a third of the step, like a brick wall.
            let x0 = if row % 2 == 0 {
                margin
            } else {
                margin + step_x / 3
            };
            let mut x = x0;
            while x < bw + step_x {
                imageops::overlay(base, layer, x.min(max_x), y.min(max_y));
                x += step_x;
            }
            y += step_y;
            row += 1;
        }
        return;
    }

    let (x, y) = match position {
        Position::TopLeft => (margin, margin),
        Position::TopRight => (bw - lw - margin, margin),
        Position::BottomLeft => (margin, bh - lh - margin),
        Position::BottomRight => (bw - lw - margin, bh - lh - margin),
        Position::Center => ((bw - lw) / 2, (bh - lh) / 2),
        Position::Tile => unreachable!(),
    };
    imageops::overlay(base, layer, x.clamp(0, max_x), y.clamp(0, max_y));
}
