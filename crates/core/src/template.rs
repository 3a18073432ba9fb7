// crates/core/src/template.rs
//! Watermark template model.
//!
//! A template describes one reusable watermark: either a text stamp (with
//! font, color and a drop shadow) or an overlay image, plus the shared
//! geometry knobs (scale, opacity, position, rotation, margin, tile gap).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Kind of watermark a template produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Text,
    Image,
}

/// Where the watermark layer is placed on the base image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
    /// Staggered grid covering the whole image.
    Tile,
}

/// One named watermark template as stored in the template store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "type")]
    pub kind: TemplateKind,
    /// Watermark width as a fraction of the base image width (0.02..=1.0).
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default = "default_position")]
    pub position: Position,
    /// Counter-clockwise rotation in degrees.
    #[serde(default)]
    pub rotation: f32,
    /// Distance from the image edges, in pixels.
    #[serde(default = "default_margin")]
    pub margin: u32,
    /// Gap between tiles when `position` is [`Position::Tile`].
    #[serde(default = "default_tile_gap")]
    pub tile_gap: u32,
    /// Stamp text; `{date[:format]}` macros expand per source file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Hex color for text stamps, e.g. `#FFCC00` or `#FC0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    /// Explicit TTF/OTF font; falls back to well-known system fonts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_path: Option<PathBuf>,
    /// Overlay image for image templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
}

pub const DEFAULT_TEXT: &str = "WATERMARK";
pub const DEFAULT_TEXT_COLOR: &str = "#FFFFFF";

fn default_scale() -> f32 {
    0.2
}

fn default_opacity() -> f32 {
    0.25
}

fn default_position() -> Position {
    Position::BottomRight
}

fn default_margin() -> u32 {
    16
}

fn default_tile_gap() -> u32 {
    80
}

impl Template {
    /// Effective stamp text for text templates.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or(DEFAULT_TEXT)
    }

    /// Effective text color (hex string).
    pub fn text_color(&self) -> &str {
        self.text_color.as_deref().unwrap_or(DEFAULT_TEXT_COLOR)
    }

    /// Scale clamped to the supported range.
    pub fn clamped_scale(&self) -> f32 {
        self.scale.clamp(0.02, 1.0)
    }

    /// Opacity clamped to 0..=1.
    pub fn clamped_opacity(&self) -> f32 {
        self.opacity.clamp(0.0, 1.0)
    }
}

impl Default for Template {
    fn default() -> Self {
        Self {
            kind: TemplateKind::Text,
            scale: default_scale(),
            opacity: default_opacity(),
            position: default_position(),
            rotation: 0.0,
            margin: default_margin(),
            tile_gap: default_tile_gap(),
            text: None,
            text_color: None,
            font_path: None,
            image_path: None,
        }
    }
}
