use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DocumentId;

/// RGBA colour with float channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::rgba(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        )
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid colour {0:?}, expected #RRGGBB or #RRGGBBAA")]
pub struct ParseColorError(String);

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(ParseColorError(s.to_owned()));
        }
        let byte = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ParseColorError(s.to_owned()))
        };
        let alpha = if hex.len() == 8 { byte(6)? } else { 255 };
        Ok(Color::from_rgba8(byte(0)?, byte(2)?, byte(4)?, alpha))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.to_rgba8();
        write!(f, "#{r:02X}{g:02X}{b:02X}{a:02X}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    Pdf,
    Epub,
    Cbz,
    Svg,
    Xps,
    Image,
    Unknown,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => FileKind::Pdf,
            "epub" => FileKind::Epub,
            "cbz" | "cbr" => FileKind::Cbz,
            "svg" => FileKind::Svg,
            "xps" | "oxps" => FileKind::Xps,
            "png" | "jpg" | "jpeg" | "bmp" | "gif" | "tiff" => FileKind::Image,
            _ => FileKind::Unknown,
        }
    }

    /// Only PDFs accept annotations, saves and encryption.
    pub fn is_editable(self) -> bool {
        matches!(self, FileKind::Pdf)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileKind::Pdf => "PDF",
            FileKind::Epub => "EPUB",
            FileKind::Cbz => "CBZ",
            FileKind::Svg => "SVG",
            FileKind::Xps => "XPS",
            FileKind::Image => "Image",
            FileKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    Single,
    Horizontal,
    #[default]
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    #[default]
    None,
    Width,
    Height,
    Window,
}

impl FitMode {
    pub fn as_index(self) -> i32 {
        match self {
            FitMode::None => 0,
            FitMode::Width => 1,
            FitMode::Height => 2,
            FitMode::Window => 3,
        }
    }

    pub fn from_index(index: i64) -> Self {
        match index {
            1 => FitMode::Width,
            2 => FitMode::Height,
            3 => FitMode::Window,
            _ => FitMode::None,
        }
    }
}

impl FromStr for FitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(FitMode::None),
            "width" => Ok(FitMode::Width),
            "height" => Ok(FitMode::Height),
            "window" | "page" => Ok(FitMode::Window),
            other => Err(format!("unknown fit mode {other:?}")),
        }
    }
}

/// A point inside a page, in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageLocation {
    pub page: usize,
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom: Option<f32>,
}

impl PageLocation {
    pub fn new(page: usize, x: f32, y: f32) -> Self {
        Self {
            page,
            x,
            y,
            zoom: None,
        }
    }

    pub fn top_of(page: usize) -> Self {
        Self::new(page, 0.0, 0.0)
    }

    /// NaN coordinates (unspecified destination components) become zero.
    pub fn sanitized(mut self) -> Self {
        if self.x.is_nan() {
            self.x = 0.0;
        }
        if self.y.is_nan() {
            self.y = 0.0;
        }
        self
    }

    pub fn approx_eq(&self, other: &PageLocation) -> bool {
        self.page == other.page
            && (self.x - other.x).abs() < 0.5
            && (self.y - other.y).abs() < 0.5
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub path: PathBuf,
    pub kind: FileKind,
    pub page_count: usize,
    pub encrypted: bool,
    pub pdf_version: Option<String>,
    pub metadata: DocumentMetadata,
}

/// RGBA8 pixel buffer produced by a render.
#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub device_pixel_ratio: f32,
    pub dpi: f32,
}

impl RenderImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
            device_pixel_ratio: 1.0,
            dpi: 72.0,
        }
    }

    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        let px = color.to_rgba8();
        let pixels = px
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::new(width, height, pixels)
    }

    /// Copies the pixel rect `(x, y, w, h)`, clipped to the image.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Option<RenderImage> {
        let x1 = x.saturating_add(w).min(self.width);
        let y1 = y.saturating_add(h).min(self.height);
        if x >= x1 || y >= y1 {
            return None;
        }
        let stride = self.width as usize * 4;
        let mut pixels = Vec::with_capacity((x1 - x) as usize * (y1 - y) as usize * 4);
        for row in y..y1 {
            let start = row as usize * stride + x as usize * 4;
            let end = row as usize * stride + x1 as usize * 4;
            pixels.extend_from_slice(&self.pixels[start..end]);
        }
        Some(RenderImage {
            width: x1 - x,
            height: y1 - y,
            pixels,
            device_pixel_ratio: self.device_pixel_ratio,
            dpi: self.dpi,
        })
    }
}
