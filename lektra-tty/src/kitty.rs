use std::io::Write;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::style::{Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::{
    cursor, queue,
    terminal::{self, Clear, ClearType},
};
use lektra_core::types::{Color, RenderImage};
use png::{BitDepth, ColorType, Encoder};
use tracing::trace;

/// Cell size assumed when the terminal does not report its pixel size.
const FALLBACK_CELL: (f32, f32) = (8.0, 16.0);

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

/// Terminal grid and its size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminalGeometry {
    pub columns: u16,
    pub rows: u16,
    pub width_px: u32,
    pub height_px: u32,
}

impl TerminalGeometry {
    pub fn query() -> Result<Self> {
        let size = terminal::window_size()?;
        Ok(Self::from_parts(
            size.columns,
            size.rows,
            size.width as u32,
            size.height as u32,
        ))
    }

    pub fn from_parts(columns: u16, rows: u16, width_px: u32, height_px: u32) -> Self {
        let columns = columns.max(1);
        let rows = rows.max(1);
        let (width_px, height_px) = if width_px == 0 || height_px == 0 {
            (
                (columns as f32 * FALLBACK_CELL.0) as u32,
                (rows as f32 * FALLBACK_CELL.1) as u32,
            )
        } else {
            (width_px, height_px)
        };
        Self {
            columns,
            rows,
            width_px,
            height_px,
        }
    }

    pub fn cell_size(&self) -> (f32, f32) {
        (
            self.width_px as f32 / self.columns as f32,
            self.height_px as f32 / self.rows as f32,
        )
    }

    /// Pixel area above the status row.
    pub fn view_pixels(&self) -> (u32, u32) {
        let (_, cell_h) = self.cell_size();
        let height = (self.height_px as f32 - cell_h).max(cell_h);
        (self.width_px, height as u32)
    }

    pub fn view_rows(&self) -> u16 {
        self.rows.saturating_sub(1).max(1)
    }

    /// Viewport pixel position of a cell's centre.
    pub fn cell_center(&self, column: u16, row: u16) -> (f32, f32) {
        let (w, h) = self.cell_size();
        ((column as f32 + 0.5) * w, (row as f32 + 0.5) * h)
    }
}

fn crossterm_color(color: Color) -> crossterm::style::Color {
    let [r, g, b, _] = color.to_rgba8();
    crossterm::style::Color::Rgb { r, g, b }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Transmits `image` and places it at the cursor over `params` cells.
    /// Reusing the image id replaces the previous frame in place.
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        trace!(
            width = image.width,
            height = image.height,
            png_bytes = buffer.len(),
            "sending frame"
        );
        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    if more { 1 } else { 0 }
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", if more { 1 } else { 0 })?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    pub fn draw_at(
        &mut self,
        image: &RenderImage,
        column: u16,
        row: u16,
        params: DrawParams,
    ) -> Result<()> {
        queue!(self.writer, cursor::MoveTo(column, row))?;
        self.draw(image, params)
    }

    /// Numeric link labels drawn as text on top of the image.
    pub fn draw_hints(
        &mut self,
        hints: &[(u16, u16, String)],
        background: Color,
        foreground: Color,
    ) -> Result<()> {
        for (column, row, label) in hints {
            queue!(
                self.writer,
                cursor::MoveTo(*column, *row),
                SetBackgroundColor(crossterm_color(background)),
                SetForegroundColor(crossterm_color(foreground)),
                Print(label),
                ResetColor
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Replaces the bottom row with `label`, truncated to the grid width.
    pub fn write_status_line(&mut self, row: u16, columns: u16, label: &str) -> Result<()> {
        let text: String = label.chars().take(columns as usize).collect();
        queue!(
            self.writer,
            cursor::MoveTo(0, row),
            Clear(ClearType::CurrentLine),
            Print(text)
        )?;
        self.writer.flush()?;
        Ok(())
    }

    /// Drops every image the terminal holds for us.
    pub fn delete_images(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=A,q=2\u{1b}\\")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Clears the entire screen.
    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kitty_draw_emits_protocol() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let image = RenderImage::new(1, 1, vec![255, 0, 0, 255]);

        renderer.draw(&image, DrawParams::clamped(10, 5)).unwrap();
        let output = renderer.into_inner();
        assert_eq!(output[0], 0x1b);
        assert_eq!(output[1], b'_');
        assert_eq!(output[2], b'G');
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("a=T,f=100"));
        assert!(text.contains("c=10,r=5,s=1,v=1"));
        assert!(text.ends_with("\u{1b}\\"));
    }

    #[test]
    fn large_images_are_chunked() {
        let mut renderer = KittyRenderer::new(Vec::new());
        // Noise so the PNG does not compress below one chunk.
        let mut state = 0x2545_f491u32;
        let pixels: Vec<u8> = (0..64 * 64 * 4)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect();
        let image = RenderImage::new(64, 64, pixels);
        renderer.draw(&image, DrawParams::clamped(0, 0)).unwrap();
        let text = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(text.contains("c=1,r=1"));
        assert!(text.contains(",m=1;"));
        assert!(text.contains("\u{1b}_Gm=0,q=2;"));
    }

    #[test]
    fn status_line_is_truncated() {
        let mut renderer = KittyRenderer::new(Vec::new());
        renderer.write_status_line(23, 5, "page 1/10").unwrap();
        let text = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(text.ends_with("page "));
    }

    #[test]
    fn geometry_falls_back_when_pixels_are_unknown() {
        let geometry = TerminalGeometry::from_parts(80, 24, 0, 0);
        assert_eq!(geometry.cell_size(), (8.0, 16.0));
        assert_eq!(geometry.view_pixels(), (640, 368));
        assert_eq!(geometry.view_rows(), 23);
        assert_eq!(geometry.cell_center(1, 0), (12.0, 8.0));

        let reported = TerminalGeometry::from_parts(100, 50, 1000, 1000);
        assert_eq!(reported.cell_size(), (10.0, 20.0));
    }
}
