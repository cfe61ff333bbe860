//! Flattens a viewport [`Frame`] into one RGBA canvas for the terminal.

use lektra_core::geometry::Rect;
use lektra_core::types::{Color, RenderImage};
use lektra_core::viewport::{Frame, OverlayKind};

/// Pixel bounds `[x0, x1) x [y0, y1)` of `rect` on a `width` x `height`
/// canvas, or `None` when nothing is visible.
fn clip(rect: &Rect, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = rect.x0.round().max(0.0) as u32;
    let y0 = rect.y0.round().max(0.0) as u32;
    let x1 = (rect.x1.round().max(0.0) as u32).min(width);
    let y1 = (rect.y1.round().max(0.0) as u32).min(height);
    (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
}

fn blend(dst: &mut [u8], src: [u8; 4]) {
    let alpha = src[3] as u32;
    if alpha == 255 {
        dst[..3].copy_from_slice(&src[..3]);
        return;
    }
    let inv = 255 - alpha;
    for i in 0..3 {
        dst[i] = ((src[i] as u32 * alpha + dst[i] as u32 * inv + 127) / 255) as u8;
    }
}

fn fill(canvas: &mut RenderImage, rect: &Rect, color: Color) {
    let px = color.to_rgba8();
    if px[3] == 0 {
        return;
    }
    let Some((x0, y0, x1, y1)) = clip(rect, canvas.width, canvas.height) else {
        return;
    };
    let stride = canvas.width as usize * 4;
    for y in y0..y1 {
        let row = y as usize * stride;
        for x in x0..x1 {
            let at = row + x as usize * 4;
            blend(&mut canvas.pixels[at..at + 4], px);
        }
    }
}

fn outline(canvas: &mut RenderImage, rect: &Rect, color: Color) {
    let edges = [
        Rect::new(rect.x0, rect.y0, rect.x1, rect.y0 + 1.0),
        Rect::new(rect.x0, rect.y1 - 1.0, rect.x1, rect.y1),
        Rect::new(rect.x0, rect.y0 + 1.0, rect.x0 + 1.0, rect.y1 - 1.0),
        Rect::new(rect.x1 - 1.0, rect.y0 + 1.0, rect.x1, rect.y1 - 1.0),
    ];
    let solid = color.with_alpha(1.0);
    for edge in &edges {
        fill(canvas, edge, solid);
    }
}

/// Copies `image` into `dest`, scaling nearest-neighbour when the sizes
/// differ. Image pixels are opaque page content and overwrite the canvas.
fn blit(canvas: &mut RenderImage, dest: &Rect, image: &RenderImage) {
    let Some((x0, y0, x1, y1)) = clip(dest, canvas.width, canvas.height) else {
        return;
    };
    if image.width == 0 || image.height == 0 {
        return;
    }
    let sx = image.width as f32 / dest.width().max(1.0);
    let sy = image.height as f32 / dest.height().max(1.0);
    let stride = canvas.width as usize * 4;
    let src_stride = image.width as usize * 4;
    for y in y0..y1 {
        let src_y = (((y as f32 + 0.5 - dest.y0) * sy) as u32).min(image.height - 1);
        let src_row = src_y as usize * src_stride;
        let row = y as usize * stride;
        for x in x0..x1 {
            let src_x = (((x as f32 + 0.5 - dest.x0) * sx) as u32).min(image.width - 1);
            let from = src_row + src_x as usize * 4;
            let at = row + x as usize * 4;
            canvas.pixels[at..at + 4].copy_from_slice(&image.pixels[from..from + 4]);
        }
    }
}

pub fn compose(frame: &Frame, background: Color) -> RenderImage {
    let width = frame.width.max(0.0).round() as u32;
    let height = frame.height.max(0.0).round() as u32;
    let mut canvas = RenderImage::filled(width, height, background.with_alpha(1.0));

    for page in &frame.pages {
        match &page.image {
            Some(image) => blit(&mut canvas, &page.rect, image),
            None => fill(&mut canvas, &page.rect, page.placeholder.with_alpha(1.0)),
        }
    }

    for overlay in &frame.overlays {
        match overlay.kind {
            OverlayKind::Region | OverlayKind::SelectedAnnotation => {
                fill(&mut canvas, &overlay.rect, overlay.color);
                outline(&mut canvas, &overlay.rect, overlay.color);
            }
            _ => fill(&mut canvas, &overlay.rect, overlay.color),
        }
    }
    canvas
}

/// Terminal cell of each hint label, dropping labels outside the grid.
pub fn hint_cells(
    frame: &Frame,
    cell_width: f32,
    cell_height: f32,
    columns: u16,
    rows: u16,
) -> Vec<(u16, u16, String)> {
    if cell_width <= 0.0 || cell_height <= 0.0 {
        return Vec::new();
    }
    frame
        .hints
        .iter()
        .filter(|hint| hint.at.x >= 0.0 && hint.at.y >= 0.0)
        .filter_map(|hint| {
            let column = (hint.at.x / cell_width).floor() as u32;
            let row = (hint.at.y / cell_height).floor() as u32;
            (column < columns as u32 && row < rows as u32)
                .then(|| (column as u16, row as u16, hint.label.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use lektra_core::geometry::Point;
    use lektra_core::viewport::{FramePage, HintLabel, Overlay};

    fn pixel(image: &RenderImage, x: u32, y: u32) -> [u8; 4] {
        let at = (y * image.width + x) as usize * 4;
        [
            image.pixels[at],
            image.pixels[at + 1],
            image.pixels[at + 2],
            image.pixels[at + 3],
        ]
    }

    fn empty_frame(width: f32, height: f32) -> Frame {
        Frame {
            width,
            height,
            pages: Vec::new(),
            overlays: Vec::new(),
            hints: Vec::new(),
        }
    }

    #[test]
    fn pages_are_scaled_into_their_rects() {
        let mut frame = empty_frame(10.0, 10.0);
        let mut pixels = Vec::new();
        for y in 0..2u8 {
            for x in 0..2u8 {
                pixels.extend_from_slice(&[x * 200, y * 200, 0, 255]);
            }
        }
        frame.pages.push(FramePage {
            page: 0,
            rect: Rect::new(2.0, 2.0, 6.0, 6.0),
            image: Some(Arc::new(RenderImage::new(2, 2, pixels))),
            placeholder: Color::WHITE,
        });

        let canvas = compose(&frame, Color::BLACK);
        assert_eq!((canvas.width, canvas.height), (10, 10));
        assert_eq!(pixel(&canvas, 0, 0), [0, 0, 0, 255]);
        assert_eq!(pixel(&canvas, 2, 2), [0, 0, 0, 255]);
        assert_eq!(pixel(&canvas, 5, 2), [200, 0, 0, 255]);
        assert_eq!(pixel(&canvas, 5, 5), [200, 200, 0, 255]);
        assert_eq!(pixel(&canvas, 6, 6), [0, 0, 0, 255]);
    }

    #[test]
    fn placeholders_fill_pages_without_pixels() {
        let mut frame = empty_frame(4.0, 4.0);
        frame.pages.push(FramePage {
            page: 0,
            rect: Rect::new(-2.0, 0.0, 2.0, 8.0),
            image: None,
            placeholder: Color::WHITE,
        });
        let canvas = compose(&frame, Color::BLACK);
        assert_eq!(pixel(&canvas, 1, 3), [255, 255, 255, 255]);
        assert_eq!(pixel(&canvas, 2, 3), [0, 0, 0, 255]);
    }

    #[test]
    fn overlays_blend_and_transparent_ones_vanish() {
        let mut frame = empty_frame(4.0, 4.0);
        frame.overlays.push(Overlay {
            kind: OverlayKind::SearchHit,
            rect: Rect::new(0.0, 0.0, 2.0, 2.0),
            color: Color::rgba(1.0, 1.0, 1.0, 0.5),
        });
        frame.overlays.push(Overlay {
            kind: OverlayKind::Link,
            rect: Rect::new(0.0, 0.0, 4.0, 4.0),
            color: Color::TRANSPARENT,
        });
        let canvas = compose(&frame, Color::BLACK);
        assert_eq!(pixel(&canvas, 0, 0), [128, 128, 128, 255]);
        assert_eq!(pixel(&canvas, 3, 3), [0, 0, 0, 255]);
    }

    #[test]
    fn hint_labels_land_on_cells() {
        let mut frame = empty_frame(100.0, 100.0);
        frame.hints.push(HintLabel {
            label: "1".into(),
            at: Point::new(25.0, 35.0),
        });
        frame.hints.push(HintLabel {
            label: "2".into(),
            at: Point::new(-5.0, 10.0),
        });
        frame.hints.push(HintLabel {
            label: "3".into(),
            at: Point::new(95.0, 95.0),
        });
        let cells = hint_cells(&frame, 10.0, 20.0, 8, 4);
        assert_eq!(cells, vec![(2, 1, "1".to_owned())]);
    }
}
