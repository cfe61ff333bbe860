//! Text selection snapping, region mapping, and overlay hit-testing.

use crate::geometry::{IRect, Point, Quad, Rect};
use crate::text::{CharPos, StructuredText, TextLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapMode {
    #[default]
    Chars,
    Words,
    Lines,
    Block,
}

/// A resolved selection on one page, endpoints ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSelection {
    pub page: usize,
    pub start: CharPos,
    pub end: CharPos,
    /// One quad per selected line, page space.
    pub quads: Vec<Quad>,
    pub text: String,
}

/// Character closest to `p`: the nearest line vertically, then the nearest
/// character within it.
pub fn nearest_char(text: &StructuredText, p: Point) -> Option<CharPos> {
    let mut best: Option<((f32, f32), usize, usize)> = None;
    for (bi, block) in text.blocks.iter().enumerate() {
        for (li, line) in block.lines.iter().enumerate() {
            if line.chars.is_empty() {
                continue;
            }
            let key = (axis_distance(p.y, line.bbox.y0, line.bbox.y1), axis_distance(p.x, line.bbox.x0, line.bbox.x1));
            if best.map_or(true, |(k, _, _)| key < k) {
                best = Some((key, bi, li));
            }
        }
    }
    let (_, block, line) = best?;
    let chars = &text.blocks[block].lines[line].chars;
    let ch = chars
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let r = c.quad.bounds();
            (axis_distance(p.x, r.x0, r.x1), i)
        })
        .fold(None::<(f32, usize)>, |acc, cur| match acc {
            Some(a) if a.0 <= cur.0 => Some(a),
            _ => Some(cur),
        })
        .map(|(_, i)| i)?;
    Some(CharPos { block, line, ch })
}

fn axis_distance(v: f32, lo: f32, hi: f32) -> f32 {
    if v < lo {
        lo - v
    } else if v > hi {
        v - hi
    } else {
        0.0
    }
}

fn line_of(text: &StructuredText, pos: CharPos) -> Option<&TextLine> {
    text.blocks.get(pos.block)?.lines.get(pos.line)
}

/// Widens `[start, end]` to the requested granularity.
pub fn snap(text: &StructuredText, start: CharPos, end: CharPos, mode: SnapMode) -> (CharPos, CharPos) {
    let (mut start, mut end) = if start <= end { (start, end) } else { (end, start) };
    match mode {
        SnapMode::Chars => {}
        SnapMode::Words => {
            if let Some(line) = line_of(text, start) {
                while start.ch > 0 && !line.chars[start.ch - 1].c.is_whitespace() {
                    start.ch -= 1;
                }
            }
            if let Some(line) = line_of(text, end) {
                while end.ch + 1 < line.chars.len() && !line.chars[end.ch + 1].c.is_whitespace() {
                    end.ch += 1;
                }
            }
        }
        SnapMode::Lines => {
            start.ch = 0;
            if let Some(line) = line_of(text, end) {
                end.ch = line.chars.len().saturating_sub(1);
            }
        }
        SnapMode::Block => {
            start.line = 0;
            start.ch = 0;
            if let Some(block) = text.blocks.get(end.block) {
                end.line = block.lines.len().saturating_sub(1);
                end.ch = block
                    .lines
                    .get(end.line)
                    .map_or(0, |l| l.chars.len().saturating_sub(1));
            }
        }
    }
    (start, end)
}

/// Quads and text of everything between `start` and `end` inclusive.
pub fn selection_between(text: &StructuredText, start: CharPos, end: CharPos) -> (Vec<Quad>, String) {
    let mut quads = Vec::new();
    let mut out = String::new();
    for (bi, block) in text.blocks.iter().enumerate() {
        for (li, line) in block.lines.iter().enumerate() {
            let here = CharPos { block: bi, line: li, ch: 0 };
            let last = CharPos {
                block: bi,
                line: li,
                ch: line.chars.len().saturating_sub(1),
            };
            if line.chars.is_empty() || last < start || here > end {
                continue;
            }
            let from = if (bi, li) == (start.block, start.line) { start.ch } else { 0 };
            let to = if (bi, li) == (end.block, end.line) { end.ch } else { last.ch };
            let to = to.min(last.ch);
            if from > to {
                continue;
            }
            let selected = &line.chars[from..=to];
            if let Some(bounds) = selected.iter().map(|c| c.quad.bounds()).reduce(|a, b| a.union(&b)) {
                quads.push(Quad::from_rect(&bounds));
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.extend(selected.iter().map(|c| c.c));
        }
    }
    (quads, out)
}

/// Full selection pipeline between two page-space points.
pub fn select(text: &StructuredText, page: usize, a: Point, b: Point, mode: SnapMode) -> Option<TextSelection> {
    let start = nearest_char(text, a)?;
    let end = nearest_char(text, b)?;
    let (start, end) = snap(text, start, end, mode);
    let (quads, text) = selection_between(text, start, end);
    Some(TextSelection {
        page,
        start,
        end,
        quads,
        text,
    })
}

/// A rubber-band region resolved against one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub page: usize,
    /// Page-local logical pixels.
    pub logical: Rect,
    /// Device pixels inside the page image.
    pub pixels: IRect,
}

/// Clips `scene_rect` to the page at `page_scene_rect` and scales it into
/// the page image's pixel grid.
pub fn map_region(
    page: usize,
    page_scene_rect: &Rect,
    scene_rect: &Rect,
    dpr: f32,
    image_size: (u32, u32),
) -> Option<Region> {
    let clipped = scene_rect.intersect(page_scene_rect);
    if clipped.is_empty() {
        return None;
    }
    let logical = clipped.translate(-page_scene_rect.x0, -page_scene_rect.y0);
    let image = IRect {
        x0: 0,
        y0: 0,
        x1: image_size.0 as i32,
        y1: image_size.1 as i32,
    };
    let px = logical.scale(dpr).round_out();
    let pixels = IRect {
        x0: px.x0.clamp(image.x0, image.x1),
        y0: px.y0.clamp(image.y0, image.y1),
        x1: px.x1.clamp(image.x0, image.x1),
        y1: px.y1.clamp(image.y0, image.y1),
    };
    if pixels.is_empty() {
        return None;
    }
    Some(Region {
        page,
        logical,
        pixels,
    })
}

/// First item whose rect contains `p`.
pub fn hit_point<T>(items: &[T], rect: impl Fn(&T) -> Rect, p: Point) -> Option<&T> {
    items.iter().find(|item| rect(item).contains(p))
}

/// Every item whose rect intersects `area`.
pub fn hit_area<'a, T>(items: &'a [T], rect: impl Fn(&T) -> Rect + 'a, area: &'a Rect) -> impl Iterator<Item = &'a T> + 'a {
    items.iter().filter(move |item| rect(item).intersects(area))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::tests::layout;

    fn sample() -> StructuredText {
        // block 0: two lines, block 1 far below
        layout(&["hello brave world", "second line here"], 0.0, 0.0, 5.0, 12.0)
    }

    #[test]
    fn nearest_char_prefers_line_then_column() {
        let text = sample();
        assert_eq!(nearest_char(&text, Point::new(7.0, 5.0)), Some(CharPos { block: 0, line: 0, ch: 1 }));
        assert_eq!(nearest_char(&text, Point::new(500.0, 15.0)), Some(CharPos { block: 0, line: 1, ch: 15 }));
        assert_eq!(nearest_char(&StructuredText::default(), Point::new(0.0, 0.0)), None);
    }

    #[test]
    fn word_snap_expands_to_whitespace() {
        let text = sample();
        let sel = select(&text, 0, Point::new(32.0, 5.0), Point::new(32.0, 5.0), SnapMode::Words).unwrap();
        assert_eq!(sel.text, "brave");
        assert_eq!(sel.quads.len(), 1);
        assert_eq!(sel.quads[0].bounds(), Rect::new(30.0, 0.0, 55.0, 10.0));
    }

    #[test]
    fn multi_line_selection_yields_quad_per_line() {
        let text = sample();
        let sel = select(&text, 2, Point::new(62.0, 5.0), Point::new(12.0, 15.0), SnapMode::Chars).unwrap();
        assert_eq!(sel.text, "world\nsec");
        assert_eq!(sel.quads.len(), 2);
        assert_eq!(sel.page, 2);
    }

    #[test]
    fn reversed_drag_is_ordered() {
        let text = sample();
        let forward = select(&text, 0, Point::new(2.0, 5.0), Point::new(22.0, 5.0), SnapMode::Chars).unwrap();
        let backward = select(&text, 0, Point::new(22.0, 5.0), Point::new(2.0, 5.0), SnapMode::Chars).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.text, "hello");
    }

    #[test]
    fn line_and_block_snap() {
        let text = sample();
        let line = select(&text, 0, Point::new(40.0, 15.0), Point::new(40.0, 15.0), SnapMode::Lines).unwrap();
        assert_eq!(line.text, "second line here");
        let block = select(&text, 0, Point::new(40.0, 15.0), Point::new(40.0, 15.0), SnapMode::Block).unwrap();
        assert_eq!(block.text, "hello brave world\nsecond line here");
    }

    #[test]
    fn region_is_clipped_to_page_and_image() {
        let page = Rect::new(100.0, 50.0, 300.0, 350.0);
        let region = map_region(4, &page, &Rect::new(80.0, 100.0, 150.0, 120.0), 2.0, (400, 600)).unwrap();
        assert_eq!(region.logical, Rect::new(0.0, 50.0, 50.0, 70.0));
        assert_eq!(region.pixels, IRect { x0: 0, y0: 100, x1: 100, y1: 140 });
        assert!(map_region(4, &page, &Rect::new(0.0, 0.0, 50.0, 40.0), 2.0, (400, 600)).is_none());
    }

    #[test]
    fn hit_tests_use_rects() {
        let rects = vec![Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(20.0, 0.0, 30.0, 10.0)];
        assert_eq!(hit_point(&rects, |r| *r, Point::new(25.0, 5.0)), Some(&rects[1]));
        assert!(hit_point(&rects, |r| *r, Point::new(15.0, 5.0)).is_none());
        let area = Rect::new(5.0, 5.0, 22.0, 6.0);
        assert_eq!(hit_area(&rects, |r| *r, &area).count(), 2);
    }
}
