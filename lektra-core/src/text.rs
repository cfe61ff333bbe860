//! Structured page text: blocks of lines of positioned characters.

use crate::geometry::{Point, Quad, Rect};

#[derive(Debug, Clone, PartialEq)]
pub struct TextChar {
    pub c: char,
    pub quad: Quad,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextLine {
    pub bbox: Rect,
    pub chars: Vec<TextChar>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextBlock {
    pub bbox: Rect,
    pub lines: Vec<TextLine>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructuredText {
    pub blocks: Vec<TextBlock>,
}

/// Position of one character: block, line, char.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CharPos {
    pub block: usize,
    pub line: usize,
    pub ch: usize,
}

impl StructuredText {
    pub fn is_empty(&self) -> bool {
        self.blocks
            .iter()
            .all(|b| b.lines.iter().all(|l| l.chars.is_empty()))
    }

    pub fn lines(&self) -> impl Iterator<Item = &TextLine> {
        self.blocks.iter().flat_map(|b| b.lines.iter())
    }

    pub fn char_at(&self, pos: CharPos) -> Option<&TextChar> {
        self.blocks
            .get(pos.block)?
            .lines
            .get(pos.line)?
            .chars
            .get(pos.ch)
    }

    pub fn first_char(&self) -> Option<CharPos> {
        self.positions().next()
    }

    pub fn last_char(&self) -> Option<CharPos> {
        self.positions().last()
    }

    /// Every character position in reading order.
    pub fn positions(&self) -> impl Iterator<Item = CharPos> + '_ {
        self.blocks.iter().enumerate().flat_map(|(bi, block)| {
            block.lines.iter().enumerate().flat_map(move |(li, line)| {
                (0..line.chars.len()).map(move |ci| CharPos {
                    block: bi,
                    line: li,
                    ch: ci,
                })
            })
        })
    }

    /// Text whose character centres fall inside `area`, one output line per
    /// source line.
    pub fn text_in_rect(&self, area: &Rect) -> String {
        let mut out = String::new();
        for line in self.lines() {
            let mut line_text = String::new();
            for ch in &line.chars {
                if area.contains(ch.quad.bounds().center()) {
                    line_text.push(ch.c);
                }
            }
            if !line_text.is_empty() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(line_text.trim_end());
            }
        }
        out
    }

    /// Text of characters intersecting any of `quads` (highlight contents).
    pub fn text_in_quads(&self, quads: &[Quad]) -> String {
        let rects: Vec<Rect> = quads.iter().map(Quad::bounds).collect();
        let mut out = String::new();
        for line in self.lines() {
            let mut hit = false;
            for ch in &line.chars {
                let center = ch.quad.bounds().center();
                if rects.iter().any(|r| r.contains(center)) {
                    out.push(ch.c);
                    hit = true;
                }
            }
            if hit && !out.ends_with(' ') {
                out.push(' ');
            }
        }
        out.trim_end().to_owned()
    }

    pub fn first_char_position(&self) -> Option<Point> {
        let pos = self.first_char()?;
        self.char_at(pos).map(|c| c.quad.ul)
    }
}

/// Groups a stream of positioned characters into lines and blocks.
///
/// Native text APIs usually yield characters in content order with generated
/// `\r`/`\n` between lines; those close the current line. A vertical gap of
/// more than `block_gap` line heights starts a new block.
pub struct TextPageBuilder {
    blocks: Vec<TextBlock>,
    line: TextLine,
    block_gap: f32,
}

impl Default for TextPageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TextPageBuilder {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            line: TextLine::default(),
            block_gap: 1.2,
        }
    }

    pub fn push(&mut self, c: char, quad: Quad) {
        if c == '\n' || c == '\r' {
            self.end_line();
            return;
        }
        if let Some(last) = self.line.chars.last() {
            // a glyph that starts above the previous one's baseline region
            // or jumps far back to the left begins a new visual line
            let prev = last.quad.bounds();
            let cur = quad.bounds();
            let height = prev.height().max(cur.height()).max(1.0);
            if cur.y0 >= prev.y1 - height * 0.25 || cur.x1 < prev.x0 - height * 2.0 {
                self.end_line();
            }
        }
        let bounds = quad.bounds();
        self.line.bbox = if self.line.chars.is_empty() {
            bounds
        } else {
            self.line.bbox.union(&bounds)
        };
        self.line.chars.push(TextChar { c, quad });
    }

    pub fn end_line(&mut self) {
        if self.line.chars.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.line);
        let starts_block = match self.blocks.last().and_then(|b| b.lines.last()) {
            None => true,
            Some(prev) => {
                let gap = line.bbox.y0 - prev.bbox.y1;
                gap > prev.bbox.height().max(1.0) * self.block_gap || line.bbox.y1 < prev.bbox.y0
            }
        };
        if starts_block {
            self.blocks.push(TextBlock {
                bbox: line.bbox,
                lines: vec![line],
            });
        } else if let Some(block) = self.blocks.last_mut() {
            block.bbox = block.bbox.union(&line.bbox);
            block.lines.push(line);
        }
    }

    pub fn finish(mut self) -> StructuredText {
        self.end_line();
        StructuredText {
            blocks: self.blocks,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Monospaced glyphs: `char_w` wide, 10pt tall, one line per entry.
    pub(crate) fn layout(lines: &[&str], x: f32, y: f32, char_w: f32, line_gap: f32) -> StructuredText {
        let mut builder = TextPageBuilder::new();
        for (li, line) in lines.iter().enumerate() {
            let top = y + li as f32 * line_gap;
            for (ci, c) in line.chars().enumerate() {
                let left = x + ci as f32 * char_w;
                builder.push(c, Quad::from_rect(&Rect::new(left, top, left + char_w, top + 10.0)));
            }
            builder.push('\n', Quad::default());
        }
        builder.finish()
    }

    #[test]
    fn builder_groups_lines_and_blocks() {
        let mut builder = TextPageBuilder::new();
        for (i, c) in "ab".chars().enumerate() {
            let x = i as f32 * 5.0;
            builder.push(c, Quad::from_rect(&Rect::new(x, 0.0, x + 5.0, 10.0)));
        }
        builder.push('\r', Quad::default());
        builder.push('\n', Quad::default());
        builder.push('c', Quad::from_rect(&Rect::new(0.0, 12.0, 5.0, 22.0)));
        builder.end_line();
        // far below: new block
        builder.push('d', Quad::from_rect(&Rect::new(0.0, 100.0, 5.0, 110.0)));
        let text = builder.finish();

        assert_eq!(text.blocks.len(), 2);
        assert_eq!(text.blocks[0].lines.len(), 2);
        assert_eq!(text.blocks[0].lines[0].chars.len(), 2);
        assert_eq!(text.blocks[1].lines[0].chars[0].c, 'd');
    }

    #[test]
    fn glyph_on_next_row_breaks_line_without_newline() {
        let mut builder = TextPageBuilder::new();
        builder.push('a', Quad::from_rect(&Rect::new(0.0, 0.0, 5.0, 10.0)));
        builder.push('b', Quad::from_rect(&Rect::new(0.0, 11.0, 5.0, 21.0)));
        let text = builder.finish();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn text_in_rect_keeps_line_breaks() {
        let text = layout(&["hello world", "second line"], 0.0, 0.0, 5.0, 12.0);
        let area = Rect::new(0.0, 0.0, 27.0, 30.0);
        assert_eq!(text.text_in_rect(&area), "hello\nsecon");
    }
}
