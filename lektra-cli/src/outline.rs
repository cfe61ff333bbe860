use std::io::Write;

use anyhow::Result;
use crossterm::cursor;
use crossterm::style::{Attribute, Print, SetAttribute};
use lektra_core::backend::OutlineItem;

const TITLE: &str = "Outline";
const EMPTY_MESSAGE: &str = "This document has no outline";

pub struct OutlineWindow {
    entries: Vec<OutlineItem>,
    selected: usize,
    scroll_offset: usize,
}

/// Last entry that starts at or before `page`.
fn entry_for_page(entries: &[OutlineItem], page: usize) -> usize {
    entries
        .iter()
        .take_while(|item| item.page <= page)
        .count()
        .saturating_sub(1)
}

impl OutlineWindow {
    pub fn from_outline(entries: Vec<OutlineItem>, current_page: usize) -> Self {
        let selected = entry_for_page(&entries, current_page);
        Self {
            entries,
            selected,
            scroll_offset: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn selected_entry(&self) -> Option<&OutlineItem> {
        self.entries.get(self.selected)
    }

    pub fn move_selection(&mut self, delta: isize) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let len = self.entries.len() as isize;
        let next = (self.selected as isize + delta).clamp(0, len - 1) as usize;
        if next != self.selected {
            self.selected = next;
            true
        } else {
            false
        }
    }

    fn ensure_visible(&mut self, viewport_height: usize) {
        if viewport_height == 0 || self.entries.is_empty() {
            self.scroll_offset = 0;
            return;
        }
        let max_offset = self.entries.len().saturating_sub(viewport_height);
        self.scroll_offset = self.scroll_offset.min(max_offset);
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
        } else if self.selected >= self.scroll_offset + viewport_height {
            self.scroll_offset = self.selected + 1 - viewport_height;
        }
    }

    /// Centred box over the page area. Skipped when the terminal is too small.
    pub fn draw(&mut self, writer: &mut impl Write, total_cols: u16, rows_available: u16) -> Result<()> {
        let (total_cols, rows_available) = (total_cols as usize, rows_available as usize);
        if total_cols < 20 || rows_available < 6 {
            return Ok(());
        }
        let max_inner_width = total_cols - 6;
        let base_width = if self.is_empty() {
            EMPTY_MESSAGE.len() + 2
        } else {
            self.entries
                .iter()
                .map(line_length)
                .max()
                .unwrap_or(0)
                .max(TITLE.len())
        };
        let inner_width = base_width.clamp(20.min(max_inner_width), max_inner_width);

        let max_content_height = rows_available.saturating_sub(6);
        if max_content_height == 0 {
            return Ok(());
        }
        let total_entries = self.entries.len().max(1);
        let content_height = total_entries.min(max_content_height);
        self.ensure_visible(content_height);

        let window_height = content_height + 4;
        let window_width = inner_width + 2;
        let start_col = ((total_cols - window_width) / 2) as u16;
        let mut row = ((rows_available.saturating_sub(window_height)) / 2) as u16;

        let border = format!("+{}+", "-".repeat(inner_width));
        let mut lines = vec![
            border.clone(),
            format!("|{: ^inner_width$}|", TITLE),
            format!("|{}|", "-".repeat(inner_width)),
        ];
        if self.is_empty() {
            lines.push(format!(
                "|{}|",
                truncate_with_ellipsis(format!("  {}", EMPTY_MESSAGE), inner_width)
            ));
        } else {
            let end = (self.scroll_offset + content_height).min(self.entries.len());
            for idx in self.scroll_offset..end {
                let entry = &self.entries[idx];
                lines.push(format!("|{}|", format_line(entry, idx == self.selected, inner_width)));
            }
            for _ in (end - self.scroll_offset)..content_height {
                lines.push(format!("|{}|", " ".repeat(inner_width)));
            }
        }
        lines.push(border);

        for line in &lines {
            print_inverted(writer, start_col, row, line)?;
            row = row.saturating_add(1);
        }
        writer.flush()?;
        Ok(())
    }
}

fn print_inverted(writer: &mut impl Write, col: u16, row: u16, content: &str) -> Result<()> {
    crossterm::queue!(
        writer,
        cursor::MoveTo(col, row),
        SetAttribute(Attribute::Reverse),
        Print(content),
        SetAttribute(Attribute::Reset)
    )?;
    Ok(())
}

fn line_length(entry: &OutlineItem) -> usize {
    let indent_width = entry.depth.min(8) * 2;
    let page_suffix = format!(" (p{})", entry.page + 1);
    2 + indent_width + entry.title.chars().count() + page_suffix.len()
}

fn format_line(entry: &OutlineItem, selected: bool, inner_width: usize) -> String {
    let marker = if selected { '>' } else { ' ' };
    let indent = "  ".repeat(entry.depth.min(8));
    let text = format!("{marker} {indent}{} (p{})", entry.title, entry.page + 1);
    truncate_with_ellipsis(text, inner_width)
}

fn truncate_with_ellipsis(text: String, width: usize) -> String {
    let len = text.chars().count();
    let mut text = if len > width {
        if width <= 3 {
            text.chars().take(width).collect()
        } else {
            let mut truncated: String = text.chars().take(width - 3).collect();
            truncated.push_str("...");
            truncated
        }
    } else {
        text
    };
    let len = text.chars().count();
    if len < width {
        text.push_str(&" ".repeat(width - len));
    }
    text
}
