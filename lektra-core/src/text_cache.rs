//! Flattened per-page character streams used by search.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::geometry::{Quad, Rect};
use crate::text::StructuredText;

/// Ends every source line so matches cannot run across a line break.
pub const LINE_SENTINEL: char = '\n';

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamChar {
    pub c: char,
    pub quad: Quad,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextCacheEntry {
    pub chars: Vec<StreamChar>,
}

impl TextCacheEntry {
    pub fn from_text(text: &StructuredText) -> Self {
        let mut chars = Vec::new();
        for line in text.lines() {
            chars.extend(line.chars.iter().map(|ch| StreamChar {
                c: ch.c,
                quad: ch.quad,
            }));
            chars.push(StreamChar {
                c: LINE_SENTINEL,
                quad: Quad::from_rect(&Rect::new(line.bbox.x1, line.bbox.y0, line.bbox.x1, line.bbox.y1)),
            });
        }
        Self { chars }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn text(&self) -> String {
        self.chars.iter().map(|c| c.c).collect()
    }
}

pub struct TextCache {
    entries: LruCache<usize, Arc<TextCacheEntry>>,
}

impl TextCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
        }
    }

    pub fn get(&mut self, page: usize) -> Option<Arc<TextCacheEntry>> {
        self.entries.get(&page).cloned()
    }

    pub fn contains(&self, page: usize) -> bool {
        self.entries.contains(&page)
    }

    pub fn insert(&mut self, page: usize, entry: TextCacheEntry) -> Arc<TextCacheEntry> {
        let entry = Arc::new(entry);
        self.entries.put(page, Arc::clone(&entry));
        entry
    }

    /// Pages of `pages` with no stream yet, in the order given.
    pub fn missing(&self, pages: &[usize]) -> Vec<usize> {
        pages
            .iter()
            .copied()
            .filter(|p| !self.entries.contains(p))
            .collect()
    }

    pub fn invalidate(&mut self, page: usize) {
        self.entries.pop(&page);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}
