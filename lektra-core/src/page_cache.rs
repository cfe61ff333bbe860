//! Per-page display lists plus link and annotation tables, LRU bounded.

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{Context, Result};
use lru::LruCache;
use tracing::{debug, instrument};

use crate::backend::{
    AnnotationKind, DestinationKind, DisplayList, DocumentBackend, ObjectNumber, RawAnnotation,
    RawLink,
};
use crate::geometry::{Point, Rect};
use crate::types::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    External,
    Page,
    Location,
    Section,
    FitV,
    FitH,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedLink {
    pub rect: Rect,
    pub uri: String,
    pub kind: LinkKind,
    pub target_page: Option<usize>,
    pub target: Option<Point>,
    /// Where the link itself sits on its page.
    pub source: Option<Point>,
    pub zoom: Option<f32>,
}

impl CachedLink {
    pub fn external(rect: Rect, uri: impl Into<String>) -> Self {
        Self {
            rect,
            uri: uri.into(),
            kind: LinkKind::External,
            target_page: None,
            target: None,
            source: Some(rect.top_left()),
            zoom: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedAnnotation {
    pub id: ObjectNumber,
    pub kind: AnnotationKind,
    pub rect: Rect,
    pub color: Color,
    pub opacity: f32,
    pub contents: Option<String>,
}

pub struct PageCacheEntry {
    pub display_list: Arc<dyn DisplayList>,
    pub bounds: Rect,
    pub width: f32,
    pub height: f32,
    pub links: Vec<CachedLink>,
    pub annotations: Vec<CachedAnnotation>,
}

impl std::fmt::Debug for PageCacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCacheEntry")
            .field("bounds", &self.bounds)
            .field("links", &self.links.len())
            .field("annotations", &self.annotations.len())
            .finish()
    }
}

/// Loads `page` and records everything the renderer and overlays need.
#[instrument(skip(backend))]
pub fn build_entry(backend: &dyn DocumentBackend, page: usize) -> Result<PageCacheEntry> {
    let loaded = backend
        .load_page(page)
        .with_context(|| format!("failed to load page {page}"))?;
    let links = loaded.links.iter().filter_map(classify_link).collect();
    let annotations = loaded
        .annotations
        .iter()
        .filter_map(cache_annotation)
        .collect();
    Ok(PageCacheEntry {
        display_list: loaded.display_list,
        bounds: loaded.bounds,
        width: loaded.bounds.width(),
        height: loaded.bounds.height(),
        links,
        annotations,
    })
}

/// Sorts a backend link into one of the six link kinds. Internal links that
/// do not resolve to a page are dropped.
pub fn classify_link(raw: &RawLink) -> Option<CachedLink> {
    let source = Some(raw.rect.top_left());
    if raw.external {
        return Some(CachedLink {
            source,
            ..CachedLink::external(raw.rect, raw.uri.clone())
        });
    }

    if raw.uri.starts_with("#page") {
        let target_page = raw
            .destination
            .as_ref()
            .map(|d| d.page)
            .or_else(|| parse_page_fragment(&raw.uri))?;
        return Some(CachedLink {
            rect: raw.rect,
            uri: raw.uri.clone(),
            kind: LinkKind::Page,
            target_page: Some(target_page),
            target: None,
            source,
            zoom: None,
        });
    }

    let dest = raw.destination.as_ref()?;
    let kind = match dest.kind {
        DestinationKind::FitH => LinkKind::FitH,
        DestinationKind::FitV => LinkKind::FitV,
        DestinationKind::Named => LinkKind::Section,
        DestinationKind::Xyz | DestinationKind::Fit | DestinationKind::FitR => LinkKind::Location,
    };
    Some(CachedLink {
        rect: raw.rect,
        uri: raw.uri.clone(),
        kind,
        target_page: Some(dest.page),
        target: Some(Point::new(dest.x, dest.y)),
        source,
        zoom: dest.zoom,
    })
}

/// `#page=12` style fragments are one-based.
fn parse_page_fragment(uri: &str) -> Option<usize> {
    let (_, value) = uri.split_once('=')?;
    let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
    digits.parse::<usize>().ok()?.checked_sub(1)
}

/// Keeps the annotation kinds the viewer draws overlays for.
pub fn cache_annotation(raw: &RawAnnotation) -> Option<CachedAnnotation> {
    if raw.rect.is_infinite() || raw.rect.is_empty() {
        return None;
    }
    let color = match raw.kind {
        AnnotationKind::Highlight | AnnotationKind::Text | AnnotationKind::Popup => raw.color?,
        AnnotationKind::Square => raw.interior.or(raw.color)?,
        AnnotationKind::Other => return None,
    };
    let contents = match raw.kind {
        AnnotationKind::Text | AnnotationKind::Popup => raw.contents.clone(),
        _ => None,
    };
    Some(CachedAnnotation {
        id: raw.id,
        kind: raw.kind,
        rect: raw.rect,
        color,
        opacity: raw.opacity,
        contents,
    })
}

pub struct PageCache {
    entries: LruCache<usize, Arc<PageCacheEntry>>,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(non_zero(capacity)),
        }
    }

    pub fn get(&mut self, page: usize) -> Option<Arc<PageCacheEntry>> {
        self.entries.get(&page).cloned()
    }

    pub fn peek(&self, page: usize) -> Option<Arc<PageCacheEntry>> {
        self.entries.peek(&page).cloned()
    }

    pub fn contains(&self, page: usize) -> bool {
        self.entries.contains(&page)
    }

    /// Inserts `entry`, evicting the least recently used page when full.
    pub fn insert(&mut self, page: usize, entry: PageCacheEntry) -> Arc<PageCacheEntry> {
        let entry = Arc::new(entry);
        if let Some((evicted, _)) = self.entries.push(page, Arc::clone(&entry)) {
            if evicted != page {
                debug!(page = evicted, "evicted page from cache");
            }
        }
        entry
    }

    /// Drops the cache's reference; renders holding their own keep going.
    pub fn invalidate(&mut self, page: usize) -> bool {
        self.entries.pop(&page).is_some()
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

    pub fn set_capacity(&mut self, capacity: usize) {
        self.entries.resize(non_zero(capacity));
    }

    pub fn pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.entries.iter().map(|(p, _)| *p).collect();
        pages.sort_unstable();
        pages
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN)
}
