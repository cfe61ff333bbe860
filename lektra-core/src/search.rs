//! Term matching over cached character streams and hit navigation.

use std::collections::BTreeMap;

use regex::RegexBuilder;

use crate::geometry::{Quad, Rect};
use crate::text_cache::{TextCacheEntry, LINE_SENTINEL};

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub page: usize,
    /// Offset of the first matched character in the page stream.
    pub index: usize,
    pub quad: Quad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FlatHitRef {
    pub page: usize,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub term: String,
    pub case_sensitive: bool,
    pub regex: bool,
}

impl SearchQuery {
    /// Case sensitivity is on exactly when the term has an uppercase letter.
    pub fn smart(term: &str) -> Self {
        Self {
            term: term.to_owned(),
            case_sensitive: is_case_sensitive(term),
            regex: false,
        }
    }

    pub fn regex(term: &str) -> Self {
        Self {
            regex: true,
            ..Self::smart(term)
        }
    }
}

pub fn is_case_sensitive(term: &str) -> bool {
    term.chars().any(char::is_uppercase)
}

fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

/// Every offset where `query` matches, overlapping matches included.
pub fn search_stream(entry: &TextCacheEntry, page: usize, query: &SearchQuery) -> Vec<SearchHit> {
    if query.term.is_empty() {
        return Vec::new();
    }
    if query.regex {
        return search_stream_regex(entry, page, query);
    }
    let pattern: Vec<char> = query.term.chars().collect();
    let text = &entry.chars;
    if text.len() < pattern.len() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for start in 0..=text.len() - pattern.len() {
        let matched = pattern.iter().enumerate().all(|(j, &p)| {
            let c = text[start + j].c;
            if query.case_sensitive {
                c == p
            } else {
                fold(c) == fold(p)
            }
        });
        if !matched {
            continue;
        }
        if let Some(quad) = match_quad(entry, start, pattern.len()) {
            hits.push(SearchHit {
                page,
                index: start,
                quad,
            });
        }
    }
    hits
}

fn search_stream_regex(entry: &TextCacheEntry, page: usize, query: &SearchQuery) -> Vec<SearchHit> {
    let Ok(re) = RegexBuilder::new(&query.term)
        .case_insensitive(!query.case_sensitive)
        .build()
    else {
        return Vec::new();
    };
    let text = entry.text();
    let mut hits = Vec::new();
    for m in re.find_iter(&text) {
        if m.as_str().is_empty() || m.as_str().contains(LINE_SENTINEL) {
            continue;
        }
        let start = text[..m.start()].chars().count();
        let len = m.as_str().chars().count();
        if let Some(quad) = match_quad(entry, start, len) {
            hits.push(SearchHit {
                page,
                index: start,
                quad,
            });
        }
    }
    hits
}

/// Union of the matched characters' boxes as one quad.
fn match_quad(entry: &TextCacheEntry, start: usize, len: usize) -> Option<Quad> {
    entry.chars[start..start + len]
        .iter()
        .map(|c| c.quad.bounds())
        .filter(|r| !r.is_empty())
        .reduce(|a, b| a.union(&b))
        .map(|r: Rect| Quad::from_rect(&r))
}

/// Hits of one search keyed by page, plus the flat order used for
/// next/previous navigation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub query: Option<SearchQuery>,
    pub pages: BTreeMap<usize, Vec<SearchHit>>,
    flat: Vec<FlatHitRef>,
}

impl SearchResults {
    pub fn new(query: SearchQuery, pages: BTreeMap<usize, Vec<SearchHit>>) -> Self {
        let flat = pages
            .iter()
            .flat_map(|(&page, hits)| (0..hits.len()).map(move |index| FlatHitRef { page, index }))
            .collect();
        Self {
            query: Some(query),
            pages,
            flat,
        }
    }

    pub fn len(&self) -> usize {
        self.flat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flat.is_empty()
    }

    pub fn flat(&self) -> &[FlatHitRef] {
        &self.flat
    }

    pub fn hit(&self, r: FlatHitRef) -> Option<&SearchHit> {
        self.pages.get(&r.page)?.get(r.index)
    }

    pub fn hits_on(&self, page: usize) -> &[SearchHit] {
        self.pages.get(&page).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first_on_or_after(&self, page: usize) -> Option<usize> {
        self.flat.iter().position(|r| r.page >= page)
    }
}

/// Current position within a set of results; wraps at both ends.
#[derive(Debug, Clone, Default)]
pub struct SearchCursor {
    results: SearchResults,
    current: Option<usize>,
}

impl SearchCursor {
    pub fn new(results: SearchResults) -> Self {
        Self {
            results,
            current: None,
        }
    }

    pub fn results(&self) -> &SearchResults {
        &self.results
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn current_ref(&self) -> Option<FlatHitRef> {
        self.results.flat.get(self.current?).copied()
    }

    pub fn current_hit(&self) -> Option<&SearchHit> {
        self.results.hit(self.current_ref()?)
    }

    pub fn goto(&mut self, index: usize) -> Option<&SearchHit> {
        if index >= self.results.len() {
            return None;
        }
        self.current = Some(index);
        self.current_hit()
    }

    pub fn next(&mut self) -> Option<&SearchHit> {
        let len = self.results.len();
        if len == 0 {
            return None;
        }
        let index = self.current.map_or(0, |i| (i + 1) % len);
        self.goto(index)
    }

    pub fn prev(&mut self) -> Option<&SearchHit> {
        let len = self.results.len();
        if len == 0 {
            return None;
        }
        let index = self.current.map_or(len - 1, |i| (i + len - 1) % len);
        self.goto(index)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::tests::layout;

    fn stream(lines: &[&str]) -> TextCacheEntry {
        TextCacheEntry::from_text(&layout(lines, 0.0, 0.0, 5.0, 12.0))
    }

    #[test]
    fn smart_case() {
        assert!(!SearchQuery::smart("hello").case_sensitive);
        assert!(SearchQuery::smart("Hello").case_sensitive);
    }

    #[test]
    fn finds_every_occurrence_with_union_quad() {
        let entry = stream(&["Hello hello", "HELLO"]);
        let hits = search_stream(&entry, 3, &SearchQuery::smart("hello"));
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].index, 0);
        assert_eq!(hits[0].quad.bounds(), Rect::new(0.0, 0.0, 25.0, 10.0));
        assert_eq!(hits[1].index, 6);
        assert_eq!(hits[2].page, 3);

        let exact = search_stream(&entry, 3, &SearchQuery::smart("Hello"));
        assert_eq!(exact.len(), 1);
    }

    #[test]
    fn matches_overlap_but_not_across_lines() {
        let entry = stream(&["aaa", "ab"]);
        assert_eq!(search_stream(&entry, 0, &SearchQuery::smart("aa")).len(), 2);
        assert!(search_stream(&entry, 0, &SearchQuery::smart("aaaa")).is_empty());
        assert!(search_stream(&entry, 0, &SearchQuery::smart("")).is_empty());
    }

    #[test]
    fn regex_queries_match_within_lines() {
        let entry = stream(&["id 42 and 7", "x9"]);
        let hits = search_stream(&entry, 0, &SearchQuery::regex(r"\d+"));
        let indices: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(indices, vec![3, 10, 13]);
        assert!(search_stream(&entry, 0, &SearchQuery::regex("(")).is_empty());
    }

    #[test]
    fn cursor_wraps_in_page_order() {
        let hit = |page, index| SearchHit {
            page,
            index,
            quad: Quad::default(),
        };
        let mut pages = BTreeMap::new();
        pages.insert(10, vec![hit(10, 0), hit(10, 5)]);
        pages.insert(4, vec![hit(4, 2)]);
        let mut cursor = SearchCursor::new(SearchResults::new(SearchQuery::smart("x"), pages));
        let order: Vec<(usize, usize)> = (0..4)
            .map(|_| {
                let h = cursor.next().unwrap();
                (h.page, h.index)
            })
            .collect();
        assert_eq!(order, vec![(4, 2), (10, 0), (10, 5), (4, 2)]);
        assert_eq!(cursor.prev().map(|h| h.page), Some(10));
        assert_eq!(cursor.results().first_on_or_after(5), Some(1));
    }
}
