//! Link following, hint labels, and URL detection in page text.

use std::path::Path;

use regex::Regex;
use tracing::debug;

use crate::geometry::Rect;
use crate::page_cache::{CachedLink, LinkKind};
use crate::text::StructuredText;
use crate::types::{FitMode, PageLocation};

#[derive(Debug, Clone, PartialEq)]
pub enum LinkAction {
    OpenExternal(String),
    Jump {
        target: PageLocation,
        fit: Option<FitMode>,
    },
}

pub fn resolve(link: &CachedLink) -> Option<LinkAction> {
    if link.kind == LinkKind::External {
        return Some(LinkAction::OpenExternal(link.uri.clone()));
    }
    let page = link.target_page?;
    let target = match (link.kind, link.target) {
        (LinkKind::Page, _) | (_, None) => PageLocation::top_of(page),
        (_, Some(point)) => PageLocation::new(page, point.x, point.y).sanitized(),
    };
    let fit = match link.kind {
        LinkKind::FitH => Some(FitMode::Width),
        LinkKind::FitV => Some(FitMode::Height),
        _ => None,
    };
    Some(LinkAction::Jump { target, fit })
}

/// Text placed on the clipboard when a link is copied. Internal links become
/// `<file>#<page>` with one-based page numbers.
pub fn copy_text(link: &CachedLink, file: &Path) -> String {
    if link.kind == LinkKind::External {
        return link.uri.clone();
    }
    if let Some((_, number)) = link.uri.split_once('=') {
        if link.uri.starts_with('#') && number.chars().all(|c| c.is_ascii_digit()) {
            return format!("{}#{}", file.display(), number);
        }
    }
    match link.target_page {
        Some(page) => format!("{}#{}", file.display(), page + 1),
        None => link.uri.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintMode {
    Follow,
    Copy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkHint {
    pub label: String,
    pub page: usize,
    pub link: CachedLink,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HintInput {
    Pending,
    Matched(HintMode, LinkHint),
    NoMatch,
}

/// Numeric labels over every visible link.
#[derive(Debug, Clone)]
pub struct LinkHints {
    mode: HintMode,
    hints: Vec<LinkHint>,
    typed: String,
}

/// First label so that `count` consecutive labels share one digit width.
pub fn first_label(count: usize) -> usize {
    if count <= 9 {
        return 1;
    }
    let mut start = 10usize.pow(count.to_string().len() as u32 - 1);
    while (start + count - 1).to_string().len() != start.to_string().len() {
        start *= 10;
    }
    start
}

impl LinkHints {
    pub fn new(mode: HintMode, links: Vec<(usize, CachedLink)>) -> Self {
        let start = first_label(links.len());
        let hints = links
            .into_iter()
            .enumerate()
            .map(|(i, (page, link))| LinkHint {
                label: (start + i).to_string(),
                page,
                link,
            })
            .collect();
        Self {
            mode,
            hints,
            typed: String::new(),
        }
    }

    pub fn mode(&self) -> HintMode {
        self.mode
    }

    pub fn typed(&self) -> &str {
        &self.typed
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    /// Hints still matching what has been typed.
    pub fn visible(&self) -> impl Iterator<Item = &LinkHint> {
        self.hints
            .iter()
            .filter(move |h| h.label.starts_with(&self.typed))
    }

    pub fn push_digit(&mut self, digit: char) -> HintInput {
        if !digit.is_ascii_digit() {
            return HintInput::NoMatch;
        }
        self.typed.push(digit);
        let found: Vec<LinkHint> = self.visible().take(2).cloned().collect();
        match found.as_slice() {
            [] => {
                self.typed.pop();
                HintInput::NoMatch
            }
            [hint] if hint.label == self.typed => HintInput::Matched(self.mode, hint.clone()),
            _ => HintInput::Pending,
        }
    }

    pub fn backspace(&mut self) {
        self.typed.pop();
    }
}

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', '"', '\''];

/// Finds URL-looking text that no PDF link covers.
pub struct UrlDetector {
    regex: Regex,
}

impl UrlDetector {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    /// Matches over each text line, in page space.
    pub fn detect(&self, text: &StructuredText, existing: &[Rect]) -> Vec<CachedLink> {
        let mut found = Vec::new();
        for line in text.lines() {
            let line_text: String = line.chars.iter().map(|c| c.c).collect();
            for m in self.regex.find_iter(&line_text) {
                let raw = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
                if raw.is_empty() {
                    continue;
                }
                let first = line_text[..m.start()].chars().count();
                let count = raw.chars().count();
                let rect = line.chars[first..first + count]
                    .iter()
                    .map(|c| c.quad.bounds())
                    .reduce(|a, b| a.union(&b));
                let Some(rect) = rect else { continue };
                if existing.iter().any(|r| r.intersects(&rect)) {
                    debug!(url = raw, "url already covered by a link");
                    continue;
                }
                let uri = if raw.starts_with("www.") {
                    format!("https://{raw}")
                } else {
                    raw.to_owned()
                };
                found.push(CachedLink::external(rect, uri));
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_URL_REGEX;
    use crate::geometry::Point;
    use crate::text::tests::layout;

    fn link(kind: LinkKind, uri: &str, page: Option<usize>, target: Option<Point>) -> CachedLink {
        CachedLink {
            rect: Rect::new(0.0, 0.0, 10.0, 10.0),
            uri: uri.into(),
            kind,
            target_page: page,
            target,
            source: None,
            zoom: None,
        }
    }

    #[test]
    fn resolves_link_actions() {
        assert_eq!(
            resolve(&link(LinkKind::External, "https://a.b", None, None)),
            Some(LinkAction::OpenExternal("https://a.b".into()))
        );
        assert_eq!(
            resolve(&link(LinkKind::Page, "#page=3", Some(2), None)),
            Some(LinkAction::Jump {
                target: PageLocation::top_of(2),
                fit: None
            })
        );
        assert_eq!(
            resolve(&link(
                LinkKind::FitH,
                "#d",
                Some(4),
                Some(Point::new(f32::NAN, 30.0))
            )),
            Some(LinkAction::Jump {
                target: PageLocation::new(4, 0.0, 30.0),
                fit: Some(FitMode::Width)
            })
        );
        assert_eq!(resolve(&link(LinkKind::Location, "#d", None, None)), None);
    }

    #[test]
    fn copies_internal_links_as_file_references() {
        let file = Path::new("/docs/paper.pdf");
        assert_eq!(
            copy_text(&link(LinkKind::Page, "#page=7", Some(6), None), file),
            "/docs/paper.pdf#7"
        );
        assert_eq!(
            copy_text(&link(LinkKind::Section, "#intro", Some(1), None), file),
            "/docs/paper.pdf#2"
        );
        assert_eq!(
            copy_text(&link(LinkKind::External, "mailto:x@y", None, None), file),
            "mailto:x@y"
        );
    }

    #[test]
    fn hint_labels_share_width() {
        assert_eq!(first_label(3), 1);
        assert_eq!(first_label(9), 1);
        assert_eq!(first_label(10), 10);
        assert_eq!(first_label(90), 10);
        assert_eq!(first_label(95), 100);
    }

    #[test]
    fn typing_a_label_matches_it() {
        let links = (0..12)
            .map(|i| (i / 4, link(LinkKind::Page, "#page=1", Some(0), None)))
            .collect();
        let mut hints = LinkHints::new(HintMode::Copy, links);
        assert_eq!(hints.visible().count(), 12);
        assert_eq!(hints.push_digit('1'), HintInput::Pending);
        assert_eq!(hints.visible().count(), 10);
        match hints.push_digit('4') {
            HintInput::Matched(HintMode::Copy, hint) => {
                assert_eq!(hint.label, "14");
                assert_eq!(hint.page, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        hints.backspace();
        hints.backspace();
        assert_eq!(hints.push_digit('3'), HintInput::NoMatch);
        assert_eq!(hints.typed(), "");
    }

    #[test]
    fn rejected_digit_keeps_the_typed_prefix() {
        let links = (0..12)
            .map(|_| (0, link(LinkKind::Page, "#page=1", Some(0), None)))
            .collect();
        let mut hints = LinkHints::new(HintMode::Follow, links);
        assert_eq!(hints.push_digit('2'), HintInput::Pending);
        assert_eq!(hints.visible().count(), 2);
        assert_eq!(hints.push_digit('5'), HintInput::NoMatch);
        assert_eq!(hints.typed(), "2");
        assert_eq!(hints.visible().count(), 2);
        match hints.push_digit('1') {
            HintInput::Matched(HintMode::Follow, hint) => assert_eq!(hint.label, "21"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn detects_urls_and_trims_punctuation() {
        let text = layout(
            &["see www.example.org/a.", "and (https://x.io/b) ok"],
            0.0,
            0.0,
            5.0,
            12.0,
        );
        let detector = UrlDetector::new(DEFAULT_URL_REGEX).unwrap();
        let links = detector.detect(&text, &[]);
        let uris: Vec<&str> = links.iter().map(|l| l.uri.as_str()).collect();
        assert_eq!(uris, vec!["https://www.example.org/a", "https://x.io/b"]);
        assert_eq!(links[0].rect.x0, 20.0);
        assert_eq!(links[0].rect.x1, 20.0 + 17.0 * 5.0);
        assert!(links.iter().all(|l| l.kind == LinkKind::External));

        let covered = detector.detect(&text, &[Rect::new(30.0, 2.0, 40.0, 8.0)]);
        assert_eq!(covered.len(), 1);
    }
}
