//! The editable object graph of a PDF, held through `lopdf`.
//!
//! Annotations are addressed by their indirect object number so that an
//! identity survives save, reload and undo. Links and destinations are read
//! from the same graph. Coordinates leave this module in page space
//! (origin at the top-left of the crop box, y down).

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use lektra_core::backend::{
    AnnotationKind, DestinationKind, EncryptInfo, EncryptionChange, LinkDestination, NewAnnotation,
    ObjectNumber, RawAnnotation, RawLink, WriteOptions,
};
use lektra_core::geometry::{Point, Quad, Rect};
use lektra_core::types::Color;
use lopdf::encryption::crypt_filters::{Aes256CryptFilter, CryptFilter};
use lopdf::encryption::{EncryptionState, EncryptionVersion, Permissions};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use rand::RngCore;
use tracing::{debug, instrument, warn};

const STANDARD_FILTER: &[u8] = b"StdCF";
const MAX_DEPTH: usize = 32;
const LETTER: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Maps between PDF user space and page space for one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageFrame {
    origin_x: f32,
    top: f32,
    width: f32,
    height: f32,
}

impl PageFrame {
    pub fn from_box(b: [f32; 4]) -> Self {
        let (x0, x1) = (b[0].min(b[2]), b[0].max(b[2]));
        let (y0, y1) = (b[1].min(b[3]), b[1].max(b[3]));
        Self {
            origin_x: x0,
            top: y1,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }

    pub fn to_page(&self, x: f32, y: f32) -> Point {
        Point::new(x - self.origin_x, self.top - y)
    }

    pub fn rect_to_page(&self, r: [f32; 4]) -> Rect {
        Rect::from_corners(self.to_page(r[0], r[1]), self.to_page(r[2], r[3]))
    }

    pub fn point_to_pdf(&self, p: Point) -> (f32, f32) {
        (p.x + self.origin_x, self.top - p.y)
    }

    pub fn rect_to_pdf(&self, r: &Rect) -> [f32; 4] {
        let (x0, y1) = self.point_to_pdf(Point::new(r.x0, r.y0));
        let (x1, y0) = self.point_to_pdf(Point::new(r.x1, r.y1));
        [x0, y0, x1, y1]
    }
}

pub struct PdfObjects {
    doc: Document,
    pages: Vec<ObjectId>,
    encrypted: bool,
    password: Option<String>,
}

impl PdfObjects {
    /// Parses `bytes`, decrypting with `password` (or the empty password)
    /// when the file carries an `/Encrypt` dictionary.
    #[instrument(skip(bytes, password), fields(len = bytes.len()))]
    pub fn load(bytes: &[u8], password: Option<&str>) -> Result<Self> {
        let mut doc = Document::load_mem(bytes).context("failed to parse PDF object graph")?;
        let encrypted = doc.is_encrypted();
        if encrypted {
            doc.decrypt(password.unwrap_or(""))
                .map_err(|err| anyhow!("failed to decrypt object graph: {err}"))?;
        }
        Ok(Self::from_document(doc, encrypted, password.map(str::to_owned)))
    }

    pub fn from_document(doc: Document, encrypted: bool, password: Option<String>) -> Self {
        let pages = doc.get_pages().into_values().collect();
        Self {
            doc,
            pages,
            encrypted,
            password,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn version(&self) -> &str {
        &self.doc.version
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    fn page_id(&self, page: usize) -> Result<ObjectId> {
        self.pages
            .get(page)
            .copied()
            .ok_or_else(|| anyhow!("page {page} out of range (count {})", self.pages.len()))
    }

    fn page_index(&self, id: ObjectId) -> Option<usize> {
        self.pages.iter().position(|p| *p == id)
    }

    fn resolve<'a>(&'a self, mut obj: &'a Object) -> &'a Object {
        for _ in 0..8 {
            match obj {
                Object::Reference(id) => match self.doc.get_object(*id) {
                    Ok(next) => obj = next,
                    Err(_) => return &Object::Null,
                },
                _ => break,
            }
        }
        obj
    }

    fn dict(&self, id: ObjectId) -> Result<&Dictionary> {
        match self.doc.get_object(id)? {
            Object::Dictionary(dict) => Ok(dict),
            _ => bail!("object {} is not a dictionary", id.0),
        }
    }

    fn dict_mut(&mut self, id: ObjectId) -> Result<&mut Dictionary> {
        Ok(self.doc.get_object_mut(id)?.as_dict_mut()?)
    }

    /// Crop box, else media box, following inheritance through `/Parent`.
    pub fn frame(&self, page: usize) -> Result<PageFrame> {
        let mut node = self.dict(self.page_id(page)?)?;
        let mut media = None;
        for _ in 0..MAX_DEPTH {
            for key in [b"CropBox".as_slice(), b"MediaBox".as_slice()] {
                if let Some(b) = node.get(key).ok().and_then(|o| self.number_box(o)) {
                    if key == b"CropBox" {
                        return Ok(PageFrame::from_box(b));
                    }
                    media.get_or_insert(b);
                }
            }
            match node.get(b"Parent") {
                Ok(Object::Reference(parent)) => node = self.dict(*parent)?,
                _ => break,
            }
        }
        Ok(PageFrame::from_box(media.unwrap_or(LETTER)))
    }

    fn number_box(&self, obj: &Object) -> Option<[f32; 4]> {
        let Object::Array(items) = self.resolve(obj) else {
            return None;
        };
        if items.len() != 4 {
            return None;
        }
        let mut out = [0.0; 4];
        for (slot, item) in out.iter_mut().zip(items) {
            *slot = number(self.resolve(item))?;
        }
        Some(out)
    }

    /// Indirect annotation objects on a page, in `/Annots` order. Inline
    /// dictionaries have no object number and are skipped.
    fn annotation_ids(&self, page: usize) -> Result<Vec<ObjectId>> {
        let page_dict = self.dict(self.page_id(page)?)?;
        let Ok(annots) = page_dict.get(b"Annots") else {
            return Ok(Vec::new());
        };
        let Object::Array(items) = self.resolve(annots) else {
            return Ok(Vec::new());
        };
        Ok(items
            .iter()
            .filter_map(|item| match item {
                Object::Reference(id) => Some(*id),
                _ => None,
            })
            .collect())
    }

    fn subtype(dict: &Dictionary) -> &[u8] {
        match dict.get(b"Subtype") {
            Ok(Object::Name(name)) => name.as_slice(),
            _ => b"",
        }
    }

    /// Every non-link annotation on `page`.
    pub fn annotations(&self, page: usize) -> Result<Vec<RawAnnotation>> {
        let frame = self.frame(page)?;
        let mut out = Vec::new();
        for id in self.annotation_ids(page)? {
            let Ok(dict) = self.dict(id) else {
                warn!(page, object = id.0, "dangling annotation reference");
                continue;
            };
            if Self::subtype(dict) == b"Link" {
                continue;
            }
            out.push(self.parse_annotation(id, dict, &frame));
        }
        Ok(out)
    }

    pub fn annotation(&self, page: usize, id: ObjectNumber) -> Result<RawAnnotation> {
        let frame = self.frame(page)?;
        let object = self
            .annotation_ids(page)?
            .into_iter()
            .find(|candidate| candidate.0 == id.0)
            .ok_or_else(|| anyhow!("annotation {} is not on page {page}", id.0))?;
        Ok(self.parse_annotation(object, self.dict(object)?, &frame))
    }

    fn parse_annotation(&self, id: ObjectId, dict: &Dictionary, frame: &PageFrame) -> RawAnnotation {
        let kind = match Self::subtype(dict) {
            b"Highlight" => AnnotationKind::Highlight,
            b"Square" => AnnotationKind::Square,
            b"Text" => AnnotationKind::Text,
            b"Popup" => AnnotationKind::Popup,
            _ => AnnotationKind::Other,
        };
        let opacity = dict
            .get(b"CA")
            .ok()
            .and_then(|o| number(self.resolve(o)))
            .unwrap_or(1.0)
            .clamp(0.0, 1.0);
        let colour = |key: &[u8]| {
            dict.get(key)
                .ok()
                .and_then(|o| self.colour(o))
                .map(|c| c.with_alpha(opacity))
        };
        let rect = dict
            .get(b"Rect")
            .ok()
            .and_then(|o| self.number_box(o))
            .map(|b| frame.rect_to_page(b))
            .unwrap_or(Rect::EMPTY);
        let contents = match dict.get(b"Contents").map(|o| self.resolve(o)) {
            Ok(Object::String(bytes, _)) => Some(decode_text(bytes)),
            _ => None,
        };
        RawAnnotation {
            id: ObjectNumber(id.0),
            kind,
            rect,
            color: colour(b"C"),
            interior: colour(b"IC"),
            opacity,
            contents,
            quads: self.quads(dict, frame),
        }
    }

    fn colour(&self, obj: &Object) -> Option<Color> {
        let Object::Array(items) = self.resolve(obj) else {
            return None;
        };
        let values: Vec<f32> = items.iter().filter_map(|o| number(self.resolve(o))).collect();
        match values.as_slice() {
            [g] => Some(Color::rgba(*g, *g, *g, 1.0)),
            [r, g, b] => Some(Color::rgba(*r, *g, *b, 1.0)),
            [c, m, y, k] => Some(Color::rgba(
                (1.0 - c) * (1.0 - k),
                (1.0 - m) * (1.0 - k),
                (1.0 - y) * (1.0 - k),
                1.0,
            )),
            _ => None,
        }
    }

    fn quads(&self, dict: &Dictionary, frame: &PageFrame) -> Vec<Quad> {
        let Ok(points) = dict.get(b"QuadPoints") else {
            return Vec::new();
        };
        let Object::Array(items) = self.resolve(points) else {
            return Vec::new();
        };
        let values: Vec<f32> = items.iter().filter_map(|o| number(self.resolve(o))).collect();
        values
            .chunks_exact(8)
            .map(|q| Quad {
                ul: frame.to_page(q[0], q[1]),
                ur: frame.to_page(q[2], q[3]),
                ll: frame.to_page(q[4], q[5]),
                lr: frame.to_page(q[6], q[7]),
            })
            .collect()
    }

    /// Creates the annotation and appends it to the page's `/Annots`. A
    /// given `id` is reused so that redo restores the same identity.
    pub fn add_annotation(&mut self, page: usize, new: &NewAnnotation) -> Result<ObjectNumber> {
        let page_id = self.page_id(page)?;
        let frame = self.frame(page)?;
        let dict = build_annotation(new, &frame, page_id);
        let id = match new.id {
            Some(ObjectNumber(number)) => {
                let id = (number, 0);
                self.doc.objects.insert(id, Object::Dictionary(dict));
                self.doc.max_id = self.doc.max_id.max(number);
                id
            }
            None => self.doc.add_object(Object::Dictionary(dict)),
        };
        let annots = self.annots_mut(page_id)?;
        if !annots
            .iter()
            .any(|item| matches!(item, Object::Reference(existing) if *existing == id))
        {
            annots.push(Object::Reference(id));
        }
        debug!(page, object = id.0, kind = ?new.kind, "added annotation");
        Ok(ObjectNumber(id.0))
    }

    fn annots_mut(&mut self, page_id: ObjectId) -> Result<&mut Vec<Object>> {
        let indirect = match self.dict(page_id)?.get(b"Annots") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        };
        if let Some(id) = indirect {
            return match self.doc.get_object_mut(id)? {
                Object::Array(items) => Ok(items),
                _ => bail!("/Annots of page object {} is not an array", page_id.0),
            };
        }
        let page = self.dict_mut(page_id)?;
        if !matches!(page.get(b"Annots"), Ok(Object::Array(_))) {
            page.set("Annots", Object::Array(Vec::new()));
        }
        match page.get_mut(b"Annots")? {
            Object::Array(items) => Ok(items),
            _ => bail!("/Annots of page object {} is not an array", page_id.0),
        }
    }

    /// Detaches the annotations (and any popup they own) from the page.
    pub fn remove_annotations(&mut self, page: usize, ids: &[ObjectNumber]) -> Result<()> {
        let page_id = self.page_id(page)?;
        let mut doomed: Vec<ObjectId> = Vec::new();
        for id in self.annotation_ids(page)? {
            if !ids.iter().any(|wanted| wanted.0 == id.0) {
                continue;
            }
            doomed.push(id);
            if let Ok(Object::Reference(popup)) = self.dict(id)?.get(b"Popup") {
                doomed.push(*popup);
            }
        }
        if doomed.is_empty() {
            bail!("none of the annotations are on page {page}");
        }
        self.annots_mut(page_id)?.retain(|item| match item {
            Object::Reference(id) => !doomed.contains(id),
            _ => true,
        });
        for id in &doomed {
            self.doc.objects.remove(id);
        }
        debug!(page, removed = doomed.len(), "removed annotations");
        Ok(())
    }

    fn annotation_mut(&mut self, page: usize, id: ObjectNumber) -> Result<&mut Dictionary> {
        let object = self
            .annotation_ids(page)?
            .into_iter()
            .find(|candidate| candidate.0 == id.0)
            .ok_or_else(|| anyhow!("annotation {} is not on page {page}", id.0))?;
        self.dict_mut(object)
    }

    pub fn set_contents(&mut self, page: usize, id: ObjectNumber, text: &str) -> Result<()> {
        let dict = self.annotation_mut(page, id)?;
        dict.set("Contents", text_string(text));
        dict.remove(b"AP");
        Ok(())
    }

    pub fn set_color(&mut self, page: usize, id: ObjectNumber, color: Color) -> Result<()> {
        let dict = self.annotation_mut(page, id)?;
        let key = match Self::subtype(dict) {
            b"Square" | b"Text" => "IC",
            _ => "C",
        };
        dict.set(key, rgb_array(color));
        dict.set("CA", Object::Real(color.a.clamp(0.0, 1.0)));
        // A stale appearance stream would keep the old colour on screen.
        dict.remove(b"AP");
        Ok(())
    }

    /// Links on `page`, with destinations resolved to page indices.
    pub fn links(&self, page: usize) -> Result<Vec<RawLink>> {
        let frame = self.frame(page)?;
        let mut out = Vec::new();
        for id in self.annotation_ids(page)? {
            let Ok(dict) = self.dict(id) else {
                continue;
            };
            if Self::subtype(dict) != b"Link" {
                continue;
            }
            let Some(rect) = dict
                .get(b"Rect")
                .ok()
                .and_then(|o| self.number_box(o))
                .map(|b| frame.rect_to_page(b))
            else {
                continue;
            };
            match self.link_target(dict) {
                Some(target) => out.push(target.into_raw(rect)),
                None => debug!(page, object = id.0, "skipping link without a usable target"),
            }
        }
        Ok(out)
    }

    fn link_target(&self, link: &Dictionary) -> Option<LinkTarget> {
        if let Ok(action) = link.get(b"A") {
            let Object::Dictionary(action) = self.resolve(action) else {
                return None;
            };
            return match action.get(b"S") {
                Ok(Object::Name(kind)) if kind == b"URI" => match action.get(b"URI").map(|o| self.resolve(o)) {
                    Ok(Object::String(uri, _)) if !uri.is_empty() => {
                        Some(LinkTarget::External(String::from_utf8_lossy(uri).into_owned()))
                    }
                    _ => None,
                },
                Ok(Object::Name(kind)) if kind == b"GoTo" => {
                    self.destination(action.get(b"D").ok()?).map(LinkTarget::Internal)
                }
                _ => None,
            };
        }
        self.destination(link.get(b"Dest").ok()?).map(LinkTarget::Internal)
    }

    fn destination(&self, obj: &Object) -> Option<ResolvedDestination> {
        match self.resolve(obj) {
            Object::Array(items) => self.explicit_destination(items, None),
            Object::Name(name) | Object::String(name, _) => {
                let label = String::from_utf8_lossy(name).into_owned();
                match self.named_destination(name)? {
                    Object::Array(items) => self.explicit_destination(items, Some(label)),
                    _ => None,
                }
            }
            Object::Dictionary(dict) => self.destination(dict.get(b"D").ok()?),
            _ => None,
        }
    }

    fn explicit_destination(
        &self,
        items: &[Object],
        name: Option<String>,
    ) -> Option<ResolvedDestination> {
        let page = match items.first()? {
            Object::Reference(id) => self.page_index(*id)?,
            Object::Integer(n) => usize::try_from(*n).ok()?,
            _ => return None,
        };
        let frame = self.frame(page).ok()?;
        let arg = |i: usize| {
            items
                .get(i)
                .and_then(|o| number(self.resolve(o)))
                .unwrap_or(f32::NAN)
        };
        let kind_name: &[u8] = match items.get(1) {
            Some(Object::Name(kind)) => kind.as_slice(),
            _ => b"Fit",
        };
        let (kind, x, y, zoom) = match kind_name {
            b"XYZ" => {
                let zoom = Some(arg(4)).filter(|z| z.is_finite() && *z > 0.0);
                (DestinationKind::Xyz, arg(2), arg(3), zoom)
            }
            b"FitH" | b"FitBH" => (DestinationKind::FitH, f32::NAN, arg(2), None),
            b"FitV" | b"FitBV" => (DestinationKind::FitV, arg(2), f32::NAN, None),
            b"FitR" => (DestinationKind::FitR, arg(2), arg(5), None),
            _ => (DestinationKind::Fit, f32::NAN, f32::NAN, None),
        };
        // NaN components stay NaN through the flip.
        let point = frame.to_page(x, y);
        Some(ResolvedDestination {
            name,
            destination: LinkDestination {
                page,
                kind,
                x: point.x,
                y: point.y,
                zoom,
            },
        })
    }

    fn catalog(&self) -> Option<&Dictionary> {
        match self.resolve(self.doc.trailer.get(b"Root").ok()?) {
            Object::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    /// Looks `name` up in the catalog's `/Dests` and in the `/Names` tree.
    fn named_destination(&self, name: &[u8]) -> Option<&Object> {
        let catalog = self.catalog()?;
        if let Ok(Object::Dictionary(dests)) = catalog.get(b"Dests").map(|o| self.resolve(o)) {
            if let Ok(found) = dests.get(name) {
                return self.unwrap_destination(found);
            }
        }
        let Object::Dictionary(names) = self.resolve(catalog.get(b"Names").ok()?) else {
            return None;
        };
        let found = self.name_tree_lookup(names.get(b"Dests").ok()?, name, 0)?;
        self.unwrap_destination(found)
    }

    fn unwrap_destination<'a>(&'a self, obj: &'a Object) -> Option<&'a Object> {
        match self.resolve(obj) {
            Object::Dictionary(dict) => Some(self.resolve(dict.get(b"D").ok()?)),
            other => Some(other),
        }
    }

    fn name_tree_lookup<'a>(&'a self, node: &'a Object, name: &[u8], depth: usize) -> Option<&'a Object> {
        if depth > MAX_DEPTH {
            return None;
        }
        let Object::Dictionary(node) = self.resolve(node) else {
            return None;
        };
        if let Ok(Object::Array(pairs)) = node.get(b"Names").map(|o| self.resolve(o)) {
            for pair in pairs.chunks_exact(2) {
                if let Object::String(key, _) = self.resolve(&pair[0]) {
                    if key.as_slice() == name {
                        return Some(&pair[1]);
                    }
                }
            }
        }
        if let Ok(Object::Array(kids)) = node.get(b"Kids").map(|o| self.resolve(o)) {
            for kid in kids {
                if let Some(found) = self.name_tree_lookup(kid, name, depth + 1) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Serialises the current graph, e.g. to hand to the rasteriser.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut doc = self.doc.clone();
        let mut out = Vec::new();
        doc.save_to(&mut out).context("failed to serialise document")?;
        Ok(out)
    }

    /// Writes a full copy to `path` through a temporary sibling file.
    #[instrument(skip(self, options), fields(path = %path.display()))]
    pub fn save(&self, path: &Path, options: &WriteOptions) -> Result<()> {
        let mut doc = self.doc.clone();
        doc.trailer.remove(b"Encrypt");
        if options.incremental {
            debug!("incremental update requested, writing the full file");
        }
        if let (EncryptionChange::Keep, Some(password)) = (options.encryption, &self.password) {
            if self.encrypted {
                encrypt_aes256(&mut doc, password, password)?;
            }
        }
        write_atomically(&mut doc, path)
    }

    /// Writes an AES-256 encrypted copy to `path`.
    #[instrument(skip(self, info), fields(path = %path.display()))]
    pub fn encrypt_to(&self, path: &Path, info: &EncryptInfo) -> Result<()> {
        if info.user_password.is_empty() {
            bail!("an empty password cannot protect a document");
        }
        let mut doc = self.doc.clone();
        doc.trailer.remove(b"Encrypt");
        let owner = info.owner_password.as_deref().unwrap_or(&info.user_password);
        encrypt_aes256(&mut doc, &info.user_password, owner)?;
        write_atomically(&mut doc, path)
    }
}

struct ResolvedDestination {
    name: Option<String>,
    destination: LinkDestination,
}

enum LinkTarget {
    External(String),
    Internal(ResolvedDestination),
}

impl LinkTarget {
    fn into_raw(self, rect: Rect) -> RawLink {
        match self {
            LinkTarget::External(uri) => RawLink {
                rect,
                uri,
                external: true,
                destination: None,
            },
            LinkTarget::Internal(ResolvedDestination { name, mut destination }) => {
                let page = destination.page + 1;
                let uri = match (&name, destination.kind) {
                    (Some(name), _) => {
                        destination.kind = DestinationKind::Named;
                        format!("#nameddest={name}")
                    }
                    (None, DestinationKind::Fit) => format!("#page={page}"),
                    (None, DestinationKind::FitH) => format!("#fith={page}"),
                    (None, DestinationKind::FitV) => format!("#fitv={page}"),
                    (None, _) => format!("#xyz={page}"),
                };
                RawLink {
                    rect,
                    uri,
                    external: false,
                    destination: Some(destination),
                }
            }
        }
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn real_array(values: impl IntoIterator<Item = f32>) -> Object {
    Object::Array(values.into_iter().map(Object::Real).collect())
}

fn rgb_array(color: Color) -> Object {
    real_array([color.r, color.g, color.b])
}

/// PDF text string: PDFDocEncoding for ASCII, UTF-16BE with BOM otherwise.
pub fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

pub fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

fn build_annotation(new: &NewAnnotation, frame: &PageFrame, page_id: ObjectId) -> Dictionary {
    let subtype: &[u8] = match new.kind {
        AnnotationKind::Highlight => b"Highlight",
        AnnotationKind::Square => b"Square",
        AnnotationKind::Text => b"Text",
        AnnotationKind::Popup => b"Popup",
        AnnotationKind::Other => b"Square",
    };
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"Annot".to_vec()));
    dict.set("Subtype", Object::Name(subtype.to_vec()));
    dict.set("Rect", real_array(frame.rect_to_pdf(&new.rect)));
    dict.set("P", Object::Reference(page_id));
    // Print flag.
    dict.set("F", Object::Integer(4));
    dict.set("CA", Object::Real(new.opacity.clamp(0.0, 1.0)));
    if let Some(stroke) = new.stroke {
        dict.set("C", rgb_array(stroke));
    }
    if let Some(interior) = new.interior {
        dict.set("IC", rgb_array(interior));
    }
    if let Some(contents) = &new.contents {
        dict.set("Contents", text_string(contents));
    }
    if !new.quads.is_empty() {
        let points = new.quads.iter().flat_map(|q| {
            [q.ul, q.ur, q.ll, q.lr].into_iter().flat_map(|p| {
                let (x, y) = frame.point_to_pdf(p);
                [x, y]
            })
        });
        dict.set("QuadPoints", real_array(points));
    }
    match new.kind {
        AnnotationKind::Text => {
            dict.set("Name", Object::Name(b"Note".to_vec()));
            dict.set("Open", Object::Boolean(false));
        }
        AnnotationKind::Square if new.stroke.is_none() => {
            let mut border = Dictionary::new();
            border.set("W", Object::Integer(0));
            dict.set("BS", Object::Dictionary(border));
        }
        _ => {}
    }
    dict
}

/// Print, copy, annotate, fill forms, modify, assemble and print at full quality.
fn granted_permissions() -> Permissions {
    Permissions::PRINTABLE
        | Permissions::COPYABLE
        | Permissions::ANNOTABLE
        | Permissions::FILLABLE
        | Permissions::MODIFIABLE
        | Permissions::ASSEMBLABLE
        | Permissions::PRINTABLE_IN_HIGH_QUALITY
}

fn encrypt_aes256(doc: &mut Document, user: &str, owner: &str) -> Result<()> {
    let mut rng = rand::thread_rng();
    if doc.trailer.get(b"ID").is_err() {
        let mut id = [0u8; 16];
        rng.fill_bytes(&mut id);
        let part = Object::String(id.to_vec(), StringFormat::Hexadecimal);
        doc.trailer.set("ID", Object::Array(vec![part.clone(), part]));
    }
    let mut key = [0u8; 32];
    rng.fill_bytes(&mut key);

    let filter: Arc<dyn CryptFilter> = Arc::new(Aes256CryptFilter);
    let mut crypt_filters = BTreeMap::new();
    crypt_filters.insert(STANDARD_FILTER.to_vec(), filter);
    let version = EncryptionVersion::V5 {
        encrypt_metadata: true,
        crypt_filters,
        file_encryption_key: &key,
        stream_filter: STANDARD_FILTER.to_vec(),
        string_filter: STANDARD_FILTER.to_vec(),
        owner_password: owner,
        user_password: user,
        permissions: granted_permissions(),
    };
    let state = EncryptionState::try_from(version)
        .map_err(|err| anyhow!("failed to prepare AES-256 encryption: {err}"))?;
    doc.encrypt(&state)
        .map_err(|err| anyhow!("failed to encrypt document: {err}"))?;
    Ok(())
}

fn write_atomically(doc: &mut Document, path: &Path) -> Result<()> {
    let tmp = path.with_extension("pdf.tmp");
    let mut file =
        File::create(&tmp).with_context(|| format!("failed to create {:?}", tmp))?;
    doc.save_to(&mut file)
        .with_context(|| format!("failed to write {:?}", tmp))?;
    file.flush()?;
    drop(file);
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {:?}", path))?;
    Ok(())
}
