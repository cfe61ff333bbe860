//! Reversible annotation edits and the bounded undo stack.

use std::collections::VecDeque;

use anyhow::{ensure, Result};
use tracing::debug;

use crate::backend::{AnnotationKind, DocumentBackend, NewAnnotation, ObjectNumber, RawAnnotation};
use crate::geometry::{Quad, Rect};
use crate::types::Color;
use crate::DocumentId;

#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    AddHighlight {
        quads: Vec<Quad>,
        color: Color,
        id: Option<ObjectNumber>,
    },
    AddRect {
        rect: Rect,
        color: Color,
        id: Option<ObjectNumber>,
    },
    AddText {
        rect: Rect,
        contents: String,
        color: Color,
        id: Option<ObjectNumber>,
    },
    /// `captured` holds each annotation as it was before deletion.
    DeleteMany { captured: Vec<RawAnnotation> },
    ChangeColor {
        id: ObjectNumber,
        new: Color,
        old: Color,
    },
}

/// An edit bound to a page of a particular document.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub document: DocumentId,
    pub page: usize,
    pub edit: Edit,
}

impl Command {
    pub fn add_highlight(document: DocumentId, page: usize, quads: Vec<Quad>, color: Color) -> Self {
        Self {
            document,
            page,
            edit: Edit::AddHighlight {
                quads,
                color,
                id: None,
            },
        }
    }

    pub fn add_rect(document: DocumentId, page: usize, rect: Rect, color: Color) -> Self {
        Self {
            document,
            page,
            edit: Edit::AddRect {
                rect,
                color,
                id: None,
            },
        }
    }

    pub fn add_text(
        document: DocumentId,
        page: usize,
        rect: Rect,
        contents: impl Into<String>,
        color: Color,
    ) -> Self {
        Self {
            document,
            page,
            edit: Edit::AddText {
                rect,
                contents: contents.into(),
                color,
                id: None,
            },
        }
    }

    /// Captures the current state of `ids` so the deletion can be undone.
    pub fn delete_many(
        backend: &dyn DocumentBackend,
        page: usize,
        ids: &[ObjectNumber],
    ) -> Result<Self> {
        ensure!(!ids.is_empty(), "nothing to delete");
        let captured = ids
            .iter()
            .map(|&id| backend.annotation(page, id))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            document: backend.info().id,
            page,
            edit: Edit::DeleteMany { captured },
        })
    }

    /// Records the annotation's current colour as the undo target.
    pub fn change_color(
        backend: &dyn DocumentBackend,
        page: usize,
        id: ObjectNumber,
        new: Color,
    ) -> Result<Self> {
        let current = backend.annotation(page, id)?;
        let base = match current.kind {
            AnnotationKind::Square | AnnotationKind::Text => current.interior.or(current.color),
            _ => current.color,
        }
        .unwrap_or(Color::BLACK);
        Ok(Self {
            document: backend.info().id,
            page,
            edit: Edit::ChangeColor {
                id,
                new,
                old: base.with_alpha(current.opacity),
            },
        })
    }

    pub fn label(&self) -> &'static str {
        match self.edit {
            Edit::AddHighlight { .. } => "add highlight",
            Edit::AddRect { .. } => "add rectangle",
            Edit::AddText { .. } => "add note",
            Edit::DeleteMany { .. } => "delete annotations",
            Edit::ChangeColor { .. } => "change colour",
        }
    }

    /// Identity of the annotation an add created.
    pub fn created_id(&self) -> Option<ObjectNumber> {
        match &self.edit {
            Edit::AddHighlight { id, .. } | Edit::AddRect { id, .. } | Edit::AddText { id, .. } => *id,
            _ => None,
        }
    }

    /// Performs the edit. Re-applying an undone add recreates the
    /// annotation under its first identity.
    pub fn apply(&mut self, backend: &dyn DocumentBackend) -> Result<()> {
        let page = self.page;
        match &mut self.edit {
            Edit::AddHighlight { quads, color, id } => {
                let new = NewAnnotation {
                    kind: AnnotationKind::Highlight,
                    rect: bounds_of(quads),
                    quads: quads.clone(),
                    stroke: Some(color.with_alpha(1.0)),
                    interior: None,
                    opacity: color.a,
                    contents: None,
                    id: *id,
                };
                *id = Some(backend.add_annotation(page, &new)?);
            }
            Edit::AddRect { rect, color, id } => {
                let new = NewAnnotation {
                    kind: AnnotationKind::Square,
                    rect: *rect,
                    quads: Vec::new(),
                    stroke: Some(color.with_alpha(1.0)),
                    interior: Some(color.with_alpha(1.0)),
                    opacity: color.a,
                    contents: None,
                    id: *id,
                };
                *id = Some(backend.add_annotation(page, &new)?);
            }
            Edit::AddText {
                rect,
                contents,
                color,
                id,
            } => {
                let new = NewAnnotation {
                    kind: AnnotationKind::Text,
                    rect: *rect,
                    quads: Vec::new(),
                    stroke: Some(color.with_alpha(1.0)),
                    interior: Some(color.with_alpha(1.0)),
                    opacity: color.a,
                    contents: Some(contents.clone()),
                    id: *id,
                };
                *id = Some(backend.add_annotation(page, &new)?);
            }
            Edit::DeleteMany { captured } => {
                let ids: Vec<ObjectNumber> = captured.iter().map(|a| a.id).collect();
                backend.remove_annotations(page, &ids)?;
            }
            Edit::ChangeColor { id, new, .. } => {
                backend.set_annotation_color(page, *id, *new)?;
            }
        }
        debug!(page, edit = self.label(), "applied edit");
        Ok(())
    }

    /// Undoes a previous [`Command::apply`].
    pub fn revert(&self, backend: &dyn DocumentBackend) -> Result<()> {
        let page = self.page;
        match &self.edit {
            Edit::AddHighlight { id, .. } | Edit::AddRect { id, .. } | Edit::AddText { id, .. } => {
                if let Some(id) = id {
                    backend.remove_annotations(page, &[*id])?;
                }
            }
            Edit::DeleteMany { captured } => {
                for annot in captured {
                    backend.add_annotation(page, &restore(annot))?;
                }
            }
            Edit::ChangeColor { id, old, .. } => {
                backend.set_annotation_color(page, *id, *old)?;
            }
        }
        debug!(page, edit = self.label(), "reverted edit");
        Ok(())
    }
}

fn bounds_of(quads: &[Quad]) -> Rect {
    quads
        .iter()
        .map(Quad::bounds)
        .reduce(|a, b| a.union(&b))
        .unwrap_or(Rect::EMPTY)
}

fn restore(annot: &RawAnnotation) -> NewAnnotation {
    NewAnnotation {
        kind: annot.kind,
        rect: annot.rect,
        quads: annot.quads.clone(),
        stroke: annot.color,
        interior: annot.interior,
        opacity: annot.opacity,
        contents: annot.contents.clone(),
        id: Some(annot.id),
    }
}

/// Undo and redo stacks; the oldest command is dropped past `limit`.
#[derive(Debug, Default)]
pub struct UndoStack {
    done: VecDeque<Command>,
    undone: Vec<Command>,
    limit: usize,
}

impl UndoStack {
    pub fn new(limit: usize) -> Self {
        Self {
            done: VecDeque::new(),
            undone: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Records a freshly applied command; clears the redo branch.
    pub fn push(&mut self, command: Command) {
        self.undone.clear();
        self.push_done(command);
    }

    fn push_done(&mut self, command: Command) {
        self.done.push_back(command);
        while self.done.len() > self.limit {
            self.done.pop_front();
        }
    }

    pub fn take_undo(&mut self) -> Option<Command> {
        self.done.pop_back()
    }

    pub fn take_redo(&mut self) -> Option<Command> {
        self.undone.pop()
    }

    /// Files a reverted command under redo.
    pub fn undone(&mut self, command: Command) {
        self.undone.push(command);
    }

    /// Files a re-applied command under undo without touching redo.
    pub fn redone(&mut self, command: Command) {
        self.push_done(command);
    }

    /// Puts back a command whose undo failed.
    pub fn restore_undo(&mut self, command: Command) {
        self.push_done(command);
    }

    pub fn restore_redo(&mut self, command: Command) {
        self.undone.push(command);
    }

    pub fn can_undo(&self) -> bool {
        !self.done.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    pub fn clear(&mut self) {
        self.done.clear();
        self.undone.clear();
    }
}
