use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Display;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use arboard::{Clipboard, ImageData};
use crossterm::event;
use lektra_core::backend::EncryptInfo;
use lektra_core::geometry::{Point, Rect};
use lektra_core::links::HintInput;
use lektra_core::selection::SnapMode;
use lektra_core::session::{self, SessionTab, ViewState};
use lektra_core::types::{Color, FitMode, LayoutMode, PageLocation, RenderImage};
use lektra_core::{ModelEvent, ViewEvent, Viewport};
use lektra_tty::{
    compose, hint_cells, Action, DrawParams, EventMapper, InputMode, KittyRenderer, Pointer,
    PointerKind, PromptKind, TerminalGeometry, UiEvent,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::commands::{parse_command, PromptCommand};
use crate::outline::OutlineWindow;
use crate::watch::FileWatcher;

const BACKGROUND: Color = Color::rgba(0.12, 0.12, 0.12, 1.0);
const POLL: Duration = Duration::from_millis(30);
const SCROLL_LINES: f32 = 3.0;
const WHEEL_ZOOM: f32 = 1.1;
/// Change notifications this soon after our own write are ignored.
const SELF_WRITE_WINDOW: Duration = Duration::from_secs(2);

pub enum LoopAction {
    Continue,
    Quit,
}

enum Drag {
    None,
    Text,
    Region(Point),
}

pub struct App {
    viewport: Viewport,
    events: UnboundedReceiver<ModelEvent>,
    renderer: KittyRenderer<io::Stdout>,
    mapper: EventMapper,
    geometry: TerminalGeometry,
    outline: Option<OutlineWindow>,
    drag: Drag,
    last_pointer: Option<Point>,
    region_scene: Option<Rect>,
    marks: HashMap<char, PageLocation>,
    message: Option<String>,
    clipboard: Option<Clipboard>,
    watcher: Option<FileWatcher>,
    sessions_dir: Option<PathBuf>,
    dirty: bool,
    needs_clear: bool,
}

fn next_layout(mode: LayoutMode) -> LayoutMode {
    match mode {
        LayoutMode::Single => LayoutMode::Vertical,
        LayoutMode::Vertical => LayoutMode::Horizontal,
        LayoutMode::Horizontal => LayoutMode::Single,
    }
}

fn combine_status(base: String, pending_input: Option<&str>) -> String {
    match pending_input.filter(|s| !s.is_empty()) {
        Some(pending) => format!("{base} | {pending}"),
        None => base,
    }
}

impl App {
    pub fn new(
        viewport: Viewport,
        events: UnboundedReceiver<ModelEvent>,
        geometry: TerminalGeometry,
        watcher: Option<FileWatcher>,
        sessions_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            viewport,
            events,
            renderer: KittyRenderer::new(io::stdout()),
            mapper: EventMapper::new(),
            geometry,
            outline: None,
            drag: Drag::None,
            last_pointer: None,
            region_scene: None,
            marks: HashMap::new(),
            message: None,
            clipboard: None,
            watcher,
            sessions_dir,
            dirty: true,
            needs_clear: true,
        }
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            let now = Instant::now();
            self.drain_model_events();
            if self.watcher.as_mut().is_some_and(|w| w.poll(now)) {
                info!("file changed on disk, reloading");
                if let Err(err) = self.viewport.model().reload_document() {
                    self.report(err);
                }
            }
            let marker = self.viewport.jump_marker();
            self.viewport.tick(now);
            if self.viewport.jump_marker() != marker {
                self.dirty = true;
            }
            self.drain_view_events();

            if self.dirty {
                self.redraw()?;
                self.dirty = false;
            }

            if event::poll(POLL)? {
                let ui_event = self.mapper.map_event(event::read()?);
                if let LoopAction::Quit = self.handle(ui_event)? {
                    break;
                }
                self.drain_view_events();
                self.dirty = true;
            }
        }

        self.renderer.delete_images()?;
        self.renderer.clear_all()?;
        Ok(())
    }

    fn report(&mut self, err: impl Display) {
        warn!(%err, "command failed");
        self.message = Some(err.to_string());
        self.dirty = true;
    }

    fn say(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    fn drain_model_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match &event {
                ModelEvent::OpenFailed(err) => self.say(err.to_string()),
                ModelEvent::Reloaded { page_count } => {
                    if self.outline.take().is_some() {
                        self.mapper.set_mode(InputMode::Normal);
                    }
                    self.needs_clear = true;
                    self.say(format!("reloaded, {page_count} pages"));
                }
                ModelEvent::PasswordRequired { path } | ModelEvent::PasswordRejected { path } => {
                    warn!(path = %path.display(), "password requested while viewing");
                }
                _ => {}
            }
            self.viewport.handle_event(event);
            self.dirty = true;
        }
    }

    fn drain_view_events(&mut self) {
        for event in self.viewport.take_events() {
            match event {
                ViewEvent::OpenUrl(url) => {
                    info!(%url, "opening link");
                    if let Err(err) = open::that_detached(&url) {
                        self.report(format!("cannot open {url}: {err}"));
                    }
                }
                ViewEvent::CopyText(text) => self.copy_text(text),
                ViewEvent::SearchFinished { hits } => {
                    if hits == 0 {
                        self.say("no matches");
                    } else {
                        self.say(format!("{hits} matches"));
                    }
                }
                ViewEvent::SearchIndexChanged { index, total } => {
                    self.say(format!("match {}/{}", index + 1, total));
                }
                ViewEvent::Status(status) => self.say(status),
                ViewEvent::PageChanged { page } => debug!(page, "page changed"),
                ViewEvent::ZoomChanged { zoom } => debug!(zoom, "zoom changed"),
            }
            self.dirty = true;
        }
    }

    fn clipboard(&mut self) -> Option<&mut Clipboard> {
        if self.clipboard.is_none() {
            match Clipboard::new() {
                Ok(clipboard) => self.clipboard = Some(clipboard),
                Err(err) => warn!(%err, "clipboard unavailable"),
            }
        }
        self.clipboard.as_mut()
    }

    fn copy_text(&mut self, text: String) {
        let chars = text.chars().count();
        let Some(clipboard) = self.clipboard() else {
            self.say("clipboard unavailable");
            return;
        };
        match clipboard.set_text(text) {
            Ok(()) => self.say(format!("copied {chars} characters")),
            Err(err) => self.report(err),
        }
    }

    fn copy_image(&mut self, image: RenderImage) {
        let data = ImageData {
            width: image.width as usize,
            height: image.height as usize,
            bytes: Cow::Owned(image.pixels),
        };
        let Some(clipboard) = self.clipboard() else {
            self.say("clipboard unavailable");
            return;
        };
        match clipboard.set_image(data) {
            Ok(()) => self.say("copied region image"),
            Err(err) => self.report(err),
        }
    }

    fn to_scene(&self, column: u16, row: u16) -> Point {
        let (x, y) = self.geometry.cell_center(column, row);
        let scroll = self.viewport.scroll();
        Point::new(scroll.x + x, scroll.y + y)
    }

    fn status_line(&self) -> String {
        if let InputMode::Prompt(_) = self.mapper.mode() {
            return self.mapper.pending_input().unwrap_or_default();
        }
        let model = self.viewport.model();
        let name = model
            .path()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();
        let mut parts = vec![
            format!(
                "{} {}/{}",
                name,
                self.viewport.current_page() + 1,
                model.page_count()
            ),
            format!("{:.0}%", self.viewport.zoom() * 100.0),
        ];
        if model.is_modified() {
            parts.push("[+]".to_owned());
        }
        if let Some(message) = &self.message {
            parts.push(message.clone());
        }
        combine_status(parts.join(" | "), self.mapper.pending_input().as_deref())
    }

    fn redraw(&mut self) -> Result<()> {
        let frame = self.viewport.frame();
        let canvas = compose(&frame, BACKGROUND);
        let (cell_w, cell_h) = self.geometry.cell_size();
        let columns = self.geometry.columns;
        let view_rows = self.geometry.view_rows();
        let hints = hint_cells(&frame, cell_w, cell_h, columns, view_rows);
        let colors = &self.viewport.model().config().colors;
        let (hint_bg, hint_fg) = (colors.link_hint_bg, colors.link_hint_fg);
        let status = self.status_line();

        self.renderer.begin_sync_update()?;
        if self.needs_clear {
            self.renderer.delete_images()?;
            self.renderer.clear_all()?;
            self.needs_clear = false;
        }
        self.renderer.draw_at(
            &canvas,
            0,
            0,
            DrawParams::clamped(columns as u32, view_rows as u32),
        )?;
        self.renderer.draw_hints(&hints, hint_bg, hint_fg)?;
        if let Some(outline) = self.outline.as_mut() {
            outline.draw(self.renderer.writer(), columns, view_rows)?;
        }
        self.renderer
            .write_status_line(self.geometry.rows - 1, columns, &status)?;
        self.renderer.end_sync_update()
    }

    fn resize(&mut self) -> Result<()> {
        self.geometry = TerminalGeometry::query()?;
        let (width, height) = self.geometry.view_pixels();
        self.viewport.set_view_size(width as f32, height as f32);
        self.needs_clear = true;
        Ok(())
    }

    fn handle(&mut self, ui_event: UiEvent) -> Result<LoopAction> {
        match ui_event {
            UiEvent::Action(action) => self.perform(action),
            UiEvent::OpenOutline => match self.viewport.model().outline() {
                Ok(entries) => {
                    let current = self.viewport.current_page();
                    self.outline = Some(OutlineWindow::from_outline(entries, current));
                    self.mapper.set_mode(InputMode::Outline);
                }
                Err(err) => self.report(err),
            },
            UiEvent::CloseOverlay => {
                if self.outline.take().is_some() {
                    self.needs_clear = true;
                }
                self.viewport.cancel_link_hints();
                self.mapper.set_mode(InputMode::Normal);
            }
            UiEvent::OutlineMove { delta } => {
                if let Some(outline) = self.outline.as_mut() {
                    outline.move_selection(delta);
                }
            }
            UiEvent::OutlineActivate => {
                let target = self
                    .outline
                    .take()
                    .and_then(|outline| outline.selected_entry().map(|entry| entry.page));
                if let Some(page) = target {
                    self.viewport.goto_page(page);
                }
                self.needs_clear = true;
                self.mapper.set_mode(InputMode::Normal);
            }
            UiEvent::BeginPrompt(_) | UiEvent::PromptChanged { .. } | UiEvent::PromptCancel => {}
            UiEvent::PromptSubmit { kind, text } => return Ok(self.submit_prompt(kind, text)),
            UiEvent::HintDigit(digit) => match self.viewport.hint_key(digit) {
                HintInput::Pending => {}
                HintInput::Matched(..) => self.mapper.set_mode(InputMode::Normal),
                HintInput::NoMatch => {
                    self.viewport.cancel_link_hints();
                    self.mapper.set_mode(InputMode::Normal);
                    self.say("no such link");
                }
            },
            UiEvent::HintBackspace => self.viewport.hint_backspace(),
            UiEvent::Pointer(pointer) => self.pointer(pointer),
            UiEvent::Resize { .. } => self.resize()?,
            UiEvent::Quit => return Ok(LoopAction::Quit),
            UiEvent::None => {}
        }
        Ok(LoopAction::Continue)
    }

    fn perform(&mut self, action: Action) {
        let (view_w, view_h) = self.viewport.view_size();
        match action {
            Action::NextPage { count } => (0..count).for_each(|_| self.viewport.next_page()),
            Action::PrevPage { count } => (0..count).for_each(|_| self.viewport.prev_page()),
            Action::FirstPage => self.viewport.first_page(),
            Action::LastPage => self.viewport.last_page(),
            Action::GotoPage { page } => self.viewport.goto_page(page),
            Action::Pan { dx, dy } => self.viewport.scroll_by(dx * view_w, dy * view_h),
            Action::ZoomIn => self.viewport.zoom_in(),
            Action::ZoomOut => self.viewport.zoom_out(),
            Action::ResetZoom => {
                self.viewport.set_fit(FitMode::None);
                self.viewport.set_zoom(1.0);
            }
            Action::Fit(fit) => self.viewport.set_fit(fit),
            Action::Rotate { clockwise: true } => self.viewport.rotate_clockwise(),
            Action::Rotate { clockwise: false } => self.viewport.rotate_anticlockwise(),
            Action::ToggleInvert => self.viewport.toggle_invert(),
            Action::CycleLayout => {
                let next = next_layout(self.viewport.layout_mode());
                self.viewport.set_layout_mode(next);
            }
            Action::Back => {
                if !self.viewport.back() {
                    self.say("no earlier location");
                }
            }
            Action::Forward => {
                if !self.viewport.forward() {
                    self.say("no later location");
                }
            }
            Action::SearchNext { count } => {
                for _ in 0..count {
                    self.viewport.next_hit();
                }
            }
            Action::SearchPrev { count } => {
                for _ in 0..count {
                    self.viewport.prev_hit();
                }
            }
            Action::ClearTransient => {
                self.viewport.clear_search();
                self.viewport.clear_selection();
                self.viewport.clear_region();
                self.viewport.clear_annotation_selection();
                self.viewport.cancel_link_hints();
                self.region_scene = None;
                self.message = None;
            }
            Action::LinkHints(mode) => {
                if self.viewport.start_link_hints(mode) > 0 {
                    self.mapper.set_mode(InputMode::Hints);
                }
            }
            Action::Yank => self.yank(),
            Action::YankImage => match self.viewport.region_image() {
                Some(image) => self.copy_image(image),
                None => self.say("select a region first (ctrl-drag)"),
            },
            Action::OpenRegion => {
                if let Err(err) = self.open_region() {
                    self.report(format!("{err:#}"));
                }
            }
            Action::Highlight => match self.viewport.highlight_selection() {
                Ok(Some(_)) => self.say("highlighted"),
                Ok(None) => self.say("nothing selected"),
                Err(err) => self.report(err),
            },
            Action::BoxAnnotation => match self.region_scene.take() {
                Some(area) => {
                    self.viewport.clear_region();
                    if let Err(err) = self.viewport.add_rect_annotation(area) {
                        self.report(err);
                    }
                }
                None => self.say("select a region first (ctrl-drag)"),
            },
            Action::DeleteAnnotations => match self.viewport.delete_selected_annotations() {
                Ok(0) => self.say("no annotation selected"),
                Ok(count) => self.say(format!("deleted {count} annotation(s)")),
                Err(err) => self.report(err),
            },
            Action::Undo => match self.viewport.undo() {
                Ok(true) => {}
                Ok(false) => self.say("nothing to undo"),
                Err(err) => self.report(err),
            },
            Action::Redo => match self.viewport.redo() {
                Ok(true) => {}
                Ok(false) => self.say("nothing to redo"),
                Err(err) => self.report(err),
            },
            Action::Save => self.save(None),
            Action::PutMark { key } => {
                self.marks.insert(key, self.viewport.current_location());
                self.say(format!("mark {key} set"));
            }
            Action::GotoMark { key } => match self.marks.get(&key).copied() {
                Some(location) => self.viewport.jump_to(location),
                None => self.say(format!("mark {key} is not set")),
            },
            Action::ReshowMarker => self.viewport.reshow_jump_marker(),
        }
    }

    fn yank(&mut self) {
        if self.viewport.selection().is_some() {
            if !self.viewport.copy_selection() {
                self.say("selection has no text");
            }
            return;
        }
        if self.viewport.region().is_some() {
            match self.viewport.copy_text_from_region() {
                Ok(text) if !text.trim().is_empty() => self.copy_text(text),
                Ok(_) => self.say("no text in region"),
                Err(err) => self.report(err),
            }
            return;
        }
        self.say("nothing to copy");
    }

    fn open_region(&mut self) -> Result<()> {
        let Some(region) = self.viewport.region_image() else {
            self.say("select a region first (ctrl-drag)");
            return Ok(());
        };
        let path = tempfile::Builder::new()
            .prefix("lektra-region-")
            .suffix(".png")
            .tempfile()?
            .into_temp_path()
            .keep()?;
        let image = image::RgbaImage::from_raw(region.width, region.height, region.pixels)
            .context("region pixels do not match their size")?;
        image
            .save(&path)
            .with_context(|| format!("failed to write {:?}", path))?;
        open::that_detached(&path).with_context(|| format!("failed to open {:?}", path))?;
        self.say(format!("opened {}", path.display()));
        Ok(())
    }

    fn expect_own_write(&mut self) {
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.suppress(SELF_WRITE_WINDOW);
        }
    }

    fn save(&mut self, path: Option<PathBuf>) {
        let model = Arc::clone(self.viewport.model());
        let result = match &path {
            Some(path) => model.save_as(path),
            None => {
                self.expect_own_write();
                model.save_changes()
            }
        };
        match result {
            Ok(()) => match path {
                Some(path) => self.say(format!("saved to {}", path.display())),
                None => self.say("saved"),
            },
            Err(err) => self.report(err),
        }
    }

    fn pointer(&mut self, pointer: Pointer) {
        let scene = self.to_scene(pointer.column, pointer.row);
        self.last_pointer = Some(scene);
        match pointer.kind {
            PointerKind::Press { clicks } => {
                if pointer.region {
                    self.viewport.clear_selection();
                    self.drag = Drag::Region(scene);
                } else if pointer.extend {
                    self.viewport.select_annotation_at(scene, true);
                } else if clicks > 1 {
                    if let Err(err) = self.viewport.select_at(scene, clicks) {
                        self.report(err);
                    }
                    self.drag = Drag::None;
                } else if self.viewport.click(scene) || self.viewport.select_annotation_at(scene, false)
                {
                    self.drag = Drag::None;
                } else {
                    self.viewport.clear_annotation_selection();
                    self.viewport.clear_region();
                    self.region_scene = None;
                    if self.viewport.begin_selection(scene) {
                        self.drag = Drag::Text;
                    }
                }
            }
            PointerKind::Drag => match self.drag {
                Drag::Text => {
                    if let Err(err) = self.viewport.update_selection(scene, SnapMode::Chars) {
                        self.report(err);
                    }
                }
                Drag::Region(start) => {
                    let area = Rect::from_corners(start, scene);
                    if self.viewport.set_region(area).is_some() {
                        self.region_scene = Some(area);
                    }
                }
                Drag::None => {}
            },
            PointerKind::Release => match std::mem::replace(&mut self.drag, Drag::None) {
                Drag::Text => self.viewport.end_selection(),
                Drag::Region(_) if self.region_scene.is_some() => {
                    self.say("region: y text, Y image, o open, b box");
                }
                _ => {}
            },
            PointerKind::Scroll { lines } if pointer.region => {
                let (x, y) = self.geometry.cell_center(pointer.column, pointer.row);
                let factor = if lines < 0 { WHEEL_ZOOM } else { 1.0 / WHEEL_ZOOM };
                self.viewport.zoom_at(Point::new(x, y), factor);
            }
            PointerKind::Scroll { lines } => {
                let (_, cell_h) = self.geometry.cell_size();
                self.viewport
                    .scroll_by(0.0, lines as f32 * SCROLL_LINES * cell_h);
            }
        }
    }

    fn submit_prompt(&mut self, kind: PromptKind, text: String) -> LoopAction {
        match kind {
            PromptKind::Search => {
                let term = text.trim();
                if term.is_empty() {
                    self.viewport.clear_search();
                } else if let Some(pattern) = term.strip_prefix("re:") {
                    self.viewport.search_regex(pattern);
                    self.say("searching");
                } else {
                    self.viewport.search(term);
                    self.say("searching");
                }
            }
            PromptKind::Note => {
                let at = self.last_pointer.unwrap_or_else(|| self.viewport.center());
                match self.viewport.add_text_annotation(at, &text) {
                    Ok(_) => self.say("note added"),
                    Err(err) => self.report(err),
                }
            }
            PromptKind::Command => match parse_command(&text) {
                Ok(command) => return self.run_command(command),
                Err(err) => self.report(err),
            },
        }
        LoopAction::Continue
    }

    fn run_command(&mut self, command: PromptCommand) -> LoopAction {
        let model = Arc::clone(self.viewport.model());
        match command {
            PromptCommand::Write(path) => self.save(path),
            PromptCommand::Reload => {
                if let Err(err) = model.reload_document() {
                    self.report(err);
                }
            }
            PromptCommand::Encrypt { user, owner } => {
                self.expect_own_write();
                let info = EncryptInfo {
                    user_password: user,
                    owner_password: owner,
                };
                match model.encrypt(&info) {
                    Ok(()) => self.say("encrypted"),
                    Err(err) => self.report(err),
                }
            }
            PromptCommand::Decrypt => {
                self.expect_own_write();
                match model.decrypt() {
                    Ok(()) => self.say("encryption removed"),
                    Err(err) => self.report(err),
                }
            }
            PromptCommand::SaveSession(name) => match self.save_session(&name) {
                Ok(()) => self.say(format!("session {name} saved")),
                Err(err) => self.report(format!("{err:#}")),
            },
            PromptCommand::Page(page) => self.viewport.goto_page(page.saturating_sub(1)),
            PromptCommand::Highlights { by_line } => match model.collect_highlight_texts(by_line) {
                Ok(highlights) if highlights.is_empty() => self.say("no highlights"),
                Ok(highlights) => {
                    let text = highlights
                        .iter()
                        .map(|h| h.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n");
                    self.copy_text(text);
                }
                Err(err) => self.report(err),
            },
            PromptCommand::Properties => match model.properties() {
                Ok(props) => {
                    let summary = props
                        .iter()
                        .map(|(key, value)| format!("{key}: {value}"))
                        .collect::<Vec<_>>()
                        .join("; ");
                    self.say(summary);
                }
                Err(err) => self.report(err),
            },
            PromptCommand::Quit => return LoopAction::Quit,
        }
        LoopAction::Continue
    }

    pub fn view_state(&self) -> Option<ViewState> {
        let model = self.viewport.model();
        let path = model.path()?;
        let mut view = ViewState::new(
            path,
            self.viewport.current_page(),
            self.viewport.zoom(),
            self.viewport.fit_mode(),
        );
        view.invert_color = model.settings().invert;
        view.rotation = self.viewport.rotation().degrees();
        Some(view)
    }

    fn save_session(&self, name: &str) -> Result<()> {
        let dir = self
            .sessions_dir
            .as_deref()
            .context("no data directory for sessions")?;
        let path = session::session_path(dir, name)?;
        let view = self.view_state().context("no document is open")?;
        session::save_session(&path, &[SessionTab::single(view)])
    }
}
