//! Terminal input to viewer actions.

use std::time::{Duration, Instant};

use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use lektra_core::links::HintMode;
use lektra_core::types::FitMode;

const MULTI_CLICK: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    NextPage { count: usize },
    PrevPage { count: usize },
    FirstPage,
    LastPage,
    GotoPage { page: usize },
    /// Fractions of the view size.
    Pan { dx: f32, dy: f32 },
    ZoomIn,
    ZoomOut,
    ResetZoom,
    Fit(FitMode),
    Rotate { clockwise: bool },
    ToggleInvert,
    CycleLayout,
    Back,
    Forward,
    SearchNext { count: usize },
    SearchPrev { count: usize },
    ClearTransient,
    LinkHints(HintMode),
    Yank,
    YankImage,
    OpenRegion,
    Highlight,
    BoxAnnotation,
    DeleteAnnotations,
    Undo,
    Redo,
    Save,
    PutMark { key: char },
    GotoMark { key: char },
    ReshowMarker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Search,
    Note,
    Command,
}

impl PromptKind {
    fn sigil(self) -> char {
        match self {
            PromptKind::Search => '/',
            PromptKind::Note => '>',
            PromptKind::Command => ':',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Press { clicks: u8 },
    Drag,
    Release,
    Scroll { lines: i8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub kind: PointerKind,
    pub column: u16,
    pub row: u16,
    /// Shift held: extend an annotation selection.
    pub extend: bool,
    /// Control held: drag out a region instead of selecting text.
    pub region: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Action(Action),
    OpenOutline,
    CloseOverlay,
    OutlineMove { delta: isize },
    OutlineActivate,
    BeginPrompt(PromptKind),
    PromptChanged { kind: PromptKind, text: String },
    PromptSubmit { kind: PromptKind, text: String },
    PromptCancel,
    HintDigit(char),
    HintBackspace,
    Pointer(Pointer),
    Resize { columns: u16, rows: u16 },
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Outline,
    Prompt(PromptKind),
    Hints,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    char_stack: String,
    mode: InputMode,
    prompt_buffer: String,
    last_press: Option<(u16, u16, Instant, u8)>,
}

impl EventMapper {
    pub const PAN_STEP: f32 = 0.1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.prompt_buffer.clear();
            self.reset_count();
            self.reset_char_stack();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        self.map_event_at(event, Instant::now())
    }

    /// Like [`map_event`](Self::map_event) with an explicit clock, which
    /// multi-click detection depends on.
    pub fn map_event_at(&mut self, event: Event, now: Instant) -> UiEvent {
        match event {
            Event::Resize(columns, rows) => UiEvent::Resize { columns, rows },
            Event::Mouse(mouse) => self.map_mouse(mouse, now),
            Event::Key(key) => match self.mode {
                InputMode::Normal => self.map_key_normal(key),
                InputMode::Outline => self.map_key_outline(key),
                InputMode::Prompt(kind) => self.map_key_prompt(kind, key),
                InputMode::Hints => self.map_key_hints(key),
            },
            _ => UiEvent::None,
        }
    }

    fn map_mouse(&mut self, mouse: MouseEvent, now: Instant) -> UiEvent {
        let MouseEvent {
            kind,
            column,
            row,
            modifiers,
        } = mouse;
        let kind = match kind {
            MouseEventKind::Down(MouseButton::Left) => {
                let clicks = match self.last_press {
                    Some((c, r, at, clicks))
                        if c == column && r == row && now.duration_since(at) < MULTI_CLICK =>
                    {
                        clicks.saturating_add(1)
                    }
                    _ => 1,
                };
                self.last_press = Some((column, row, now, clicks));
                PointerKind::Press { clicks }
            }
            MouseEventKind::Drag(MouseButton::Left) => PointerKind::Drag,
            MouseEventKind::Up(MouseButton::Left) => PointerKind::Release,
            MouseEventKind::ScrollDown => PointerKind::Scroll { lines: 1 },
            MouseEventKind::ScrollUp => PointerKind::Scroll { lines: -1 },
            _ => return UiEvent::None,
        };
        UiEvent::Pointer(Pointer {
            kind,
            column,
            row,
            extend: modifiers.contains(KeyModifiers::SHIFT),
            region: modifiers.contains(KeyModifiers::CONTROL),
        })
    }

    fn map_key_normal(&mut self, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        // Capitals arrive with or without SHIFT depending on the terminal.
        let mut mods = modifiers;
        if matches!(code, KeyCode::Char(c) if !c.is_ascii_lowercase()) {
            mods.remove(KeyModifiers::SHIFT);
        }
        let ctrl = mods.contains(KeyModifiers::CONTROL);

        match (code, mods) {
            (KeyCode::Char(c), KeyModifiers::NONE)
                if c.is_ascii_digit() && self.char_stack.is_empty() =>
            {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char(c), _) if self.char_stack.as_str() == "m" => {
                self.reset_char_stack();
                self.action(Action::PutMark { key: c })
            }
            (KeyCode::Char(c), _) if self.char_stack.as_str() == "'" => {
                self.reset_char_stack();
                self.action(Action::GotoMark { key: c })
            }
            (KeyCode::Char('m'), KeyModifiers::NONE) | (KeyCode::Char('\''), KeyModifiers::NONE) => {
                if let KeyCode::Char(c) = code {
                    self.reset_count();
                    self.push_char(c);
                }
                UiEvent::None
            }
            (KeyCode::Left, _) if ctrl => self.pan(-Self::PAN_STEP, 0.0),
            (KeyCode::Right, _) if ctrl => self.pan(Self::PAN_STEP, 0.0),
            (KeyCode::Up, _) if ctrl => self.pan(0.0, -Self::PAN_STEP),
            (KeyCode::Down, _) if ctrl => self.pan(0.0, Self::PAN_STEP),
            (KeyCode::Char('o'), _) if ctrl => self.action(Action::Back),
            (KeyCode::Char('i'), _) | (KeyCode::Tab, _) if ctrl => self.action(Action::Forward),
            (KeyCode::Char('r'), _) if ctrl => self.action(Action::Redo),
            (KeyCode::Char('s'), _) if ctrl => self.action(Action::Save),
            (KeyCode::Char('c'), _) if ctrl => UiEvent::Quit,
            (KeyCode::Tab, KeyModifiers::NONE) => self.action(Action::Forward),
            (KeyCode::Char('h'), KeyModifiers::NONE) | (KeyCode::Char('H'), KeyModifiers::NONE) => {
                self.pan(-Self::PAN_STEP, 0.0)
            }
            (KeyCode::Char('l'), KeyModifiers::NONE) | (KeyCode::Char('L'), KeyModifiers::NONE) => {
                self.pan(Self::PAN_STEP, 0.0)
            }
            (KeyCode::Char('K'), KeyModifiers::NONE) => self.pan(0.0, -Self::PAN_STEP),
            (KeyCode::Char('J'), KeyModifiers::NONE) => self.pan(0.0, Self::PAN_STEP),
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Action(Action::NextPage { count })
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Action(Action::PrevPage { count })
            }
            (KeyCode::Char('n'), KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Action(Action::SearchNext { count })
            }
            (KeyCode::Char('N'), KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Action(Action::SearchPrev { count })
            }
            (KeyCode::Char('G'), KeyModifiers::NONE) | (KeyCode::End, _) => {
                match self.pending_count.take() {
                    Some(page) if page > 0 => self.action(Action::GotoPage { page: page - 1 }),
                    _ => self.action(Action::LastPage),
                }
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                self.action(Action::FirstPage)
            }
            (KeyCode::Char('/'), KeyModifiers::NONE) => {
                self.set_mode(InputMode::Prompt(PromptKind::Search));
                UiEvent::BeginPrompt(PromptKind::Search)
            }
            (KeyCode::Char('i'), KeyModifiers::NONE) => {
                self.set_mode(InputMode::Prompt(PromptKind::Note));
                UiEvent::BeginPrompt(PromptKind::Note)
            }
            (KeyCode::Char(':'), KeyModifiers::NONE) => {
                self.set_mode(InputMode::Prompt(PromptKind::Command));
                UiEvent::BeginPrompt(PromptKind::Command)
            }
            (KeyCode::Char('t'), KeyModifiers::NONE) | (KeyCode::Char('T'), KeyModifiers::NONE) => {
                self.reset_count();
                self.reset_char_stack();
                UiEvent::OpenOutline
            }
            (KeyCode::Char('f'), KeyModifiers::NONE) => {
                self.action(Action::LinkHints(HintMode::Follow))
            }
            (KeyCode::Char('F'), KeyModifiers::NONE) => self.action(Action::LinkHints(HintMode::Copy)),
            (KeyCode::Char('='), _) => self.action(Action::ResetZoom),
            (KeyCode::Char('+'), _) => self.action(Action::ZoomIn),
            (KeyCode::Char('-'), _) => self.action(Action::ZoomOut),
            (KeyCode::Char('w'), KeyModifiers::NONE) => self.action(Action::Fit(FitMode::Width)),
            (KeyCode::Char('e'), KeyModifiers::NONE) => self.action(Action::Fit(FitMode::Height)),
            (KeyCode::Char('W'), KeyModifiers::NONE) => self.action(Action::Fit(FitMode::Window)),
            (KeyCode::Char('r'), KeyModifiers::NONE) => {
                self.action(Action::Rotate { clockwise: true })
            }
            (KeyCode::Char('R'), KeyModifiers::NONE) => {
                self.action(Action::Rotate { clockwise: false })
            }
            (KeyCode::Char('d'), KeyModifiers::NONE) => self.action(Action::ToggleInvert),
            (KeyCode::Char('s'), KeyModifiers::NONE) => self.action(Action::CycleLayout),
            (KeyCode::Char('y'), KeyModifiers::NONE) => self.action(Action::Yank),
            (KeyCode::Char('Y'), KeyModifiers::NONE) => self.action(Action::YankImage),
            (KeyCode::Char('o'), KeyModifiers::NONE) => self.action(Action::OpenRegion),
            (KeyCode::Char('a'), KeyModifiers::NONE) => self.action(Action::Highlight),
            (KeyCode::Char('b'), KeyModifiers::NONE) => self.action(Action::BoxAnnotation),
            (KeyCode::Char('x'), KeyModifiers::NONE) | (KeyCode::Delete, _) => {
                self.action(Action::DeleteAnnotations)
            }
            (KeyCode::Char('u'), KeyModifiers::NONE) => self.action(Action::Undo),
            (KeyCode::Char('`'), _) => self.action(Action::ReshowMarker),
            (KeyCode::Esc, _) => self.action(Action::ClearTransient),
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                self.reset_char_stack();
                UiEvent::None
            }
        }
    }

    fn map_key_outline(&mut self, key: KeyEvent) -> UiEvent {
        match (key.code, key.modifiers) {
            (KeyCode::Esc, _) | (KeyCode::Char('t'), _) | (KeyCode::Char('T'), _) => {
                UiEvent::CloseOverlay
            }
            (KeyCode::Enter, _) => UiEvent::OutlineActivate,
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                UiEvent::OutlineMove { delta: 1 }
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                UiEvent::OutlineMove { delta: -1 }
            }
            (KeyCode::Char('q'), _) => UiEvent::Quit,
            _ => UiEvent::None,
        }
    }

    fn map_key_prompt(&mut self, kind: PromptKind, key: KeyEvent) -> UiEvent {
        match (key.code, key.modifiers) {
            (KeyCode::Esc, _) => {
                self.set_mode(InputMode::Normal);
                UiEvent::PromptCancel
            }
            (KeyCode::Enter, _) => {
                let text = std::mem::take(&mut self.prompt_buffer);
                self.set_mode(InputMode::Normal);
                UiEvent::PromptSubmit { kind, text }
            }
            (KeyCode::Backspace, _) => {
                self.prompt_buffer.pop();
                UiEvent::PromptChanged {
                    kind,
                    text: self.prompt_buffer.clone(),
                }
            }
            (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                self.prompt_buffer.push(c);
                UiEvent::PromptChanged {
                    kind,
                    text: self.prompt_buffer.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    fn map_key_hints(&mut self, key: KeyEvent) -> UiEvent {
        match key.code {
            KeyCode::Char(c) if c.is_ascii_digit() => UiEvent::HintDigit(c),
            KeyCode::Backspace => UiEvent::HintBackspace,
            KeyCode::Esc => {
                self.set_mode(InputMode::Normal);
                UiEvent::CloseOverlay
            }
            _ => UiEvent::None,
        }
    }

    fn action(&mut self, action: Action) -> UiEvent {
        self.reset_count();
        self.reset_char_stack();
        UiEvent::Action(action)
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    fn push_char(&mut self, c: char) {
        self.char_stack.push(c);
    }

    fn reset_char_stack(&mut self) {
        self.char_stack.clear();
    }

    fn pan(&mut self, dx: f32, dy: f32) -> UiEvent {
        let multiplier = self.take_count() as f32;
        self.reset_char_stack();
        UiEvent::Action(Action::Pan {
            dx: dx * multiplier,
            dy: dy * multiplier,
        })
    }

    /// What the status line shows while a command is being typed.
    pub fn pending_input(&self) -> Option<String> {
        if let InputMode::Prompt(kind) = self.mode {
            return Some(format!("{}{}", kind.sigil(), self.prompt_buffer));
        }
        let mut pending = String::new();
        pending.push_str(&self.pending_digits);
        pending.push_str(&self.char_stack);
        if pending.is_empty() {
            None
        } else {
            Some(pending)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventKind, KeyEventState};

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn mouse(kind: MouseEventKind, column: u16, row: u16) -> Event {
        Event::Mouse(MouseEvent {
            kind,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        })
    }

    #[test]
    fn numeric_prefix_counts_page_steps() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('1'))), UiEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('2'))), UiEvent::None);
        assert_eq!(mapper.pending_input().as_deref(), Some("12"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::Action(Action::NextPage { count: 12 })
        );
        assert!(mapper.pending_input().is_none());
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('k'))),
            UiEvent::Action(Action::PrevPage { count: 1 })
        );
    }

    #[test]
    fn prefix_is_dropped_by_other_commands() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('4')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('d'))),
            UiEvent::Action(Action::ToggleInvert)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::Action(Action::NextPage { count: 1 })
        );
    }

    #[test]
    fn capital_g_goes_to_counted_or_last_page() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Char('G'), KeyModifiers::SHIFT)),
            UiEvent::Action(Action::LastPage)
        );
        mapper.map_event(key_event(KeyCode::Char('7')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('G'))),
            UiEvent::Action(Action::GotoPage { page: 6 })
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('g'))),
            UiEvent::Action(Action::FirstPage)
        );
    }

    #[test]
    fn marks_take_the_next_character() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('m'))), UiEvent::None);
        assert_eq!(mapper.pending_input().as_deref(), Some("m"));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('3'))),
            UiEvent::Action(Action::PutMark { key: '3' })
        );
        mapper.map_event(key_event(KeyCode::Char('\'')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('3'))),
            UiEvent::Action(Action::GotoMark { key: '3' })
        );
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn pans_scale_with_the_prefix() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('3')));
        match mapper.map_event(key_event(KeyCode::Char('l'))) {
            UiEvent::Action(Action::Pan { dx, dy }) => {
                assert!((dx - 3.0 * EventMapper::PAN_STEP).abs() < f32::EPSILON);
                assert_eq!(dy, 0.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match mapper.map_event(key_event_with_modifiers(KeyCode::Up, KeyModifiers::CONTROL)) {
            UiEvent::Action(Action::Pan { dx, dy }) => {
                assert_eq!(dx, 0.0);
                assert!((dy + EventMapper::PAN_STEP).abs() < f32::EPSILON);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn history_and_edit_chords() {
        let mut mapper = EventMapper::new();
        let ctrl = |c| key_event_with_modifiers(KeyCode::Char(c), KeyModifiers::CONTROL);
        assert_eq!(mapper.map_event(ctrl('o')), UiEvent::Action(Action::Back));
        assert_eq!(mapper.map_event(ctrl('i')), UiEvent::Action(Action::Forward));
        assert_eq!(mapper.map_event(key_event(KeyCode::Tab)), UiEvent::Action(Action::Forward));
        assert_eq!(mapper.map_event(ctrl('r')), UiEvent::Action(Action::Redo));
        assert_eq!(mapper.map_event(ctrl('s')), UiEvent::Action(Action::Save));
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('u'))), UiEvent::Action(Action::Undo));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('F'))),
            UiEvent::Action(Action::LinkHints(HintMode::Copy))
        );
    }

    #[test]
    fn search_prompt_collects_and_submits() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('/'))),
            UiEvent::BeginPrompt(PromptKind::Search)
        );
        assert_eq!(mapper.pending_input().as_deref(), Some("/"));

        mapper.map_event(key_event(KeyCode::Char('f')));
        assert_eq!(mapper.pending_input().as_deref(), Some("/f"));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Backspace)),
            UiEvent::PromptChanged {
                kind: PromptKind::Search,
                text: String::new()
            }
        );
        mapper.map_event(key_event(KeyCode::Char('g')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Enter)),
            UiEvent::PromptSubmit {
                kind: PromptKind::Search,
                text: "g".into()
            }
        );
        assert_eq!(mapper.mode(), InputMode::Normal);
        assert!(mapper.pending_input().is_none());
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('n'))),
            UiEvent::Action(Action::SearchNext { count: 1 })
        );
    }

    #[test]
    fn note_prompt_cancels_cleanly() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('i')));
        mapper.map_event(key_event(KeyCode::Char('x')));
        assert_eq!(mapper.pending_input().as_deref(), Some(">x"));
        assert_eq!(mapper.map_event(key_event(KeyCode::Esc)), UiEvent::PromptCancel);
        assert!(mapper.pending_input().is_none());

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char(':'))),
            UiEvent::BeginPrompt(PromptKind::Command)
        );
        mapper.map_event(key_event(KeyCode::Char('w')));
        assert_eq!(mapper.pending_input().as_deref(), Some(":w"));
    }

    #[test]
    fn outline_and_hint_modes() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('t'))), UiEvent::OpenOutline);
        mapper.set_mode(InputMode::Outline);
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::OutlineMove { delta: 1 }
        );
        assert_eq!(mapper.map_event(key_event(KeyCode::Enter)), UiEvent::OutlineActivate);

        mapper.set_mode(InputMode::Hints);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('1'))), UiEvent::HintDigit('1'));
        assert_eq!(mapper.map_event(key_event(KeyCode::Backspace)), UiEvent::HintBackspace);
        assert_eq!(mapper.map_event(key_event(KeyCode::Esc)), UiEvent::CloseOverlay);
        assert_eq!(mapper.mode(), InputMode::Normal);
    }

    #[test]
    fn quick_presses_in_place_count_as_multi_clicks() {
        let mut mapper = EventMapper::new();
        let t0 = Instant::now();
        let press = |m: &mut EventMapper, at| {
            match m.map_event_at(mouse(MouseEventKind::Down(MouseButton::Left), 5, 7), at) {
                UiEvent::Pointer(Pointer {
                    kind: PointerKind::Press { clicks },
                    ..
                }) => clicks,
                other => panic!("unexpected event: {:?}", other),
            }
        };
        assert_eq!(press(&mut mapper, t0), 1);
        assert_eq!(press(&mut mapper, t0 + Duration::from_millis(100)), 2);
        assert_eq!(press(&mut mapper, t0 + Duration::from_millis(200)), 3);
        assert_eq!(press(&mut mapper, t0 + Duration::from_secs(2)), 1);

        assert_eq!(
            mapper.map_event(Event::Mouse(MouseEvent {
                kind: MouseEventKind::Drag(MouseButton::Left),
                column: 9,
                row: 7,
                modifiers: KeyModifiers::CONTROL,
            })),
            UiEvent::Pointer(Pointer {
                kind: PointerKind::Drag,
                column: 9,
                row: 7,
                extend: false,
                region: true,
            })
        );
        assert_eq!(mapper.map_event(Event::Resize(80, 24)), UiEvent::Resize { columns: 80, rows: 24 });
    }
}
