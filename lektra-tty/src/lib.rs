//! Terminal front end: kitty graphics output, frame compositing and the
//! key and mouse bindings.

pub mod compositor;
pub mod input;
pub mod kitty;

pub use compositor::{compose, hint_cells};
pub use input::{Action, EventMapper, InputMode, Pointer, PointerKind, PromptKind, UiEvent};
pub use kitty::{DrawParams, KittyRenderer, TerminalGeometry};
