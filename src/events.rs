//! Input events forwarded to application callbacks.
//!
//! Connected clients produce keyboard, pointer and clipboard events; the
//! application observes them by registering one callback per event kind on
//! the server facade. Registering again replaces the previous callback.
//! Callbacks are invoked synchronously from the connection task that parsed
//! the message, so they should return quickly.

use std::sync::{PoisonError, RwLock};

/// Mouse button state sent with every pointer event.
///
/// One flag per button 1 through 8, with the least significant bit
/// representing button 1 (usually the left button).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonMask(u8);

impl ButtonMask {
    /// Wraps a raw wire mask.
    #[must_use]
    pub fn new(mask: u8) -> Self {
        Self(mask)
    }

    /// The raw 8-bit mask.
    #[must_use]
    pub fn raw(self) -> u8 {
        self.0
    }

    /// Whether the given button (1 through 8) is pressed.
    ///
    /// # Panics
    ///
    /// Panics if `button` is outside `1..=8`.
    #[must_use]
    pub fn is_pressed(self, button: u8) -> bool {
        assert!((1..=8).contains(&button), "buttons are numbered 1 through 8");
        self.0 & (1 << (button - 1)) != 0
    }
}

/// Callback invoked for key press/release events: `(down, keysym)`.
pub type KeyEventFn = dyn Fn(bool, u32) + Send + Sync;

/// Callback invoked for pointer events: `(buttons, x, y)`.
pub type PointerEventFn = dyn Fn(ButtonMask, u16, u16) + Send + Sync;

/// Callback invoked when a client transfers clipboard text.
pub type ClipboardTextFn = dyn Fn(&str) + Send + Sync;

/// One replaceable slot per event kind.
#[derive(Default)]
pub(crate) struct EventHandlers {
    key: RwLock<Option<Box<KeyEventFn>>>,
    pointer: RwLock<Option<Box<PointerEventFn>>>,
    clipboard: RwLock<Option<Box<ClipboardTextFn>>>,
}

impl EventHandlers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_key(&self, callback: Box<KeyEventFn>) {
        *write_slot(&self.key) = Some(callback);
    }

    pub(crate) fn set_pointer(&self, callback: Box<PointerEventFn>) {
        *write_slot(&self.pointer) = Some(callback);
    }

    pub(crate) fn set_clipboard(&self, callback: Box<ClipboardTextFn>) {
        *write_slot(&self.clipboard) = Some(callback);
    }

    pub(crate) fn emit_key_event(&self, down: bool, key: u32) {
        if let Some(callback) = read_slot(&self.key).as_ref() {
            callback(down, key);
        }
    }

    pub(crate) fn emit_pointer_event(&self, buttons: ButtonMask, x: u16, y: u16) {
        if let Some(callback) = read_slot(&self.pointer).as_ref() {
            callback(buttons, x, y);
        }
    }

    pub(crate) fn emit_clipboard_text(&self, text: &str) {
        if let Some(callback) = read_slot(&self.clipboard).as_ref() {
            callback(text);
        }
    }
}

fn read_slot<T>(slot: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    slot.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_slot<T>(slot: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    slot.write().unwrap_or_else(PoisonError::into_inner)
}
