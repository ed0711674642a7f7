//! Event bus
//!
//! Code-keyed publish/subscribe. Each 16-bit code holds an ordered list of
//! `(listener, callback)` pairs; firing walks the list in registration
//! order and stops at the first callback that reports the event handled.
//! Codes `0x00..=0xFF` are reserved for the engine; user codes start at
//! [`codes::USER_START`].

use std::collections::HashMap;

/// System event codes. Context layout conventions are documented per code.
pub mod codes {
    /// Shuts the application down on the next frame.
    pub const APPLICATION_QUIT: u16 = 0x01;
    /// Keyboard key pressed. Context: `u16[0]` = key code.
    pub const KEY_PRESSED: u16 = 0x02;
    /// Keyboard key released. Context: `u16[0]` = key code.
    pub const KEY_RELEASED: u16 = 0x03;
    /// Mouse button pressed. Context: `u16[0]` = button.
    pub const BUTTON_PRESSED: u16 = 0x04;
    /// Mouse button released. Context: `u16[0]` = button.
    pub const BUTTON_RELEASED: u16 = 0x05;
    /// Mouse moved. Context: `u16[0]` = x, `u16[1]` = y.
    pub const MOUSE_MOVED: u16 = 0x06;
    /// Mouse wheel moved. Context: `u8[0]` = delta (-1 or +1 as i8).
    pub const MOUSE_WHEEL: u16 = 0x07;
    /// OS window resized/resolution changed. Context: `u16[0]` = width,
    /// `u16[1]` = height.
    pub const RESIZED: u16 = 0x08;
    /// Changes the render mode for debugging. Context: `i32[0]` = mode.
    pub const SET_RENDER_MODE: u16 = 0x0A;

    /// Debug event slot 0.
    pub const DEBUG0: u16 = 0x10;
    /// Debug event slot 1.
    pub const DEBUG1: u16 = 0x11;
    /// Debug event slot 2.
    pub const DEBUG2: u16 = 0x12;
    /// Debug event slot 3.
    pub const DEBUG3: u16 = 0x13;
    /// Debug event slot 4.
    pub const DEBUG4: u16 = 0x14;

    /// First code available to application-defined events.
    pub const USER_START: u16 = 0x100;
}

/// Maximum number of event codes the bus accepts.
pub const MAX_MESSAGE_CODES: u16 = 16384;

/// 16 bytes of inline event data, interpreted by convention per code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventContext {
    data: [u8; 16],
}

impl EventContext {
    /// An all-zero context.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a context from up to eight u16 words.
    pub fn from_u16(values: &[u16]) -> Self {
        let mut ctx = Self::default();
        for (i, v) in values.iter().take(8).enumerate() {
            ctx.set_u16(i, *v);
        }
        ctx
    }

    /// Builds a context from up to four i32 words.
    pub fn from_i32(values: &[i32]) -> Self {
        let mut ctx = Self::default();
        for (i, v) in values.iter().take(4).enumerate() {
            ctx.data[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        ctx
    }

    /// Builds a context from up to four f32 values.
    pub fn from_f32(values: &[f32]) -> Self {
        let mut ctx = Self::default();
        for (i, v) in values.iter().take(4).enumerate() {
            ctx.data[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        ctx
    }

    /// Builds a context from up to sixteen i8 values.
    pub fn from_i8(values: &[i8]) -> Self {
        let mut ctx = Self::default();
        for (i, v) in values.iter().take(16).enumerate() {
            ctx.data[i] = *v as u8;
        }
        ctx
    }

    /// Writes the u16 word at `index` (0..8).
    pub fn set_u16(&mut self, index: usize, value: u16) {
        self.data[index * 2..index * 2 + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Reads the u16 word at `index` (0..8).
    pub fn u16(&self, index: usize) -> u16 {
        u16::from_le_bytes([self.data[index * 2], self.data[index * 2 + 1]])
    }

    /// Reads the i32 word at `index` (0..4).
    pub fn i32(&self, index: usize) -> i32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[index * 4..index * 4 + 4]);
        i32::from_le_bytes(bytes)
    }

    /// Reads the f32 value at `index` (0..4).
    pub fn f32(&self, index: usize) -> f32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[index * 4..index * 4 + 4]);
        f32::from_le_bytes(bytes)
    }

    /// Reads the i8 value at `index` (0..16).
    pub fn i8(&self, index: usize) -> i8 {
        self.data[index] as i8
    }
}

/// Callback invoked when an event fires. Returning `true` marks the event
/// handled and halts propagation.
pub type EventCallback = Box<dyn FnMut(u16, EventContext) -> bool>;

struct RegisteredEvent {
    listener: u64,
    callback: EventCallback,
}

/// The event bus.
#[derive(Default)]
pub struct EventSystem {
    registered: HashMap<u16, Vec<RegisteredEvent>>,
}

impl EventSystem {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `code` on behalf of `listener`.
    ///
    /// Returns `false` (without registering) when the same listener is
    /// already subscribed to the code, or the code is out of range.
    pub fn register(&mut self, code: u16, listener: u64, callback: EventCallback) -> bool {
        if code >= MAX_MESSAGE_CODES {
            log::error!("EventSystem::register called with out-of-range code {code:#06x}.");
            return false;
        }
        let entries = self.registered.entry(code).or_default();
        if entries.iter().any(|e| e.listener == listener) {
            log::warn!("Listener {listener} is already registered for event code {code:#04x}.");
            return false;
        }
        entries.push(RegisteredEvent { listener, callback });
        true
    }

    /// Removes the first registration matching `(code, listener)`.
    /// Returns `false` when no such registration exists.
    pub fn unregister(&mut self, code: u16, listener: u64) -> bool {
        let Some(entries) = self.registered.get_mut(&code) else {
            return false;
        };
        match entries.iter().position(|e| e.listener == listener) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Fires `code` to all listeners in registration order. The first
    /// callback returning `true` halts propagation and makes `fire` return
    /// `true`; if nobody handles the event the result is `false`.
    pub fn fire(&mut self, code: u16, context: EventContext) -> bool {
        let Some(entries) = self.registered.get_mut(&code) else {
            return false;
        };
        for entry in entries.iter_mut() {
            if (entry.callback)(code, context) {
                // handled, do not forward to remaining listeners
                return true;
            }
        }
        false
    }

    /// Drops every listener list.
    pub fn shutdown(&mut self) {
        self.registered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_register_rejects_duplicates() {
        let mut events = EventSystem::new();
        assert!(events.register(codes::APPLICATION_QUIT, 1, Box::new(|_, _| false)));
        assert!(!events.register(codes::APPLICATION_QUIT, 1, Box::new(|_, _| false)));
        // a different listener is fine
        assert!(events.register(codes::APPLICATION_QUIT, 2, Box::new(|_, _| false)));
    }

    #[test]
    fn test_fire_halts_on_first_handler() {
        let mut events = EventSystem::new();
        let b_count = Rc::new(Cell::new(0u32));

        // A handles the event
        events.register(0x01, 1, Box::new(|_, _| true));
        // B counts invocations but should never run
        let b = b_count.clone();
        events.register(
            0x01,
            2,
            Box::new(move |_, _| {
                b.set(b.get() + 1);
                false
            }),
        );

        assert!(events.fire(0x01, EventContext::empty()));
        assert_eq!(b_count.get(), 0);
    }

    #[test]
    fn test_fire_unhandled_returns_false() {
        let mut events = EventSystem::new();
        events.register(0x05, 1, Box::new(|_, _| false));
        assert!(!events.fire(0x05, EventContext::empty()));
        assert!(!events.fire(0x99, EventContext::empty()));
    }

    #[test]
    fn test_unregister_removes_listener() {
        let mut events = EventSystem::new();
        let count = Rc::new(Cell::new(0u32));
        let c = count.clone();
        events.register(
            0x02,
            7,
            Box::new(move |_, _| {
                c.set(c.get() + 1);
                true
            }),
        );

        events.fire(0x02, EventContext::empty());
        assert_eq!(count.get(), 1);

        assert!(events.unregister(0x02, 7));
        assert!(!events.unregister(0x02, 7));
        events.fire(0x02, EventContext::empty());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_context_round_trips() {
        let ctx = EventContext::from_u16(&[800, 600]);
        assert_eq!(ctx.u16(0), 800);
        assert_eq!(ctx.u16(1), 600);

        let ctx = EventContext::from_i32(&[-5]);
        assert_eq!(ctx.i32(0), -5);

        let ctx = EventContext::from_i8(&[-1]);
        assert_eq!(ctx.i8(0), -1);

        let ctx = EventContext::from_f32(&[1.5, -2.25]);
        assert_eq!(ctx.f32(0), 1.5);
        assert_eq!(ctx.f32(1), -2.25);
    }

    #[test]
    fn test_out_of_range_code_rejected() {
        let mut events = EventSystem::new();
        assert!(!events.register(MAX_MESSAGE_CODES, 1, Box::new(|_, _| false)));
    }
}
