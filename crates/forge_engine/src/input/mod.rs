//! Input tracker
//!
//! Keeps current and previous snapshots of keyboard and mouse state and
//! fires events on edges: key/button presses and releases only when the
//! state actually changes, mouse moves only when the position changes,
//! wheel events always. Once per frame [`InputSystem::update`] copies the
//! current snapshot over the previous one.

use crate::events::{codes, EventContext, EventSystem};

/// Keyboard key codes. Values follow the Windows virtual-key layout for
/// ASCII compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum Keys {
    Backspace = 0x08,
    Tab = 0x09,
    Enter = 0x0D,
    Shift = 0x10,
    Control = 0x11,
    Alt = 0x12,
    Pause = 0x13,
    Capital = 0x14,
    Escape = 0x1B,
    Convert = 0x1C,
    NonConvert = 0x1D,
    Accept = 0x1E,
    ModeChange = 0x1F,
    Space = 0x20,
    PageUp = 0x21,
    PageDown = 0x22,
    End = 0x23,
    Home = 0x24,
    Left = 0x25,
    Up = 0x26,
    Right = 0x27,
    Down = 0x28,
    Select = 0x29,
    Print = 0x2A,
    Execute = 0x2B,
    Snapshot = 0x2C,
    Insert = 0x2D,
    Delete = 0x2E,
    Help = 0x2F,

    Num0 = 0x30,
    Num1 = 0x31,
    Num2 = 0x32,
    Num3 = 0x33,
    Num4 = 0x34,
    Num5 = 0x35,
    Num6 = 0x36,
    Num7 = 0x37,
    Num8 = 0x38,
    Num9 = 0x39,

    A = 0x41,
    B = 0x42,
    C = 0x43,
    D = 0x44,
    E = 0x45,
    F = 0x46,
    G = 0x47,
    H = 0x48,
    I = 0x49,
    J = 0x4A,
    K = 0x4B,
    L = 0x4C,
    M = 0x4D,
    N = 0x4E,
    O = 0x4F,
    P = 0x50,
    Q = 0x51,
    R = 0x52,
    S = 0x53,
    T = 0x54,
    U = 0x55,
    V = 0x56,
    W = 0x57,
    X = 0x58,
    Y = 0x59,
    Z = 0x5A,

    LSuper = 0x5B,
    RSuper = 0x5C,
    Apps = 0x5D,
    Sleep = 0x5F,

    Numpad0 = 0x60,
    Numpad1 = 0x61,
    Numpad2 = 0x62,
    Numpad3 = 0x63,
    Numpad4 = 0x64,
    Numpad5 = 0x65,
    Numpad6 = 0x66,
    Numpad7 = 0x67,
    Numpad8 = 0x68,
    Numpad9 = 0x69,
    Multiply = 0x6A,
    Add = 0x6B,
    Separator = 0x6C,
    Subtract = 0x6D,
    Decimal = 0x6E,
    Divide = 0x6F,

    F1 = 0x70,
    F2 = 0x71,
    F3 = 0x72,
    F4 = 0x73,
    F5 = 0x74,
    F6 = 0x75,
    F7 = 0x76,
    F8 = 0x77,
    F9 = 0x78,
    F10 = 0x79,
    F11 = 0x7A,
    F12 = 0x7B,
    F13 = 0x7C,
    F14 = 0x7D,
    F15 = 0x7E,
    F16 = 0x7F,
    F17 = 0x80,
    F18 = 0x81,
    F19 = 0x82,
    F20 = 0x83,
    F21 = 0x84,
    F22 = 0x85,
    F23 = 0x86,
    F24 = 0x87,

    NumLock = 0x90,
    Scroll = 0x91,
    NumpadEqual = 0x92,

    LShift = 0xA0,
    RShift = 0xA1,
    LControl = 0xA2,
    RControl = 0xA3,
    LAlt = 0xA4,
    RAlt = 0xA5,

    Semicolon = 0xBA,
    Plus = 0xBB,
    Comma = 0xBC,
    Minus = 0xBD,
    Period = 0xBE,
    Slash = 0xBF,
    Grave = 0xC0,
}

/// Mouse buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Buttons {
    /// Left mouse button.
    Left = 0,
    /// Right mouse button.
    Right = 1,
    /// Middle mouse button.
    Middle = 2,
}

/// Number of mouse button slots tracked.
pub const BUTTON_MAX_BUTTONS: usize = 3;

const KEY_SLOTS: usize = 256;

#[derive(Clone, Copy)]
struct KeyboardState {
    keys: [bool; KEY_SLOTS],
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self {
            keys: [false; KEY_SLOTS],
        }
    }
}

#[derive(Clone, Copy, Default)]
struct MouseState {
    x: i16,
    y: i16,
    buttons: [bool; BUTTON_MAX_BUTTONS],
}

/// Current/previous keyboard and mouse snapshots.
#[derive(Default)]
pub struct InputSystem {
    keyboard_current: KeyboardState,
    keyboard_previous: KeyboardState,
    mouse_current: MouseState,
    mouse_previous: MouseState,
}

impl InputSystem {
    /// Creates an input system with everything released.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies current state to previous. Call once per frame, after all
    /// input for the frame has been recorded.
    pub fn update(&mut self, _delta_time: f64) {
        self.keyboard_previous = self.keyboard_current;
        self.mouse_previous = self.mouse_current;
    }

    /// Records a key state change and fires `KEY_PRESSED`/`KEY_RELEASED`
    /// on the edge.
    pub fn process_key(&mut self, key: Keys, pressed: bool, events: &mut EventSystem) {
        let slot = key as usize;
        if self.keyboard_current.keys[slot] != pressed {
            self.keyboard_current.keys[slot] = pressed;

            let context = EventContext::from_u16(&[key as u16]);
            let code = if pressed {
                codes::KEY_PRESSED
            } else {
                codes::KEY_RELEASED
            };
            events.fire(code, context);
        }
    }

    /// Records a mouse button change and fires the matching event on the
    /// edge.
    pub fn process_button(&mut self, button: Buttons, pressed: bool, events: &mut EventSystem) {
        let slot = button as usize;
        if self.mouse_current.buttons[slot] != pressed {
            self.mouse_current.buttons[slot] = pressed;

            let context = EventContext::from_u16(&[button as u16]);
            let code = if pressed {
                codes::BUTTON_PRESSED
            } else {
                codes::BUTTON_RELEASED
            };
            events.fire(code, context);
        }
    }

    /// Records a mouse move; fires `MOUSE_MOVED` only when the position
    /// actually changed.
    pub fn process_mouse_move(&mut self, x: i16, y: i16, events: &mut EventSystem) {
        if self.mouse_current.x != x || self.mouse_current.y != y {
            self.mouse_current.x = x;
            self.mouse_current.y = y;
            events.fire(
                codes::MOUSE_MOVED,
                EventContext::from_u16(&[x as u16, y as u16]),
            );
        }
    }

    /// Records a wheel movement. Always fires `MOUSE_WHEEL`.
    pub fn process_mouse_wheel(&mut self, z_delta: i8, events: &mut EventSystem) {
        events.fire(codes::MOUSE_WHEEL, EventContext::from_i8(&[z_delta]));
    }

    /// True when `key` is down in the current frame.
    pub fn is_key_down(&self, key: Keys) -> bool {
        self.keyboard_current.keys[key as usize]
    }

    /// True when `key` is up in the current frame.
    pub fn is_key_up(&self, key: Keys) -> bool {
        !self.keyboard_current.keys[key as usize]
    }

    /// True when `key` was down in the previous frame.
    pub fn was_key_down(&self, key: Keys) -> bool {
        self.keyboard_previous.keys[key as usize]
    }

    /// True when `key` was up in the previous frame.
    pub fn was_key_up(&self, key: Keys) -> bool {
        !self.keyboard_previous.keys[key as usize]
    }

    /// True on the frame a key transitioned from up to down.
    pub fn was_key_pressed(&self, key: Keys) -> bool {
        self.is_key_down(key) && self.was_key_up(key)
    }

    /// True when `button` is down in the current frame.
    pub fn is_button_down(&self, button: Buttons) -> bool {
        self.mouse_current.buttons[button as usize]
    }

    /// True when `button` is up in the current frame.
    pub fn is_button_up(&self, button: Buttons) -> bool {
        !self.mouse_current.buttons[button as usize]
    }

    /// True when `button` was down in the previous frame.
    pub fn was_button_down(&self, button: Buttons) -> bool {
        self.mouse_previous.buttons[button as usize]
    }

    /// True when `button` was up in the previous frame.
    pub fn was_button_up(&self, button: Buttons) -> bool {
        !self.mouse_previous.buttons[button as usize]
    }

    /// Current mouse position.
    pub fn mouse_position(&self) -> (i32, i32) {
        (self.mouse_current.x as i32, self.mouse_current.y as i32)
    }

    /// Previous-frame mouse position.
    pub fn previous_mouse_position(&self) -> (i32, i32) {
        (self.mouse_previous.x as i32, self.mouse_previous.y as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counting_listener(events: &mut EventSystem, code: u16) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0u32));
        let c = count.clone();
        events.register(
            code,
            900 + code as u64,
            Box::new(move |_, _| {
                c.set(c.get() + 1);
                false
            }),
        );
        count
    }

    #[test]
    fn test_key_events_fire_on_edges_only() {
        let mut events = EventSystem::new();
        let mut input = InputSystem::new();
        let pressed = counting_listener(&mut events, codes::KEY_PRESSED);
        let released = counting_listener(&mut events, codes::KEY_RELEASED);

        input.process_key(Keys::A, true, &mut events);
        input.process_key(Keys::A, true, &mut events); // no edge
        assert_eq!(pressed.get(), 1);

        input.process_key(Keys::A, false, &mut events);
        assert_eq!(released.get(), 1);
        assert_eq!(pressed.get(), 1);
    }

    #[test]
    fn test_update_snapshots_previous_state() {
        let mut events = EventSystem::new();
        let mut input = InputSystem::new();

        input.process_key(Keys::W, true, &mut events);
        assert!(input.is_key_down(Keys::W));
        assert!(!input.was_key_down(Keys::W));
        assert!(input.was_key_pressed(Keys::W));

        input.update(0.016);
        assert!(input.was_key_down(Keys::W));
        assert!(!input.was_key_pressed(Keys::W));
    }

    #[test]
    fn test_mouse_move_fires_only_on_change() {
        let mut events = EventSystem::new();
        let mut input = InputSystem::new();
        let moved = counting_listener(&mut events, codes::MOUSE_MOVED);

        input.process_mouse_move(10, 20, &mut events);
        input.process_mouse_move(10, 20, &mut events);
        assert_eq!(moved.get(), 1);
        assert_eq!(input.mouse_position(), (10, 20));

        input.process_mouse_move(11, 20, &mut events);
        assert_eq!(moved.get(), 2);
    }

    #[test]
    fn test_mouse_wheel_always_fires() {
        let mut events = EventSystem::new();
        let mut input = InputSystem::new();
        let wheel = counting_listener(&mut events, codes::MOUSE_WHEEL);

        input.process_mouse_wheel(1, &mut events);
        input.process_mouse_wheel(1, &mut events);
        assert_eq!(wheel.get(), 2);
    }

    #[test]
    fn test_button_edges() {
        let mut events = EventSystem::new();
        let mut input = InputSystem::new();
        let pressed = counting_listener(&mut events, codes::BUTTON_PRESSED);

        input.process_button(Buttons::Left, true, &mut events);
        input.process_button(Buttons::Left, true, &mut events);
        assert_eq!(pressed.get(), 1);
        assert!(input.is_button_down(Buttons::Left));
        assert!(input.was_button_up(Buttons::Left));
    }

    #[test]
    fn test_fresh_system_reports_everything_released() {
        let input = InputSystem::new();
        assert!(!input.is_key_down(Keys::Escape));
        assert!(input.is_key_up(Keys::Escape));
        assert!(!input.was_key_down(Keys::Escape));
        assert!(!input.is_button_down(Buttons::Right));
        assert_eq!(input.mouse_position(), (0, 0));
    }
}
