//! Platform layer over GLFW
//!
//! Owns the OS window and the message pump, provides the monotonic clock
//! source and Vulkan surface plumbing. Translating window events into the
//! engine's input/event systems happens here so nothing above this module
//! touches GLFW types.

use thiserror::Error;

use crate::events::{codes, EventContext, EventSystem};
use crate::input::{Buttons, InputSystem, Keys};

/// Platform layer errors.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// GLFW could not be initialized.
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The OS window could not be created.
    #[error("window creation failed")]
    WindowCreationFailed,

    /// Surface creation or extension query failed.
    #[error("GLFW error: {0}")]
    Glfw(String),
}

/// Result alias for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// The OS window plus the GLFW context and event receiver.
pub struct Platform {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Platform {
    /// Opens the application window and prepares event polling.
    pub fn startup(
        name: &str,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> PlatformResult<Self> {
        let mut glfw =
            glfw::init(glfw::fail_on_errors).map_err(|_| PlatformError::InitializationFailed)?;

        // Vulkan only, no OpenGL context
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, name, glfw::WindowMode::Windowed)
            .ok_or(PlatformError::WindowCreationFailed)?;

        window.set_pos(x, y);
        window.set_key_polling(true);
        window.set_mouse_button_polling(true);
        window.set_cursor_pos_polling(true);
        window.set_scroll_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self {
            glfw,
            window,
            events,
        })
    }

    /// Polls the OS for messages and routes them into the input tracker
    /// and event bus. Returns `false` when the window asked to close.
    pub fn pump_messages(
        &mut self,
        input: &mut InputSystem,
        events: &mut EventSystem,
    ) -> bool {
        self.glfw.poll_events();
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::Key(key, _, action, _) => {
                    if let Some(key) = translate_key(key) {
                        let pressed = action != glfw::Action::Release;
                        input.process_key(key, pressed, events);
                    }
                }
                glfw::WindowEvent::MouseButton(button, action, _) => {
                    if let Some(button) = translate_button(button) {
                        let pressed = action != glfw::Action::Release;
                        input.process_button(button, pressed, events);
                    }
                }
                glfw::WindowEvent::CursorPos(x, y) => {
                    input.process_mouse_move(x as i16, y as i16, events);
                }
                glfw::WindowEvent::Scroll(_, y) => {
                    let delta: i8 = if y > 0.0 { 1 } else { -1 };
                    input.process_mouse_wheel(delta, events);
                }
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    events.fire(
                        codes::RESIZED,
                        EventContext::from_u16(&[width as u16, height as u16]),
                    );
                }
                glfw::WindowEvent::Close => {
                    self.window.set_should_close(true);
                }
                _ => {}
            }
        }
        !self.window.should_close()
    }

    /// Monotonic time in seconds since GLFW initialization.
    pub fn absolute_time(&self) -> f64 {
        self.glfw.get_time()
    }

    /// Blocks the calling thread for `ms` milliseconds.
    pub fn sleep(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }

    /// Current framebuffer size in pixels.
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width as u32, height as u32)
    }

    /// Instance extensions the platform requires
    /// (includes `VK_KHR_surface`).
    pub fn required_extension_names(&self) -> PlatformResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| PlatformError::Glfw("failed to query required instance extensions".into()))
    }

    /// Creates a Vulkan surface for the window.
    pub fn create_vulkan_surface(
        &mut self,
        instance: ash::vk::Instance,
    ) -> PlatformResult<ash::vk::SurfaceKHR> {
        let mut surface = ash::vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance, std::ptr::null(), &mut surface);
        if result == ash::vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(PlatformError::Glfw(format!(
                "failed to create Vulkan surface: {result:?}"
            )))
        }
    }
}

fn translate_key(key: glfw::Key) -> Option<Keys> {
    use glfw::Key as G;
    Some(match key {
        G::Backspace => Keys::Backspace,
        G::Tab => Keys::Tab,
        G::Enter => Keys::Enter,
        G::Pause => Keys::Pause,
        G::CapsLock => Keys::Capital,
        G::Escape => Keys::Escape,
        G::Space => Keys::Space,
        G::PageUp => Keys::PageUp,
        G::PageDown => Keys::PageDown,
        G::End => Keys::End,
        G::Home => Keys::Home,
        G::Left => Keys::Left,
        G::Up => Keys::Up,
        G::Right => Keys::Right,
        G::Down => Keys::Down,
        G::PrintScreen => Keys::Snapshot,
        G::Insert => Keys::Insert,
        G::Delete => Keys::Delete,

        G::Num0 => Keys::Num0,
        G::Num1 => Keys::Num1,
        G::Num2 => Keys::Num2,
        G::Num3 => Keys::Num3,
        G::Num4 => Keys::Num4,
        G::Num5 => Keys::Num5,
        G::Num6 => Keys::Num6,
        G::Num7 => Keys::Num7,
        G::Num8 => Keys::Num8,
        G::Num9 => Keys::Num9,

        G::A => Keys::A,
        G::B => Keys::B,
        G::C => Keys::C,
        G::D => Keys::D,
        G::E => Keys::E,
        G::F => Keys::F,
        G::G => Keys::G,
        G::H => Keys::H,
        G::I => Keys::I,
        G::J => Keys::J,
        G::K => Keys::K,
        G::L => Keys::L,
        G::M => Keys::M,
        G::N => Keys::N,
        G::O => Keys::O,
        G::P => Keys::P,
        G::Q => Keys::Q,
        G::R => Keys::R,
        G::S => Keys::S,
        G::T => Keys::T,
        G::U => Keys::U,
        G::V => Keys::V,
        G::W => Keys::W,
        G::X => Keys::X,
        G::Y => Keys::Y,
        G::Z => Keys::Z,

        G::LeftSuper => Keys::LSuper,
        G::RightSuper => Keys::RSuper,
        G::Menu => Keys::Apps,

        G::Kp0 => Keys::Numpad0,
        G::Kp1 => Keys::Numpad1,
        G::Kp2 => Keys::Numpad2,
        G::Kp3 => Keys::Numpad3,
        G::Kp4 => Keys::Numpad4,
        G::Kp5 => Keys::Numpad5,
        G::Kp6 => Keys::Numpad6,
        G::Kp7 => Keys::Numpad7,
        G::Kp8 => Keys::Numpad8,
        G::Kp9 => Keys::Numpad9,
        G::KpMultiply => Keys::Multiply,
        G::KpAdd => Keys::Add,
        G::KpSubtract => Keys::Subtract,
        G::KpDecimal => Keys::Decimal,
        G::KpDivide => Keys::Divide,
        G::KpEqual => Keys::NumpadEqual,

        G::F1 => Keys::F1,
        G::F2 => Keys::F2,
        G::F3 => Keys::F3,
        G::F4 => Keys::F4,
        G::F5 => Keys::F5,
        G::F6 => Keys::F6,
        G::F7 => Keys::F7,
        G::F8 => Keys::F8,
        G::F9 => Keys::F9,
        G::F10 => Keys::F10,
        G::F11 => Keys::F11,
        G::F12 => Keys::F12,
        G::F13 => Keys::F13,
        G::F14 => Keys::F14,
        G::F15 => Keys::F15,
        G::F16 => Keys::F16,
        G::F17 => Keys::F17,
        G::F18 => Keys::F18,
        G::F19 => Keys::F19,
        G::F20 => Keys::F20,
        G::F21 => Keys::F21,
        G::F22 => Keys::F22,
        G::F23 => Keys::F23,
        G::F24 => Keys::F24,

        G::NumLock => Keys::NumLock,
        G::ScrollLock => Keys::Scroll,

        G::LeftShift => Keys::LShift,
        G::RightShift => Keys::RShift,
        G::LeftControl => Keys::LControl,
        G::RightControl => Keys::RControl,
        G::LeftAlt => Keys::LAlt,
        G::RightAlt => Keys::RAlt,

        G::Semicolon => Keys::Semicolon,
        G::Equal => Keys::Plus,
        G::Comma => Keys::Comma,
        G::Minus => Keys::Minus,
        G::Period => Keys::Period,
        G::Slash => Keys::Slash,
        G::GraveAccent => Keys::Grave,

        _ => return None,
    })
}

fn translate_button(button: glfw::MouseButton) -> Option<Buttons> {
    Some(match button {
        glfw::MouseButton::Button1 => Buttons::Left,
        glfw::MouseButton::Button2 => Buttons::Right,
        glfw::MouseButton::Button3 => Buttons::Middle,
        _ => return None,
    })
}
