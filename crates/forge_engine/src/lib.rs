//! # Forge Engine
//!
//! A layered 3D game engine core built around a Vulkan rendering backend.
//!
//! The engine provides an application loop, an event and input subsystem,
//! tagged memory accounting, and a renderer stack with explicit management
//! of swapchains, render passes, pipelines, shaders, descriptor sets,
//! textures, materials, geometries and cameras. Games plug in through the
//! [`Game`] trait and receive lifecycle callbacks (`initialize`, `update`,
//! `render`, `on_resize`).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use forge_engine::prelude::*;
//!
//! struct MyGame;
//!
//! impl Game for MyGame {
//!     fn initialize(&mut self, _engine: &mut Engine) -> Result<(), AppError> {
//!         Ok(())
//!     }
//!
//!     fn update(&mut self, _engine: &mut Engine, _delta_time: f64) -> Result<(), AppError> {
//!         Ok(())
//!     }
//!
//!     fn render(&mut self, _engine: &mut Engine, _packet: &mut RenderPacket, _delta_time: f64)
//!         -> Result<(), AppError>
//!     {
//!         Ok(())
//!     }
//!
//!     fn on_resize(&mut self, _engine: &mut Engine, _width: u32, _height: u32) {}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     forge_engine::foundation::logging::init();
//!     let config = ApplicationConfig::default();
//!     Application::new(config, MyGame)?.run()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod foundation;
pub mod events;
pub mod input;
pub mod platform;
pub mod resources;
pub mod renderer;
pub mod systems;

mod application;

pub use application::{AppError, Application, ApplicationConfig, Engine, Game};

/// Sentinel identifier marking an unused slot or an unloaded/default
/// resource generation.
pub const INVALID_ID: u32 = u32::MAX;

/// Sentinel identifier for 16-bit id spaces.
pub const INVALID_ID_U16: u16 = u16::MAX;

/// Sentinel identifier for 8-bit id spaces.
pub const INVALID_ID_U8: u8 = u8::MAX;

/// Common imports for engine users.
pub mod prelude {
    pub use crate::{
        application::{AppError, Application, ApplicationConfig, Engine, Game},
        events::{EventContext, EventSystem},
        foundation::{
            clock::Clock,
            math::{Mat4, Mat4Ext, Vec2, Vec3, Vec4},
            memory::{MemorySystem, MemoryTag},
        },
        input::{Buttons, InputSystem, Keys},
        renderer::{GeometryRenderData, RenderPacket, Renderer},
        systems::{
            camera_system::{Camera, CameraSystem},
            geometry_system::{GeometryConfig, GeometrySystem},
            material_system::MaterialSystem,
            shader_system::ShaderSystem,
            texture_system::TextureSystem,
        },
        INVALID_ID,
    };
}
