//! Resource-management systems sitting above the renderer
//!
//! Each system owns a fixed-capacity slot array of named, reference-
//! counted resources and talks to the GPU through the renderer frontend.

pub mod camera_system;
pub mod geometry_system;
pub mod material_system;
pub mod resource_system;
pub mod shader_system;
pub mod texture_system;
