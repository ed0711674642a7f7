//! Built-in resource loaders

mod binary_loader;
mod image_loader;
mod material_loader;
mod text_loader;

pub use binary_loader::BinaryLoader;
pub use image_loader::ImageLoader;
pub use material_loader::MaterialLoader;
pub use text_loader::TextLoader;
