//! Resource types and loaders
//!
//! A [`Resource`] is the result of a loader run: the payload plus the
//! loader id that produced it (used to route unload calls). Loaders are
//! registered with the resource system and selected by
//! [`ResourceType`], or by custom type string for [`ResourceType::Custom`].

use thiserror::Error;

use crate::renderer::types::MaterialConfig;
use crate::INVALID_ID;

pub mod loaders;

/// Kinds of resources the engine knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    /// UTF-8 text.
    Text,
    /// Raw bytes (SPIR-V binaries and the like).
    Binary,
    /// Decoded image pixels.
    Image,
    /// Parsed material configuration.
    Material,
    /// Application-defined; selected by custom type string.
    Custom,
}

/// Decoded image payload: RGBA8 pixels, vertically flipped at load.
#[derive(Debug, Clone)]
pub struct ImageResourceData {
    /// Channels per pixel (forced to 4).
    pub channel_count: u8,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel bytes, `width * height * channel_count` long.
    pub pixels: Vec<u8>,
}

/// Payload of a loaded resource.
#[derive(Debug, Clone)]
pub enum ResourceData {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Decoded image.
    Image(ImageResourceData),
    /// Parsed material configuration.
    Material(MaterialConfig),
}

/// A loaded resource.
#[derive(Debug)]
pub struct Resource {
    /// Id of the loader that produced this resource; stamps the unload
    /// route.
    pub loader_id: u32,
    /// The resource name it was requested under.
    pub name: String,
    /// Full path the loader resolved.
    pub full_path: String,
    /// The payload.
    pub data: ResourceData,
}

impl Resource {
    /// The binary payload, if this is a binary resource.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match &self.data {
            ResourceData::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The text payload, if this is a text resource.
    pub fn as_text(&self) -> Option<&str> {
        match &self.data {
            ResourceData::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The image payload, if this is an image resource.
    pub fn as_image(&self) -> Option<&ImageResourceData> {
        match &self.data {
            ResourceData::Image(image) => Some(image),
            _ => None,
        }
    }

    /// The material payload, if this is a material resource.
    pub fn as_material(&self) -> Option<&MaterialConfig> {
        match &self.data {
            ResourceData::Material(config) => Some(config),
            _ => None,
        }
    }
}

impl Default for Resource {
    fn default() -> Self {
        Self {
            loader_id: INVALID_ID,
            name: String::new(),
            full_path: String::new(),
            data: ResourceData::Binary(Vec::new()),
        }
    }
}

/// Resource loading errors.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The file could not be opened or read.
    #[error("unable to read resource file '{path}': {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// No registered loader matches the requested type.
    #[error("no loader for resource type '{0}' was found")]
    NoLoader(String),

    /// An image file could not be decoded.
    #[error("unable to decode image '{path}': {source}")]
    ImageDecode {
        /// Path that failed.
        path: String,
        /// Underlying decode error.
        source: image::ImageError,
    },

    /// The file contents could not be parsed.
    #[error("unable to parse resource '{path}': {reason}")]
    Parse {
        /// Path that failed.
        path: String,
        /// What went wrong.
        reason: String,
    },
}

/// A resource loader. Implementations resolve a name against the asset
/// base path and produce a [`Resource`].
pub trait ResourceLoader {
    /// The type this loader serves.
    fn resource_type(&self) -> ResourceType;

    /// The custom type string, for [`ResourceType::Custom`] loaders.
    fn custom_type(&self) -> Option<&str> {
        None
    }

    /// Loads `name` relative to `base_path`.
    fn load(&self, name: &str, base_path: &str) -> Result<Resource, ResourceError>;

    /// Releases a loaded resource. The default implementation simply
    /// drops it.
    fn unload(&self, resource: Resource) {
        drop(resource);
    }
}
