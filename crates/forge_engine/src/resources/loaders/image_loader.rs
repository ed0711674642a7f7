//! Image loader
//!
//! Loads PNGs from `<base>/textures/<name>.png`, forces four channels
//! (RGBA8) and flips vertically so texture coordinates match the
//! renderer's convention.

use crate::resources::{
    ImageResourceData, Resource, ResourceData, ResourceError, ResourceLoader, ResourceType,
};

const REQUIRED_CHANNEL_COUNT: u8 = 4;

/// Loads and decodes image files.
#[derive(Debug, Default)]
pub struct ImageLoader;

impl ResourceLoader for ImageLoader {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Image
    }

    fn load(&self, name: &str, base_path: &str) -> Result<Resource, ResourceError> {
        // TODO: try extensions other than png
        let full_path = format!("{base_path}/textures/{name}.png");

        let image = image::open(&full_path).map_err(|source| ResourceError::ImageDecode {
            path: full_path.clone(),
            source,
        })?;

        // images are stored top-down on disk; the renderer samples
        // bottom-up
        let rgba = image.flipv().to_rgba8();
        let (width, height) = rgba.dimensions();

        Ok(Resource {
            name: name.to_string(),
            full_path,
            data: ResourceData::Image(ImageResourceData {
                channel_count: REQUIRED_CHANNEL_COUNT,
                width,
                height,
                pixels: rgba.into_raw(),
            }),
            ..Resource::default()
        })
    }
}
