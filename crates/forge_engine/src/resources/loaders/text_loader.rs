//! UTF-8 text loader

use crate::resources::{Resource, ResourceData, ResourceError, ResourceLoader, ResourceType};

/// Loads files as UTF-8 text, resolved directly under the base path.
#[derive(Debug, Default)]
pub struct TextLoader;

impl ResourceLoader for TextLoader {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Text
    }

    fn load(&self, name: &str, base_path: &str) -> Result<Resource, ResourceError> {
        let full_path = format!("{base_path}/{name}");
        let text = std::fs::read_to_string(&full_path).map_err(|source| ResourceError::Io {
            path: full_path.clone(),
            source,
        })?;

        Ok(Resource {
            name: name.to_string(),
            full_path,
            data: ResourceData::Text(text),
            ..Resource::default()
        })
    }
}
