//! Raw byte loader
//!
//! Used for SPIR-V shader binaries among other things; paths resolve
//! directly under the base path.

use crate::resources::{Resource, ResourceData, ResourceError, ResourceLoader, ResourceType};

/// Loads files as raw bytes.
#[derive(Debug, Default)]
pub struct BinaryLoader;

impl ResourceLoader for BinaryLoader {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Binary
    }

    fn load(&self, name: &str, base_path: &str) -> Result<Resource, ResourceError> {
        let full_path = format!("{base_path}/{name}");
        let bytes = std::fs::read(&full_path).map_err(|source| ResourceError::Io {
            path: full_path.clone(),
            source,
        })?;

        Ok(Resource {
            name: name.to_string(),
            full_path,
            data: ResourceData::Binary(bytes),
            ..Resource::default()
        })
    }
}
