//! Resource system
//!
//! A registry of loaders dispatching by [`ResourceType`] (or custom type
//! string). Loader registration rejects duplicates; loading stamps the
//! winning loader's id into the resource so unload can route back to it.

use crate::resources::loaders::{BinaryLoader, ImageLoader, MaterialLoader, TextLoader};
use crate::resources::{Resource, ResourceError, ResourceLoader, ResourceType};

/// Resource system configuration.
#[derive(Debug, Clone)]
pub struct ResourceSystemConfig {
    /// Maximum number of registered loaders.
    pub max_loader_count: u32,
    /// Base path all loaders resolve against.
    pub asset_base_path: String,
}

impl Default for ResourceSystemConfig {
    fn default() -> Self {
        Self {
            max_loader_count: 32,
            asset_base_path: "assets".to_string(),
        }
    }
}

struct RegisteredLoader {
    id: u32,
    loader: Box<dyn ResourceLoader>,
}

/// The loader registry.
pub struct ResourceSystem {
    config: ResourceSystemConfig,
    loaders: Vec<RegisteredLoader>,
}

impl ResourceSystem {
    /// Creates the system and registers the built-in text, binary, image
    /// and material loaders.
    pub fn new(config: ResourceSystemConfig) -> Self {
        let mut system = Self {
            config,
            loaders: Vec::new(),
        };

        system.register_loader(Box::new(TextLoader));
        system.register_loader(Box::new(BinaryLoader));
        system.register_loader(Box::new(ImageLoader));
        system.register_loader(Box::new(MaterialLoader));

        log::info!(
            "Resource system initialized with base path '{}'.",
            system.config.asset_base_path
        );
        system
    }

    /// Registers a loader. Rejects duplicates by type, or by custom type
    /// string equality for custom loaders. Returns `false` on rejection.
    pub fn register_loader(&mut self, loader: Box<dyn ResourceLoader>) -> bool {
        if self.loaders.len() as u32 >= self.config.max_loader_count {
            log::error!(
                "register_loader - loader registry is full ({} loaders).",
                self.config.max_loader_count
            );
            return false;
        }

        for registered in &self.loaders {
            let existing = &registered.loader;
            if existing.resource_type() == loader.resource_type()
                && loader.resource_type() != ResourceType::Custom
            {
                log::error!(
                    "register_loader - a loader of type {:?} already exists and will not be registered.",
                    loader.resource_type()
                );
                return false;
            }
            if let (Some(existing_custom), Some(new_custom)) =
                (existing.custom_type(), loader.custom_type())
            {
                if existing_custom.eq_ignore_ascii_case(new_custom) {
                    log::error!(
                        "register_loader - a loader of custom type '{new_custom}' already exists and will not be registered."
                    );
                    return false;
                }
            }
        }

        let id = self.loaders.len() as u32;
        self.loaders.push(RegisteredLoader { id, loader });
        log::trace!("Loader registered.");
        true
    }

    /// Loads `name` with the loader registered for `resource_type`.
    pub fn load(&self, name: &str, resource_type: ResourceType) -> Result<Resource, ResourceError> {
        if resource_type != ResourceType::Custom {
            for registered in &self.loaders {
                if registered.loader.resource_type() == resource_type {
                    return self.run_loader(registered, name);
                }
            }
        }
        Err(ResourceError::NoLoader(format!("{resource_type:?}")))
    }

    /// Loads `name` with the custom loader whose type string matches.
    pub fn load_custom(&self, name: &str, custom_type: &str) -> Result<Resource, ResourceError> {
        if !custom_type.is_empty() {
            for registered in &self.loaders {
                if registered.loader.resource_type() == ResourceType::Custom
                    && registered
                        .loader
                        .custom_type()
                        .is_some_and(|t| t.eq_ignore_ascii_case(custom_type))
                {
                    return self.run_loader(registered, name);
                }
            }
        }
        Err(ResourceError::NoLoader(custom_type.to_string()))
    }

    /// Unloads a resource through the loader that produced it.
    pub fn unload(&self, resource: Resource) {
        if let Some(registered) = self
            .loaders
            .iter()
            .find(|registered| registered.id == resource.loader_id)
        {
            registered.loader.unload(resource);
        }
    }

    /// The configured asset base path.
    pub fn base_path(&self) -> &str {
        &self.config.asset_base_path
    }

    fn run_loader(
        &self,
        registered: &RegisteredLoader,
        name: &str,
    ) -> Result<Resource, ResourceError> {
        let mut resource = registered
            .loader
            .load(name, &self.config.asset_base_path)?;
        resource.loader_id = registered.id;
        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceData;

    struct DummyCustomLoader {
        type_name: &'static str,
    }

    impl ResourceLoader for DummyCustomLoader {
        fn resource_type(&self) -> ResourceType {
            ResourceType::Custom
        }

        fn custom_type(&self) -> Option<&str> {
            Some(self.type_name)
        }

        fn load(&self, name: &str, _base_path: &str) -> Result<Resource, ResourceError> {
            Ok(Resource {
                name: name.to_string(),
                data: ResourceData::Text(format!("custom:{}", self.type_name)),
                ..Resource::default()
            })
        }
    }

    #[test]
    fn test_duplicate_builtin_loader_rejected() {
        let mut system = ResourceSystem::new(ResourceSystemConfig::default());
        assert!(!system.register_loader(Box::new(TextLoader)));
    }

    #[test]
    fn test_custom_loaders_dispatch_by_name() {
        let mut system = ResourceSystem::new(ResourceSystemConfig::default());
        assert!(system.register_loader(Box::new(DummyCustomLoader { type_name: "level" })));
        assert!(system.register_loader(Box::new(DummyCustomLoader { type_name: "dialog" })));
        // duplicate custom type string is rejected case-insensitively
        assert!(!system.register_loader(Box::new(DummyCustomLoader { type_name: "LEVEL" })));

        let resource = system.load_custom("first", "level").unwrap();
        assert_eq!(resource.as_text(), Some("custom:level"));
        assert!(system.load_custom("first", "unknown").is_err());
    }

    #[test]
    fn test_load_stamps_loader_id() {
        let mut system = ResourceSystem::new(ResourceSystemConfig::default());
        system.register_loader(Box::new(DummyCustomLoader { type_name: "level" }));
        let resource = system.load_custom("a", "level").unwrap();
        // builtin loaders occupy ids 0..=3
        assert_eq!(resource.loader_id, 4);
        system.unload(resource);
    }

    #[test]
    fn test_missing_loader_is_an_error() {
        let system = ResourceSystem::new(ResourceSystemConfig {
            max_loader_count: 4,
            asset_base_path: "assets".into(),
        });
        assert!(system.load_custom("x", "nope").is_err());
    }
}
