//! Name-based plugin construction.
//!
//! Worker processes cannot receive plugin objects, only configuration. The catalog maps plugin
//! names from [`PipelineConfig::plugins`] to constructors so every worker builds an identical
//! registry of its own.

use crate::core::config::PipelineConfig;
use crate::plugins::builtin::{GrayscaleOcrImage, ReuseSidecarHocr};
use crate::plugins::registry::HookRegistry;
use crate::plugins::traits::PipelinePlugin;
use crate::{PalimpsestError, Result};
use indexmap::IndexMap;
use std::sync::Arc;

pub type PluginConstructor = fn(&PipelineConfig) -> Result<Arc<dyn PipelinePlugin>>;

#[derive(Clone, Default)]
pub struct PluginCatalog {
    constructors: IndexMap<String, PluginConstructor>,
}

impl PluginCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with all built-in plugins.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.add(GrayscaleOcrImage::NAME, |_| Ok(Arc::new(GrayscaleOcrImage)));
        catalog.add(ReuseSidecarHocr::NAME, |_| Ok(Arc::new(ReuseSidecarHocr)));
        catalog
    }

    pub fn add(&mut self, name: impl Into<String>, constructor: PluginConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Build a registry with the plugins named in `config.plugins`, in that order.
    pub fn build_registry(&self, config: &PipelineConfig) -> Result<HookRegistry> {
        let mut registry = HookRegistry::new();

        for name in &config.plugins {
            let constructor = self.constructors.get(name).ok_or_else(|| {
                PalimpsestError::validation(format!(
                    "Unknown plugin '{}' (available: {})",
                    name,
                    self.names().collect::<Vec<_>>().join(", ")
                ))
            })?;
            registry.register_plugin(constructor(config)?)?;
        }

        Ok(registry)
    }
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::hooks::HookPoint;

    #[test]
    fn test_builtin_catalog_builds_registry_in_config_order() {
        let mut config = PipelineConfig::default();
        config.plugins = vec![ReuseSidecarHocr::NAME.to_string(), GrayscaleOcrImage::NAME.to_string()];

        let registry = PluginCatalog::builtin().build_registry(&config).unwrap();
        assert_eq!(
            registry.plugin_names(),
            vec![ReuseSidecarHocr::NAME.to_string(), GrayscaleOcrImage::NAME.to_string()]
        );
        assert_eq!(registry.registrations(HookPoint::FilterOcrImage), vec![GrayscaleOcrImage::NAME]);
    }

    #[test]
    fn test_unknown_plugin_is_rejected() {
        let mut config = PipelineConfig::default();
        config.plugins = vec!["does-not-exist".to_string()];

        let err = PluginCatalog::builtin().build_registry(&config).unwrap_err();
        assert!(err.to_string().contains("does-not-exist"));
        assert!(err.to_string().contains(GrayscaleOcrImage::NAME));
    }
}
