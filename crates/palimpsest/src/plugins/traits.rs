//! Base plugin traits.
//!
//! Every plugin implements [`Plugin`] for identity and lifecycle, and [`PipelinePlugin`] to
//! contribute hook implementations to a [`HookRegistry`](crate::plugins::HookRegistry).

use crate::Result;
use crate::plugins::hooks::HookImpl;

/// Base trait that all plugins must implement.
///
/// # Thread Safety
///
/// Plugins are shared as `Arc<dyn PipelinePlugin>` between workers of the thread backend, so
/// they must be `Send + Sync`. Process workers build their own instances from configuration.
///
/// # Example
///
/// ```rust
/// use palimpsest::plugins::Plugin;
/// use palimpsest::Result;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct MyPlugin {
///     initialized: AtomicBool,
/// }
///
/// impl Plugin for MyPlugin {
///     fn name(&self) -> &str {
///         "my-plugin"
///     }
///
///     fn version(&self) -> String {
///         "1.0.0".to_string()
///     }
///
///     fn initialize(&self) -> Result<()> {
///         self.initialized.store(true, Ordering::Release);
///         Ok(())
///     }
///
///     fn shutdown(&self) -> Result<()> {
///         self.initialized.store(false, Ordering::Release);
///         Ok(())
///     }
/// }
/// ```
pub trait Plugin: Send + Sync {
    /// Returns the unique name/identifier for this plugin.
    ///
    /// The name is the plugin id used to attribute hook results and failures. It should be
    /// lowercase with hyphens (e.g. `"grayscale-ocr-image"`) and must not contain whitespace.
    fn name(&self) -> &str;

    /// Returns the semantic version of this plugin.
    fn version(&self) -> String;

    /// Initialize the plugin.
    ///
    /// Called once when the plugin is registered, before any hook is dispatched. The plugin is
    /// not registered if this returns an error.
    fn initialize(&self) -> Result<()>;

    /// Shutdown the plugin.
    ///
    /// Errors during shutdown are logged but don't prevent the shutdown process.
    fn shutdown(&self) -> Result<()>;

    /// Optional plugin description for debugging and logging.
    fn description(&self) -> &str {
        ""
    }

    /// Optional plugin author information.
    fn author(&self) -> &str {
        ""
    }
}

/// A plugin that extends the OCR pipeline through hook points.
pub trait PipelinePlugin: Plugin {
    /// Hook implementations contributed by this plugin, in registration order.
    fn hooks(&self) -> Vec<HookImpl>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestPlugin {
        initialized: AtomicBool,
    }

    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            "test-plugin"
        }

        fn version(&self) -> String {
            "1.0.0".to_string()
        }

        fn initialize(&self) -> Result<()> {
            self.initialized.store(true, Ordering::Release);
            Ok(())
        }

        fn shutdown(&self) -> Result<()> {
            self.initialized.store(false, Ordering::Release);
            Ok(())
        }

        fn description(&self) -> &str {
            "A test plugin"
        }
    }

    impl PipelinePlugin for TestPlugin {
        fn hooks(&self) -> Vec<HookImpl> {
            Vec::new()
        }
    }

    #[test]
    fn test_plugin_metadata() {
        let plugin = TestPlugin {
            initialized: AtomicBool::new(false),
        };
        assert_eq!(plugin.name(), "test-plugin");
        assert_eq!(plugin.version(), "1.0.0");
        assert_eq!(plugin.description(), "A test plugin");
        assert_eq!(plugin.author(), "");
        assert!(plugin.hooks().is_empty());
    }

    #[test]
    fn test_plugin_lifecycle() {
        let plugin = TestPlugin {
            initialized: AtomicBool::new(false),
        };

        plugin.initialize().unwrap();
        assert!(plugin.initialized.load(Ordering::Acquire));

        plugin.shutdown().unwrap();
        assert!(!plugin.initialized.load(Ordering::Acquire));
    }
}
