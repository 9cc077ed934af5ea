//! Hook registration and dispatch.
//!
//! A [`HookRegistry`] is filled during setup and then shared read-only (`Arc<HookRegistry>`)
//! with every worker. Dispatch never mutates the registry.

use crate::plugins::hooks::{
    DispatchMode, GenerationRequest, HookImpl, HookPoint, OptionSpec, PageHookContext,
};
use crate::plugins::traits::PipelinePlugin;
use crate::core::config::PipelineConfig;
use crate::{PalimpsestError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;

/// Validate a plugin name before registration.
///
/// # Rules
///
/// - Name cannot be empty
/// - Name cannot contain whitespace
fn validate_plugin_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PalimpsestError::validation("Plugin name cannot be empty"));
    }

    if name.contains(char::is_whitespace) {
        return Err(PalimpsestError::validation(format!(
            "Plugin name '{}' cannot contain whitespace",
            name
        )));
    }

    Ok(())
}

/// A hook implementation that failed during dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookFailure {
    pub plugin_id: String,
    pub hook_point: HookPoint,
    pub message: String,
}

impl HookFailure {
    pub fn into_error(self) -> PalimpsestError {
        PalimpsestError::plugin(self.plugin_id, format!("{}: {}", self.hook_point, self.message))
    }
}

impl std::fmt::Display for HookFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "plugin '{}' failed in {}: {}", self.plugin_id, self.hook_point, self.message)
    }
}

/// Results of a collect-all dispatch.
#[derive(Debug, Clone)]
pub struct Collected<R> {
    /// `(plugin_id, result)` in registration order.
    pub results: Vec<(String, R)>,
    pub failures: Vec<HookFailure>,
}

impl<R> Collected<R> {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn the first failure into an error.
    pub fn into_result(self) -> Result<Vec<(String, R)>> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.into_error()),
            None => Ok(self.results),
        }
    }
}

/// Result of a first-result dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched<R> {
    pub value: R,
    /// Plugin that supplied the value, `None` when the default ran.
    pub provided_by: Option<String>,
    /// Implementations that failed before a value was found.
    pub failures: Vec<HookFailure>,
}

#[derive(Clone)]
struct Registration {
    plugin_id: String,
    hook: HookImpl,
}

/// Ordered collection of hook implementations per hook point.
#[derive(Default)]
pub struct HookRegistry {
    hooks: IndexMap<HookPoint, Vec<Registration>>,
    plugins: Vec<Arc<dyn PipelinePlugin>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single implementation for `hook_point`.
    ///
    /// Implementations are appended, so dispatch order follows call order.
    pub fn register(&mut self, hook_point: HookPoint, plugin_id: impl Into<String>, hook: HookImpl) -> Result<()> {
        let plugin_id = plugin_id.into();
        validate_plugin_name(&plugin_id)?;

        if hook.point() != hook_point {
            return Err(PalimpsestError::validation(format!(
                "Plugin '{}' registered a {} implementation for {}",
                plugin_id,
                hook.point(),
                hook_point
            )));
        }

        self.hooks
            .entry(hook_point)
            .or_default()
            .push(Registration { plugin_id, hook });
        Ok(())
    }

    /// Initialize a plugin and register all of its hooks.
    pub fn register_plugin(&mut self, plugin: Arc<dyn PipelinePlugin>) -> Result<()> {
        let name = plugin.name().to_string();
        validate_plugin_name(&name)?;

        if self.plugins.iter().any(|p| p.name() == name) {
            return Err(PalimpsestError::validation(format!("Plugin '{}' is already registered", name)));
        }

        plugin.initialize()?;

        for hook in plugin.hooks() {
            self.register(hook.point(), name.clone(), hook)?;
        }

        tracing::debug!(plugin = %name, version = %plugin.version(), "Registered pipeline plugin");
        self.plugins.push(plugin);
        Ok(())
    }

    /// Call `shutdown` on every registered plugin, in reverse order.
    pub fn shutdown(&self) {
        for plugin in self.plugins.iter().rev() {
            if let Err(e) = plugin.shutdown() {
                tracing::warn!(plugin = plugin.name(), error = %e, "Plugin shutdown failed");
            }
        }
    }

    /// Names of plugins registered through [`register_plugin`](Self::register_plugin).
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// Every plugin id that owns at least one hook.
    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for registration in self.hooks.values().flatten() {
            if !ids.contains(&registration.plugin_id) {
                ids.push(registration.plugin_id.clone());
            }
        }
        ids
    }

    /// Plugin ids registered for `hook_point`, in registration order.
    pub fn registrations(&self, hook_point: HookPoint) -> Vec<&str> {
        self.hooks
            .get(&hook_point)
            .map(|regs| regs.iter().map(|r| r.plugin_id.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(Vec::is_empty)
    }

    fn entries(&self, hook_point: HookPoint) -> &[Registration] {
        self.hooks.get(&hook_point).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run every implementation for `hook_point` in registration order.
    fn collect_all<R>(&self, hook_point: HookPoint, call: impl Fn(&HookImpl) -> Option<Result<R>>) -> Collected<R> {
        debug_assert_eq!(hook_point.dispatch_mode(), DispatchMode::CollectAll);

        let mut collected = Collected {
            results: Vec::new(),
            failures: Vec::new(),
        };

        for registration in self.entries(hook_point) {
            match invoke(registration, hook_point, &call) {
                Ok(Some(value)) => collected.results.push((registration.plugin_id.clone(), value)),
                Ok(None) => {}
                Err(failure) => {
                    tracing::warn!(plugin = %failure.plugin_id, hook = %hook_point, "{}", failure.message);
                    collected.failures.push(failure);
                }
            }
        }

        collected
    }

    /// Run implementations for `hook_point` in reverse registration order until one answers.
    fn first_result<R>(
        &self,
        hook_point: HookPoint,
        call: impl Fn(&HookImpl) -> Option<Result<Option<R>>>,
        default: impl FnOnce() -> Result<R>,
    ) -> Result<Dispatched<R>> {
        debug_assert_eq!(hook_point.dispatch_mode(), DispatchMode::FirstResult);

        let mut failures = Vec::new();

        for registration in self.entries(hook_point).iter().rev() {
            match invoke(registration, hook_point, &call) {
                Ok(Some(Some(value))) => {
                    tracing::debug!(plugin = %registration.plugin_id, hook = %hook_point, "Hook supplied result");
                    return Ok(Dispatched {
                        value,
                        provided_by: Some(registration.plugin_id.clone()),
                        failures,
                    });
                }
                Ok(_) => {}
                Err(failure) => {
                    tracing::warn!(plugin = %failure.plugin_id, hook = %hook_point, "{}", failure.message);
                    failures.push(failure);
                }
            }
        }

        Ok(Dispatched {
            value: default()?,
            provided_by: None,
            failures,
        })
    }

    /// Collect plugin options from every plugin.
    pub fn add_options(&self) -> Collected<Vec<OptionSpec>> {
        self.collect_all(HookPoint::AddOptions, |hook| match hook {
            HookImpl::AddOptions(f) => Some(f()),
            _ => None,
        })
    }

    /// Let every plugin validate the final configuration.
    pub fn check_options(&self, config: &PipelineConfig) -> Collected<()> {
        self.collect_all(HookPoint::CheckOptions, |hook| match hook {
            HookImpl::CheckOptions(f) => Some(f(config)),
            _ => None,
        })
    }

    /// Let every plugin inspect a page before recognition.
    pub fn validate_before_ocr(&self, ctx: &PageHookContext<'_>) -> Collected<()> {
        self.collect_all(HookPoint::ValidateBeforeOcr, |hook| match hook {
            HookImpl::ValidateBeforeOcr(f) => Some(f(ctx)),
            _ => None,
        })
    }

    /// Replace the visible raster of a rasterized page.
    pub fn filter_page_image(
        &self,
        ctx: &PageHookContext<'_>,
        default: impl FnOnce() -> Result<PathBuf>,
    ) -> Result<Dispatched<PathBuf>> {
        self.first_result(
            HookPoint::FilterPageImage,
            |hook| match hook {
                HookImpl::FilterPageImage(f) => Some(f(ctx)),
                _ => None,
            },
            default,
        )
    }

    /// Replace the raster handed to the recognition engine.
    pub fn filter_ocr_image(
        &self,
        ctx: &PageHookContext<'_>,
        default: impl FnOnce() -> Result<PathBuf>,
    ) -> Result<Dispatched<PathBuf>> {
        self.first_result(
            HookPoint::FilterOcrImage,
            |hook| match hook {
                HookImpl::FilterOcrImage(f) => Some(f(ctx)),
                _ => None,
            },
            default,
        )
    }

    /// Name the engine used to recognize a page.
    pub fn choose_ocr_engine(
        &self,
        ctx: &PageHookContext<'_>,
        default: impl FnOnce() -> Result<String>,
    ) -> Result<Dispatched<String>> {
        self.first_result(
            HookPoint::ChooseOcrEngine,
            |hook| match hook {
                HookImpl::ChooseOcrEngine(f) => Some(f(ctx)),
                _ => None,
            },
            default,
        )
    }

    /// Produce a candidate output document.
    pub fn generate_compliant_output(
        &self,
        request: &GenerationRequest<'_>,
        default: impl FnOnce() -> Result<PathBuf>,
    ) -> Result<Dispatched<PathBuf>> {
        self.first_result(
            HookPoint::GenerateCompliantOutput,
            |hook| match hook {
                HookImpl::GenerateCompliantOutput(f) => Some(f(request)),
                _ => None,
            },
            default,
        )
    }
}

/// Call one implementation, turning errors and panics into an attributed failure.
fn invoke<T>(
    registration: &Registration,
    hook_point: HookPoint,
    call: &impl Fn(&HookImpl) -> Option<Result<T>>,
) -> std::result::Result<Option<T>, HookFailure> {
    let failure = |message: String| HookFailure {
        plugin_id: registration.plugin_id.clone(),
        hook_point,
        message,
    };

    match catch_unwind(AssertUnwindSafe(|| call(&registration.hook))) {
        Ok(None) => Ok(None),
        Ok(Some(Ok(value))) => Ok(Some(value)),
        Ok(Some(Err(e))) => Err(failure(e.to_string())),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "hook panicked".to_string());
            Err(failure(format!("panicked: {}", message)))
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (point, regs) in &self.hooks {
            let ids: Vec<&str> = regs.iter().map(|r| r.plugin_id.as_str()).collect();
            map.entry(point, &ids);
        }
        map.finish()
    }
}
