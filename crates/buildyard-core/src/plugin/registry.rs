//! Static plugin catalog and startup loading.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, info};

use super::pipeline::{panic_message, PluginPipeline};
use super::{BuildPlugin, Hook, PluginError};

/// Builds a fresh plugin instance.
pub type PluginConstructor = Box<dyn Fn() -> Box<dyn BuildPlugin> + Send + Sync>;

/// Maps configured plugin names to constructors.
#[derive(Default)]
pub struct PluginCatalog {
    entries: BTreeMap<String, PluginConstructor>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `constructor` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> Box<dyn BuildPlugin> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Box::new(constructor));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Construct the plugin registered as `name`.
    pub fn construct(&self, name: &str) -> Result<Box<dyn BuildPlugin>, PluginError> {
        self.entries
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| PluginError::Unknown {
                name: name.to_string(),
            })
    }
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("entries", &self.names())
            .finish()
    }
}

fn init_plugin(
    plugin: &mut dyn BuildPlugin,
    raw_config: &[u8],
    version: &str,
) -> Result<(), PluginError> {
    let name = plugin.name().to_string();
    match panic::catch_unwind(AssertUnwindSafe(|| plugin.init(raw_config, version))) {
        Ok(result) => result,
        Err(payload) => Err(PluginError::Panic {
            plugin: name,
            hook: Hook::Init,
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Construct and initialise the plugins named in `names`, in order.
///
/// Unknown names and failed initialisations are logged and skipped; they
/// never abort loading of the remaining plugins.
pub fn load_plugins(
    catalog: &PluginCatalog,
    names: &[String],
    raw_config: &[u8],
    version: &str,
) -> PluginPipeline {
    if names.is_empty() {
        info!("No plugins configured, bypassing plugin loader");
        return PluginPipeline::empty();
    }

    let mut constructed = 0usize;
    let mut plugins: Vec<Box<dyn BuildPlugin>> = Vec::with_capacity(names.len());
    for name in names {
        let mut plugin = match catalog.construct(name) {
            Ok(plugin) => plugin,
            Err(e) => {
                error!(plugin = %name, error = %e, "Failed to load plugin");
                continue;
            }
        };
        constructed += 1;

        if let Err(e) = init_plugin(plugin.as_mut(), raw_config, version) {
            error!(plugin = %name, error = %e, "Plugin loaded but failed to initialise");
            continue;
        }
        plugins.push(plugin);
    }

    debug!(
        "Plugin loader: {} configured, {} constructed, {} initialised",
        names.len(),
        constructed,
        plugins.len()
    );
    info!("Initialised {} plugins successfully", plugins.len());
    PluginPipeline::new(plugins)
}
