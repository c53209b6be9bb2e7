//! Protocol runner registry
//!
//! Maps protocol names to runner factories. Built-in protocols are
//! registered at startup and are permanent; plugin protocols can come and go
//! at runtime. Lookups fall through from explicit registrations to the
//! [`PluginManager`] before failing with [`Error::UnregisteredProtocol`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::spec::BUILTIN_PROTOCOLS;
use crate::types::{ResponseEnvelope, TestCase};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Runner capability
// ============================================================================

/// Executes test cases for one protocol
#[async_trait]
pub trait TestRunner: Send + Sync {
    fn protocol(&self) -> &str;

    /// Execute the request of `case`. Transport failures come back as an
    /// envelope with status 0; `Err` is reserved for cases the runner cannot
    /// interpret at all.
    async fn execute(&self, case: &TestCase) -> Result<ResponseEnvelope>;
}

/// Hands a request to the wire for runners that do not own a client
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, protocol: &str, request: &Value, timeout: Duration) -> Result<ResponseEnvelope>;
}

/// Options passed to runner factories
#[derive(Clone)]
pub struct RunnerOptions {
    pub timeout: Duration,
    /// Used when a case has no `environment` base URL
    pub base_url: Option<String>,
    /// Headers added to every request unless the case sets them
    pub default_headers: BTreeMap<String, String>,
    /// Capability for protocols without a built-in client
    pub transport: Option<Arc<dyn Transport>>,
    /// Free-form options for plugin runners
    pub extra: Map<String, Value>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            base_url: None,
            default_headers: BTreeMap::new(),
            transport: None,
            extra: Map::new(),
        }
    }
}

impl std::fmt::Debug for RunnerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerOptions")
            .field("timeout", &self.timeout)
            .field("base_url", &self.base_url)
            .field("default_headers", &self.default_headers)
            .field("transport", &self.transport.is_some())
            .field("extra", &self.extra)
            .finish()
    }
}

/// Builds a runner for a protocol
pub type RunnerFactory = Arc<dyn Fn(&RunnerOptions) -> Result<Arc<dyn TestRunner>> + Send + Sync>;

// ============================================================================
// Plugin contract
// ============================================================================

/// Descriptive metadata of a protocol plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub protocols: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Request shape and example payloads for one protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSchema {
    pub protocol: String,
    pub request: Value,
    #[serde(default)]
    pub examples: Vec<Value>,
}

/// Outcome of a request validation hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl RequestValidation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Outcome of a plugin health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
}

/// An externally supplied protocol bundle
#[async_trait]
pub trait ProtocolPlugin: Send + Sync {
    fn metadata(&self) -> PluginMetadata;

    fn schemas(&self) -> Vec<ProtocolSchema> {
        Vec::new()
    }

    /// Filename suffixes this plugin claims, e.g. `(".mqtt.yaml", "mqtt")`
    fn file_extensions(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn create_runner(&self, protocol: &str, options: &RunnerOptions) -> Result<Arc<dyn TestRunner>>;

    fn validate_request(&self, _protocol: &str, _request: &Value) -> RequestValidation {
        RequestValidation::ok()
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            message: "ok".to_string(),
        }
    }
}

/// Constructs a plugin from its configured options
pub type PluginConstructor = Arc<dyn Fn(&Value) -> Result<Arc<dyn ProtocolPlugin>> + Send + Sync>;

/// Plugins a host binary knows how to construct, by name
pub type PluginCatalog = HashMap<String, PluginConstructor>;

struct LoadedPlugin {
    plugin: Arc<dyn ProtocolPlugin>,
    metadata: PluginMetadata,
    protocols: Vec<String>,
}

/// Loaded plugins and the protocols they still serve
#[derive(Default)]
pub struct PluginManager {
    plugins: RwLock<Vec<LoadedPlugin>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin; a plugin with the same name is replaced
    pub fn load(&self, plugin: Arc<dyn ProtocolPlugin>) -> PluginMetadata {
        let metadata = plugin.metadata();
        let mut plugins = self.plugins.write();
        plugins.retain(|p| p.metadata.name != metadata.name);
        plugins.push(LoadedPlugin {
            plugin,
            protocols: metadata.protocols.clone(),
            metadata: metadata.clone(),
        });
        metadata
    }

    /// Plugin serving `protocol`, most recently loaded first
    pub fn resolve(&self, protocol: &str) -> Option<Arc<dyn ProtocolPlugin>> {
        self.plugins
            .read()
            .iter()
            .rev()
            .find(|p| p.protocols.iter().any(|name| name == protocol))
            .map(|p| p.plugin.clone())
    }

    /// Stop serving `protocol`; plugins left with no protocols are dropped
    fn remove_protocol(&self, protocol: &str) -> bool {
        let mut plugins = self.plugins.write();
        let mut removed = false;
        for loaded in plugins.iter_mut() {
            let before = loaded.protocols.len();
            loaded.protocols.retain(|name| name != protocol);
            removed |= loaded.protocols.len() != before;
        }
        plugins.retain(|p| !p.protocols.is_empty());
        removed
    }

    pub fn metadata(&self) -> Vec<PluginMetadata> {
        self.plugins.read().iter().map(|p| p.metadata.clone()).collect()
    }

    fn protocols(&self) -> Vec<(String, String)> {
        self.plugins
            .read()
            .iter()
            .flat_map(|p| {
                p.protocols
                    .iter()
                    .map(|proto| (proto.clone(), p.metadata.name.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn extensions(&self) -> Vec<(String, String)> {
        self.plugins
            .read()
            .iter()
            .flat_map(|p| {
                p.plugin
                    .file_extensions()
                    .into_iter()
                    .filter(|(_, proto)| p.protocols.contains(proto))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Where a protocol registration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolSource {
    Builtin,
    Registered,
    Plugin,
}

/// A supported protocol, for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub name: String,
    pub source: ProtocolSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

/// Request validation hook attached to a registration
pub type RequestValidator = Arc<dyn Fn(&Value) -> RequestValidation + Send + Sync>;

struct ProtocolEntry {
    source: ProtocolSource,
    factory: RunnerFactory,
    extensions: Vec<String>,
    validator: Option<RequestValidator>,
}

/// Process-wide map from protocol name to runner factory
#[derive(Default)]
pub struct ProtocolRegistry {
    entries: RwLock<HashMap<String, ProtocolEntry>>,
    plugins: PluginManager,
}

impl ProtocolRegistry {
    /// Empty registry with no protocols
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in http, graphql, grpc and websocket runners
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::runner::register_builtins(&registry);
        registry
    }

    /// Bind a runner factory to a protocol name. Names of built-in protocols
    /// become permanent; any other name can later be unregistered.
    pub fn register(&self, protocol: &str, factory: RunnerFactory) {
        self.insert(protocol, factory, Vec::new(), None);
    }

    /// Register with filename suffixes and a request validator
    pub fn register_with(
        &self,
        protocol: &str,
        factory: RunnerFactory,
        extensions: Vec<String>,
        validator: Option<RequestValidator>,
    ) {
        self.insert(protocol, factory, extensions, validator);
    }

    fn insert(&self, protocol: &str, factory: RunnerFactory, extensions: Vec<String>, validator: Option<RequestValidator>) {
        let source = if BUILTIN_PROTOCOLS.contains(&protocol) {
            ProtocolSource::Builtin
        } else {
            ProtocolSource::Registered
        };
        debug!("Registering protocol {} ({:?})", protocol, source);
        self.entries.write().insert(
            protocol.to_string(),
            ProtocolEntry {
                source,
                factory,
                extensions,
                validator,
            },
        );
    }

    /// Make a plugin's protocols available
    pub fn load_plugin(&self, plugin: Arc<dyn ProtocolPlugin>) -> PluginMetadata {
        let metadata = self.plugins.load(plugin);
        info!(
            "Loaded plugin {} v{} ({})",
            metadata.name,
            metadata.version,
            metadata.protocols.join(", ")
        );
        metadata
    }

    /// Construct and load the named plugins from `catalog`
    pub fn load_plugins(
        &self,
        names: &[String],
        options: &Map<String, Value>,
        catalog: &PluginCatalog,
    ) -> Result<Vec<PluginMetadata>> {
        let mut loaded = Vec::with_capacity(names.len());
        for name in names {
            let constructor = catalog
                .get(name)
                .ok_or_else(|| Error::Plugin(format!("plugin '{}' is not available", name)))?;
            let plugin_options = options.get(name).cloned().unwrap_or(Value::Null);
            let plugin = constructor(&plugin_options)?;
            loaded.push(self.load_plugin(plugin));
        }
        Ok(loaded)
    }

    /// Remove a protocol. Built-in protocols are rejected.
    pub fn unregister(&self, protocol: &str) -> Result<bool> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(protocol) {
            if entry.source == ProtocolSource::Builtin {
                return Err(Error::BuiltinProtocol(protocol.to_string()));
            }
        }
        let removed_entry = entries.remove(protocol).is_some();
        drop(entries);
        let removed_plugin = self.plugins.remove_protocol(protocol);
        if removed_entry || removed_plugin {
            info!("Unregistered protocol {}", protocol);
        }
        Ok(removed_entry || removed_plugin)
    }

    /// Create a runner for `protocol`
    pub fn create(&self, protocol: &str, options: &RunnerOptions) -> Result<Arc<dyn TestRunner>> {
        let factory = self.entries.read().get(protocol).map(|e| e.factory.clone());
        if let Some(factory) = factory {
            return factory(options);
        }
        if let Some(plugin) = self.plugins.resolve(protocol) {
            return plugin.create_runner(protocol, options);
        }
        Err(Error::UnregisteredProtocol(protocol.to_string()))
    }

    pub fn has_protocol(&self, protocol: &str) -> bool {
        self.entries.read().contains_key(protocol) || self.plugins.resolve(protocol).is_some()
    }

    /// Supported protocol names, sorted
    pub fn list_protocols(&self) -> Vec<String> {
        self.describe_protocols().into_iter().map(|p| p.name).collect()
    }

    /// Supported protocols with their origin, sorted by name
    pub fn describe_protocols(&self) -> Vec<ProtocolInfo> {
        let mut infos: BTreeMap<String, ProtocolInfo> = self
            .entries
            .read()
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    ProtocolInfo {
                        name: name.clone(),
                        source: entry.source,
                        plugin: None,
                    },
                )
            })
            .collect();
        for (name, plugin) in self.plugins.protocols() {
            infos.entry(name.clone()).or_insert(ProtocolInfo {
                name,
                source: ProtocolSource::Plugin,
                plugin: Some(plugin),
            });
        }
        infos.into_values().collect()
    }

    pub fn is_builtin(&self, protocol: &str) -> bool {
        self.entries
            .read()
            .get(protocol)
            .is_some_and(|e| e.source == ProtocolSource::Builtin)
    }

    /// Metadata of loaded plugins
    pub fn plugins(&self) -> Vec<PluginMetadata> {
        self.plugins.metadata()
    }

    /// Schemas published by the plugin serving `protocol`
    pub fn schemas(&self, protocol: &str) -> Vec<ProtocolSchema> {
        self.plugins
            .resolve(protocol)
            .map(|p| {
                p.schemas()
                    .into_iter()
                    .filter(|s| s.protocol == protocol)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Derive the protocol from a filename such as `login.http.tspec`.
    /// Declared extensions are checked first, longest suffix first, then
    /// the generic `<name>.<protocol>.tspec|tsuite[.yaml]` pattern.
    pub fn protocol_from_path(&self, path: &Path) -> Option<String> {
        let file_name = path.file_name()?.to_str()?.to_ascii_lowercase();

        let mut declared: Vec<(String, String)> = self
            .entries
            .read()
            .iter()
            .flat_map(|(name, entry)| {
                entry
                    .extensions
                    .iter()
                    .map(|ext| (ext.to_ascii_lowercase(), name.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        declared.extend(
            self.plugins
                .extensions()
                .into_iter()
                .map(|(ext, proto)| (ext.to_ascii_lowercase(), proto)),
        );
        declared.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        if let Some((_, protocol)) = declared.iter().find(|(ext, _)| file_name.ends_with(ext.as_str())) {
            return Some(protocol.clone());
        }

        suffix_pattern()
            .and_then(|re| re.captures(&file_name))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Run the request validation hook for `protocol`
    pub fn validate_request(&self, protocol: &str, request: &Value) -> RequestValidation {
        let validator = self.entries.read().get(protocol).and_then(|e| e.validator.clone());
        if let Some(validator) = validator {
            return validator(request);
        }
        match self.plugins.resolve(protocol) {
            Some(plugin) => plugin.validate_request(protocol, request),
            None => RequestValidation::ok(),
        }
    }

    /// Health of the plugin serving `protocol`; other registrations are
    /// healthy when present
    pub async fn health_check(&self, protocol: &str) -> HealthStatus {
        if let Some(plugin) = self.plugins.resolve(protocol) {
            return plugin.health_check().await;
        }
        if self.entries.read().contains_key(protocol) {
            HealthStatus {
                healthy: true,
                message: format!("{} runner registered", protocol),
            }
        } else {
            warn!("Health check for unknown protocol {}", protocol);
            HealthStatus {
                healthy: false,
                message: format!("no runner registered for {}", protocol),
            }
        }
    }
}

fn suffix_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\.([a-z0-9_-]+)\.(?:tspec|tsuite)(?:\.ya?ml)?$").ok())
        .as_ref()
}
