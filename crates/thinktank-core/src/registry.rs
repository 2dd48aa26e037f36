//! Model registry (C1)
//!
//! Resolves a short model alias (e.g. `"gemini-pro"`) to a provider, a
//! provider-native model id, a parameter schema, and (via a registered
//! [`ClientFactory`]) a live [`LLMClient`]. Loaded from, in ascending
//! priority: embedded defaults, a YAML config file, then ad-hoc
//! environment variables for a single extra model. The env fallback is
//! only ever consulted when the config file is absent or unparseable.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client::LLMClient;
use crate::error::{RegistryError, Result};

/// Declares one accepted generation parameter for a model: its JSON
/// type and, for numeric types, an inclusive range used by
/// [`Registry::validate_parameter`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    pub default: Option<serde_json::Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Number,
    Integer,
    String,
    Boolean,
}

/// Static metadata about a provider (the thing that owns a family of
/// models), independent of any one model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderDefinition {
    pub key: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub default_rpm: u32,
    /// The name of the environment variable that carries this
    /// provider's API key. A config file can override which variable a
    /// built-in provider reads its key from.
    pub api_key_env: String,
}

/// One entry in the registry: a user-facing alias bound to a provider
/// and that provider's own model identifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub alias: String,
    pub provider: String,
    pub provider_model_id: String,
    pub context_window: Option<u32>,
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub rpm: Option<u32>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

/// On-disk / embedded registry shape, deserialized directly from YAML.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub providers: Vec<ProviderDefinition>,
    #[serde(default)]
    pub models: Vec<ModelDefinition>,
}

/// Builds a live [`LLMClient`] for models of one provider. Registered
/// into the [`Registry`] by `thinktank-cli` at startup, keeping
/// `thinktank-core` free of any concrete HTTP client dependency.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    fn provider_key(&self) -> &str;

    fn build(&self, model: &ModelDefinition, provider: &ProviderDefinition) -> Result<Arc<dyn LLMClient>>;
}

/// Where the registry's data ultimately came from, reported to the
/// audit trail at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrySource {
    File,
    Env,
    Defaults,
}

/// The resolved registry: providers, models, and the factories that
/// turn a model definition into a live client.
pub struct Registry {
    providers: HashMap<String, ProviderDefinition>,
    models: HashMap<String, ModelDefinition>,
    factories: RwLock<HashMap<String, Arc<dyn ClientFactory>>>,
    source: RegistrySource,
}

static GLOBAL: OnceLock<RwLock<Option<Arc<Registry>>>> = OnceLock::new();

fn global_slot() -> &'static RwLock<Option<Arc<Registry>>> {
    GLOBAL.get_or_init(|| RwLock::new(None))
}

impl Registry {
    fn build(file: RegistryFile, source: RegistrySource) -> Result<Self> {
        validate_registry_file(&file)?;
        let providers = file.providers.into_iter().map(|p| (p.key.clone(), p)).collect();
        let models = file.models.into_iter().map(|m| (m.alias.clone(), m)).collect();
        Ok(Self {
            providers,
            models,
            factories: RwLock::new(HashMap::new()),
            source,
        })
    }

    fn from_file(file: RegistryFile) -> Result<Self> {
        Self::build(file, RegistrySource::Defaults)
    }

    /// Load the registry from, in ascending priority: `embedded`
    /// defaults, the first existing path in `config_paths`, then a
    /// single ad-hoc model described by environment variables.
    ///
    /// The environment fallback is only ever applied when no config
    /// file was found, or the one found failed to parse — a
    /// successfully loaded file is the final word.
    pub fn load(config_paths: &[PathBuf], embedded: RegistryFile) -> Result<Self> {
        let mut merged = embedded;
        let mut source = RegistrySource::Defaults;
        let mut file_loaded = false;

        for path in config_paths {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                match serde_yaml::from_str::<RegistryFile>(&text) {
                    Ok(file) => {
                        merge_registry_file(&mut merged, file);
                        file_loaded = true;
                        source = RegistrySource::File;
                        info!(path = %path.display(), "loaded registry config from file");
                    }
                    Err(e) => {
                        info!(
                            path = %path.display(),
                            error = %e,
                            "registry config file is malformed, falling back to environment and embedded defaults"
                        );
                    }
                }
                break;
            }
        }

        if !file_loaded {
            if let Some(env_model) = model_from_env() {
                merge_registry_file(
                    &mut merged,
                    RegistryFile {
                        providers: vec![],
                        models: vec![env_model],
                    },
                );
                source = RegistrySource::Env;
                info!("applied an ad-hoc model from THINKTANK_* environment variables");
            } else {
                info!("no registry config file found; using embedded defaults");
            }
        }

        let registry = Self::build(merged, source)?;
        if registry.models.is_empty() {
            return Err(RegistryError::RegistryEmpty);
        }
        Ok(registry)
    }

    /// Where this registry's data ultimately came from.
    pub fn source(&self) -> RegistrySource {
        self.source
    }

    /// Register (or replace) the client factory for a provider key.
    pub fn register_factory(&self, factory: Arc<dyn ClientFactory>) {
        self.factories
            .write()
            .expect("registry factories lock poisoned")
            .insert(factory.provider_key().to_string(), factory);
    }

    pub fn resolve(&self, alias: &str) -> Result<&ModelDefinition> {
        self.models
            .get(alias)
            .ok_or_else(|| RegistryError::UnknownModel(alias.to_string()))
    }

    pub fn provider_for(&self, model: &ModelDefinition) -> Result<&ProviderDefinition> {
        self.providers
            .get(&model.provider)
            .ok_or_else(|| RegistryError::ProviderUnavailable(model.provider.clone()))
    }

    /// Resolve `alias` and build a live client for it via the
    /// registered factory for its provider.
    pub fn create_client(&self, alias: &str) -> Result<Arc<dyn LLMClient>> {
        let model = self.resolve(alias)?;
        let provider = self.provider_for(model)?;
        let factories = self.factories.read().expect("registry factories lock poisoned");
        let factory = factories
            .get(&provider.key)
            .ok_or_else(|| RegistryError::ProviderUnavailable(provider.key.clone()))?;
        factory.build(model, provider)
    }

    /// The default generation parameters for a model, as declared by
    /// its `ParameterSpec` entries. Callers are expected to degrade to
    /// an empty parameter map (and audit the degradation) rather than
    /// abort the model's run when this fails.
    pub fn default_parameters(&self, alias: &str) -> Result<HashMap<String, serde_json::Value>> {
        let model = self.resolve(alias)?;
        Ok(model
            .parameters
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.name.clone(), d)))
            .collect())
    }

    /// Validate a single override parameter against its declared spec.
    /// Unknown parameter names are rejected; this keeps typos from
    /// silently reaching a provider as ignored extra fields.
    pub fn validate_parameter(&self, alias: &str, name: &str, value: &serde_json::Value) -> Result<()> {
        let model = self.resolve(alias)?;
        let spec = model
            .parameters
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| RegistryError::InvalidParameter {
                model: alias.to_string(),
                name: name.to_string(),
                message: "not a recognized parameter for this model".to_string(),
            })?;

        let type_ok = match spec.kind {
            ParameterKind::Number | ParameterKind::Integer => value.is_number(),
            ParameterKind::String => value.is_string(),
            ParameterKind::Boolean => value.is_boolean(),
        };
        if !type_ok {
            return Err(RegistryError::InvalidParameter {
                model: alias.to_string(),
                name: name.to_string(),
                message: format!("expected a {:?} value", spec.kind),
            });
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = spec.min {
                if n < min {
                    return Err(RegistryError::InvalidParameter {
                        model: alias.to_string(),
                        name: name.to_string(),
                        message: format!("{n} is below the minimum of {min}"),
                    });
                }
            }
            if let Some(max) = spec.max {
                if n > max {
                    return Err(RegistryError::InvalidParameter {
                        model: alias.to_string(),
                        name: name.to_string(),
                        message: format!("{n} is above the maximum of {max}"),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDefinition> {
        self.models.values()
    }

    /// The currently installed process-wide registry, if one has been set.
    pub fn global() -> Option<Arc<Registry>> {
        global_slot().read().expect("global registry lock poisoned").clone()
    }

    /// Install `registry` as the process-wide instance.
    pub fn set_global(registry: Arc<Registry>) {
        *global_slot().write().expect("global registry lock poisoned") = Some(registry);
    }
}

/// Validation invariants checked once at load time, so a bad config
/// file fails fast with a clear message instead of surfacing as a
/// confusing `ProviderUnavailable`/`UnknownModel` error deep inside a run.
fn validate_registry_file(file: &RegistryFile) -> Result<()> {
    let mut provider_keys = HashSet::new();
    for provider in &file.providers {
        if !provider_keys.insert(provider.key.as_str()) {
            return Err(RegistryError::Config(format!("duplicate provider key: {}", provider.key)));
        }
    }

    let mut model_aliases = HashSet::new();
    for model in &file.models {
        if !model_aliases.insert(model.alias.as_str()) {
            return Err(RegistryError::Config(format!("duplicate model alias: {}", model.alias)));
        }
        if model.provider_model_id.trim().is_empty() {
            return Err(RegistryError::Config(format!(
                "model '{}' has an empty provider_model_id",
                model.alias
            )));
        }
        if !provider_keys.contains(model.provider.as_str()) {
            return Err(RegistryError::Config(format!(
                "model '{}' references unknown provider '{}'",
                model.alias, model.provider
            )));
        }
        for spec in &model.parameters {
            if let (Some(min), Some(max)) = (spec.min, spec.max) {
                if min > max {
                    return Err(RegistryError::Config(format!(
                        "model '{}' parameter '{}' has min {min} greater than max {max}",
                        model.alias, spec.name
                    )));
                }
            }
        }
    }

    Ok(())
}

fn merge_registry_file(base: &mut RegistryFile, overlay: RegistryFile) {
    for provider in overlay.providers {
        if let Some(existing) = base.providers.iter_mut().find(|p| p.key == provider.key) {
            *existing = provider;
        } else {
            base.providers.push(provider);
        }
    }
    for model in overlay.models {
        if let Some(existing) = base.models.iter_mut().find(|m| m.alias == model.alias) {
            *existing = model;
        } else {
            base.models.push(model);
        }
    }
}

/// Build a single ad-hoc `ModelDefinition` from `THINKTANK_*` env vars,
/// for use without any config file at all.
fn model_from_env() -> Option<ModelDefinition> {
    model_from_lookup(|key| std::env::var(key).ok())
}

/// Testable core of [`model_from_env`], parameterised over the
/// variable lookup so tests don't need to mutate process-wide state.
fn model_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<ModelDefinition> {
    let alias = lookup("THINKTANK_MODEL")?;
    let provider = lookup("THINKTANK_PROVIDER")?;
    let provider_model_id = lookup("THINKTANK_PROVIDER_MODEL_ID").unwrap_or_else(|| alias.clone());
    let context_window = lookup("THINKTANK_CONTEXT_WINDOW").and_then(|v| v.parse().ok());
    let max_output_tokens = lookup("THINKTANK_MAX_OUTPUT_TOKENS").and_then(|v| v.parse().ok());

    Some(ModelDefinition {
        alias,
        provider,
        provider_model_id,
        context_window,
        max_output_tokens,
        rpm: None,
        parameters: vec![],
    })
}

/// Resolve the registry config file search path: `<config_dir>/thinktank/models.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "thinktank")
        .map(|dirs| dirs.config_dir().join("models.yaml"))
}

pub fn path_exists(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> RegistryFile {
        RegistryFile {
            providers: vec![ProviderDefinition {
                key: "gemini".to_string(),
                base_url: None,
                default_rpm: 60,
                api_key_env: "GEMINI_API_KEY".to_string(),
            }],
            models: vec![ModelDefinition {
                alias: "gemini-pro".to_string(),
                provider: "gemini".to_string(),
                provider_model_id: "gemini-1.5-pro".to_string(),
                context_window: Some(1_000_000),
                max_output_tokens: Some(8192),
                rpm: None,
                parameters: vec![ParameterSpec {
                    name: "temperature".to_string(),
                    kind: ParameterKind::Number,
                    default: Some(serde_json::json!(0.7)),
                    min: Some(0.0),
                    max: Some(2.0),
                }],
            }],
        }
    }

    #[test]
    fn resolve_finds_known_alias_and_rejects_unknown() {
        let registry = Registry::from_file(sample_file()).unwrap();
        assert!(registry.resolve("gemini-pro").is_ok());
        assert!(matches!(
            registry.resolve("nope"),
            Err(RegistryError::UnknownModel(_))
        ));
    }

    #[test]
    fn validate_parameter_enforces_range_and_type() {
        let registry = Registry::from_file(sample_file()).unwrap();
        assert!(registry
            .validate_parameter("gemini-pro", "temperature", &serde_json::json!(1.0))
            .is_ok());
        assert!(registry
            .validate_parameter("gemini-pro", "temperature", &serde_json::json!(5.0))
            .is_err());
        assert!(registry
            .validate_parameter("gemini-pro", "temperature", &serde_json::json!("hot"))
            .is_err());
        assert!(registry
            .validate_parameter("gemini-pro", "unknown_param", &serde_json::json!(1))
            .is_err());
    }

    #[test]
    fn default_parameters_collects_declared_defaults() {
        let registry = Registry::from_file(sample_file()).unwrap();
        let defaults = registry.default_parameters("gemini-pro").unwrap();
        assert_eq!(defaults.get("temperature"), Some(&serde_json::json!(0.7)));
    }

    #[test]
    fn merge_overlay_replaces_same_alias_and_appends_new() {
        let mut base = sample_file();
        let overlay = RegistryFile {
            providers: vec![],
            models: vec![ModelDefinition {
                alias: "gemini-pro".to_string(),
                provider: "gemini".to_string(),
                provider_model_id: "gemini-1.5-pro-002".to_string(),
                context_window: Some(2_000_000),
                max_output_tokens: Some(8192),
                rpm: None,
                parameters: vec![],
            }],
        };
        merge_registry_file(&mut base, overlay);
        assert_eq!(base.models.len(), 1);
        assert_eq!(base.models[0].provider_model_id, "gemini-1.5-pro-002");
    }

    #[test]
    fn empty_registry_after_merge_is_an_error() {
        let empty = RegistryFile::default();
        assert!(matches!(
            Registry::load(&[], empty),
            Err(RegistryError::RegistryEmpty)
        ));
    }

    #[test]
    fn duplicate_provider_key_is_rejected() {
        let mut file = sample_file();
        let dup = file.providers[0].clone();
        file.providers.push(dup);
        assert!(matches!(Registry::from_file(file), Err(RegistryError::Config(_))));
    }

    #[test]
    fn duplicate_model_alias_is_rejected() {
        let mut file = sample_file();
        let dup = file.models[0].clone();
        file.models.push(dup);
        assert!(matches!(Registry::from_file(file), Err(RegistryError::Config(_))));
    }

    #[test]
    fn empty_provider_model_id_is_rejected() {
        let mut file = sample_file();
        file.models[0].provider_model_id = String::new();
        assert!(matches!(Registry::from_file(file), Err(RegistryError::Config(_))));
    }

    #[test]
    fn dangling_provider_reference_is_rejected_at_load() {
        let mut file = sample_file();
        file.models[0].provider = "no-such-provider".to_string();
        assert!(matches!(Registry::from_file(file), Err(RegistryError::Config(_))));
    }

    #[test]
    fn inverted_parameter_range_is_rejected() {
        let mut file = sample_file();
        file.models[0].parameters[0].min = Some(2.0);
        file.models[0].parameters[0].max = Some(0.0);
        assert!(matches!(Registry::from_file(file), Err(RegistryError::Config(_))));
    }

    #[test]
    fn malformed_config_file_falls_back_to_defaults_instead_of_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.yaml");
        std::fs::write(&path, "not: [valid, yaml: structure").unwrap();
        let registry = Registry::load(&[path], sample_file()).unwrap();
        assert_eq!(registry.source(), RegistrySource::Defaults);
        assert!(registry.resolve("gemini-pro").is_ok());
    }

    #[test]
    fn model_from_lookup_requires_both_alias_and_provider() {
        let env: HashMap<&str, &str> = [("THINKTANK_MODEL", "env-model")].into_iter().collect();
        assert!(model_from_lookup(|k| env.get(k).map(|v| v.to_string())).is_none());

        let env: HashMap<&str, &str> = [("THINKTANK_MODEL", "env-model"), ("THINKTANK_PROVIDER", "gemini")]
            .into_iter()
            .collect();
        let model = model_from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(model.alias, "env-model");
        assert_eq!(model.provider_model_id, "env-model");
    }

    #[test]
    fn env_fallback_is_skipped_when_a_valid_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.yaml");
        std::fs::write(&path, serde_yaml::to_string(&sample_file()).unwrap()).unwrap();

        let registry = Registry::load(&[path], RegistryFile::default()).unwrap();
        assert_eq!(registry.source(), RegistrySource::File);
    }
}
