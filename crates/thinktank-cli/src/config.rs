//! Registry config loading: embedded defaults, overridden by an
//! on-disk YAML file, overridden by ad-hoc `THINKTANK_*` env vars.

use std::path::PathBuf;

use thinktank_core::registry::{ModelDefinition, ParameterKind, ParameterSpec, ProviderDefinition, RegistryFile};
use thinktank_core::{Registry, RegistryError};

/// The models and providers `thinktank` knows about out of the box,
/// before any config file or env override is applied.
pub fn embedded_defaults() -> RegistryFile {
    RegistryFile {
        providers: vec![
            ProviderDefinition {
                key: "gemini".to_string(),
                base_url: None,
                default_rpm: 60,
                api_key_env: "GEMINI_API_KEY".to_string(),
            },
            ProviderDefinition {
                key: "openai".to_string(),
                base_url: None,
                default_rpm: 60,
                api_key_env: "OPENAI_API_KEY".to_string(),
            },
            ProviderDefinition {
                key: "openrouter".to_string(),
                base_url: None,
                default_rpm: 20,
                api_key_env: "OPENROUTER_API_KEY".to_string(),
            },
        ],
        models: vec![
            ModelDefinition {
                alias: "gemini-pro".to_string(),
                provider: "gemini".to_string(),
                provider_model_id: "gemini-1.5-pro".to_string(),
                context_window: Some(1_000_000),
                max_output_tokens: Some(8192),
                rpm: None,
                parameters: temperature_and_max_tokens_spec("max_output_tokens"),
            },
            ModelDefinition {
                alias: "gemini-flash".to_string(),
                provider: "gemini".to_string(),
                provider_model_id: "gemini-1.5-flash".to_string(),
                context_window: Some(1_000_000),
                max_output_tokens: Some(8192),
                rpm: None,
                parameters: temperature_and_max_tokens_spec("max_output_tokens"),
            },
            ModelDefinition {
                alias: "gpt-4o".to_string(),
                provider: "openai".to_string(),
                provider_model_id: "gpt-4o".to_string(),
                context_window: Some(128_000),
                max_output_tokens: Some(16_384),
                rpm: None,
                parameters: temperature_and_max_tokens_spec("max_tokens"),
            },
            ModelDefinition {
                alias: "gpt-4o-mini".to_string(),
                provider: "openai".to_string(),
                provider_model_id: "gpt-4o-mini".to_string(),
                context_window: Some(128_000),
                max_output_tokens: Some(16_384),
                rpm: None,
                parameters: temperature_and_max_tokens_spec("max_tokens"),
            },
            ModelDefinition {
                alias: "openrouter-claude".to_string(),
                provider: "openrouter".to_string(),
                provider_model_id: "anthropic/claude-3.5-sonnet".to_string(),
                context_window: Some(200_000),
                max_output_tokens: Some(8192),
                rpm: None,
                parameters: temperature_and_max_tokens_spec("max_tokens"),
            },
        ],
    }
}

fn temperature_and_max_tokens_spec(max_tokens_field: &str) -> Vec<ParameterSpec> {
    vec![
        ParameterSpec {
            name: "temperature".to_string(),
            kind: ParameterKind::Number,
            default: Some(serde_json::json!(0.7)),
            min: Some(0.0),
            max: Some(2.0),
        },
        ParameterSpec {
            name: max_tokens_field.to_string(),
            kind: ParameterKind::Integer,
            default: None,
            min: Some(1.0),
            max: None,
        },
    ]
}

/// Search path for the registry config file, in priority order: an
/// explicit `--config` flag, then the platform config directory.
pub fn config_search_paths(explicit: Option<PathBuf>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(path) = explicit {
        paths.push(path);
    }
    if let Some(path) = thinktank_core::registry::default_config_path() {
        paths.push(path);
    }
    paths
}

/// Load the registry, then register every built-in provider factory.
pub fn load_registry(explicit_config: Option<PathBuf>) -> Result<Registry, RegistryError> {
    let paths = config_search_paths(explicit_config);
    let registry = Registry::load(&paths, embedded_defaults())?;
    thinktank_providers::register_builtin_factories(&registry);
    Ok(registry)
}
