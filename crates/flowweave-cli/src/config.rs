//! `flowweave.toml` loading and the resolution chain:
//! CLI flag > env var > config file > default.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use flowweave_core::FallbackPolicy;
use flowweave_llm::pipeline::{
    DEFAULT_MAX_QUESTIONS, ExtractOptions, GenerateOptions, PipelineOptions,
};
use flowweave_llm::{DEFAULT_TIMEOUT, LlmConfig};

pub const DEFAULT_CONFIG_FILE: &str = "flowweave.toml";

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "FLOWWEAVE_BASE_URL";
pub const MODEL_ENV: &str = "FLOWWEAVE_MODEL";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub llm: LlmSection,
    pub clarify: ClarifySection,
    pub generate: GenerateSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmSection {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClarifySection {
    pub max_questions: usize,
}

impl Default for ClarifySection {
    fn default() -> Self {
        Self {
            max_questions: DEFAULT_MAX_QUESTIONS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerateSection {
    /// Accept edge-less diagrams that still declare a direction and nodes.
    pub lenient_fallback: bool,
    pub repair_attempts: usize,
}

// -----------------------------------------------------------------------
// Read
// -----------------------------------------------------------------------

/// Load and parse the config file. A missing file yields defaults unless
/// `required` is set (the path was given explicitly).
pub fn load_config(path: &Path, required: bool) -> Result<ConfigFile> {
    if !required && !path.exists() {
        return Ok(ConfigFile::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml_edit::de::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct FlowweaveConfig {
    pub llm: LlmConfig,
    pub pipeline: PipelineOptions,
}

impl FlowweaveConfig {
    /// `env` looks up an environment variable; blank values count as unset.
    pub fn resolve(
        cli: &CliOverrides,
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let defaults = LlmConfig::default();

        let base_url = cli
            .base_url
            .clone()
            .or_else(|| env(BASE_URL_ENV))
            .or(file.llm.base_url)
            .unwrap_or(defaults.base_url);
        let model = cli
            .model
            .clone()
            .or_else(|| env(MODEL_ENV))
            .or(file.llm.model)
            .unwrap_or(defaults.model);
        let api_key = env(API_KEY_ENV).or(file.llm.api_key);
        let timeout = file
            .llm
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let fallback = if file.generate.lenient_fallback {
            FallbackPolicy::Lenient
        } else {
            FallbackPolicy::Strict
        };

        Self {
            llm: LlmConfig {
                base_url,
                api_key,
                model,
                max_tokens: file.llm.max_tokens,
                timeout,
                ..defaults
            },
            pipeline: PipelineOptions {
                extract: ExtractOptions {
                    max_questions: file.clarify.max_questions,
                },
                generate: GenerateOptions {
                    fallback,
                    repair_attempts: file.generate.repair_attempts,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), content).unwrap();
        file
    }

    #[test]
    fn missing_optional_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join(DEFAULT_CONFIG_FILE), false).unwrap();
        assert_eq!(config.clarify.max_questions, 5);
        assert!(!config.generate.lenient_fallback);
        assert_eq!(config.generate.repair_attempts, 0);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("nope.toml"), true).is_err());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = write_config(
            r#"
[llm]
model = "gpt-4o"
timeout_secs = 30

[generate]
repair_attempts = 1
"#,
        );
        let config = load_config(file.path(), true).unwrap();
        assert_eq!(config.llm.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.llm.timeout_secs, Some(30));
        assert_eq!(config.generate.repair_attempts, 1);
        assert_eq!(config.clarify.max_questions, 5);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = write_config("[llm\nmodel = ");
        let err = load_config(file.path(), true).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("[generate]\nlenient = true\n");
        assert!(load_config(file.path(), true).is_err());
    }

    #[test]
    fn defaults_without_any_source() {
        let resolved = FlowweaveConfig::resolve(&CliOverrides::default(), ConfigFile::default(), no_env);
        assert_eq!(resolved.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(resolved.llm.model, "gpt-4");
        assert_eq!(resolved.llm.api_key, None);
        assert_eq!(resolved.llm.timeout, Duration::from_secs(60));
        assert_eq!(resolved.pipeline.generate.fallback, FallbackPolicy::Strict);
    }

    #[test]
    fn flag_beats_env_beats_file() {
        let file = || ConfigFile {
            llm: LlmSection {
                model: Some("file-model".into()),
                base_url: Some("http://file".into()),
                api_key: Some("file-key".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let env: HashMap<&str, &str> = [
            (MODEL_ENV, "env-model"),
            (BASE_URL_ENV, "http://env"),
            (API_KEY_ENV, "env-key"),
        ]
        .into_iter()
        .collect();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());

        let cli = CliOverrides {
            model: Some("cli-model".into()),
            base_url: None,
        };
        let resolved = FlowweaveConfig::resolve(&cli, file(), lookup);
        assert_eq!(resolved.llm.model, "cli-model");
        assert_eq!(resolved.llm.base_url, "http://env");
        assert_eq!(resolved.llm.api_key.as_deref(), Some("env-key"));

        let resolved = FlowweaveConfig::resolve(&CliOverrides::default(), file(), no_env);
        assert_eq!(resolved.llm.model, "file-model");
        assert_eq!(resolved.llm.api_key.as_deref(), Some("file-key"));
    }

    #[test]
    fn blank_env_value_is_ignored() {
        let file = ConfigFile {
            llm: LlmSection {
                api_key: Some("file-key".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let resolved = FlowweaveConfig::resolve(&CliOverrides::default(), file, |_| {
            Some("  ".to_string())
        });
        assert_eq!(resolved.llm.api_key.as_deref(), Some("file-key"));
    }

    #[test]
    fn generate_section_maps_to_options() {
        let file = ConfigFile {
            clarify: ClarifySection { max_questions: 2 },
            generate: GenerateSection {
                lenient_fallback: true,
                repair_attempts: 3,
            },
            ..Default::default()
        };
        let resolved = FlowweaveConfig::resolve(&CliOverrides::default(), file, no_env);
        assert_eq!(resolved.pipeline.extract.max_questions, 2);
        assert_eq!(resolved.pipeline.generate.fallback, FallbackPolicy::Lenient);
        assert_eq!(resolved.pipeline.generate.repair_attempts, 3);
    }
}
