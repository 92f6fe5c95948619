//! Configuration types
//!
//! Every knob is an environment variable with a documented default. The
//! `from_env` constructors read the process environment once; callers that
//! need different values build the structs directly.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// Which entity backend the facade builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Vector,
    Filesystem,
}

impl BackendKind {
    fn parse(raw: &str) -> BackendKind {
        match raw {
            "filesystem" => BackendKind::Filesystem,
            _ => BackendKind::Vector,
        }
    }
}

/// Top-level Kaizen settings. Env prefix: `KAIZEN_`.
#[derive(Debug, Clone, PartialEq)]
pub struct KaizenSettings {
    pub backend: BackendKind,
    /// Default namespace for tool-protocol calls.
    pub namespace_id: String,
    /// Cosine threshold for tip clustering.
    pub clustering_threshold: f32,
}

impl Default for KaizenSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Vector,
            namespace_id: "kaizen".to_string(),
            clustering_threshold: 0.80,
        }
    }
}

impl KaizenSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend: BackendKind::parse(&env_string("KAIZEN_BACKEND", "vector")),
            namespace_id: env_string("KAIZEN_NAMESPACE_ID", &defaults.namespace_id),
            clustering_threshold: env_opt("KAIZEN_CLUSTERING_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.clustering_threshold),
        }
    }
}

/// Filesystem backend settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FilesystemSettings {
    /// Directory holding one JSON document per namespace.
    pub data_dir: PathBuf,
}

impl Default for FilesystemSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("kaizen_data"),
        }
    }
}

impl FilesystemSettings {
    pub fn from_env() -> Self {
        Self {
            data_dir: PathBuf::from(env_string("KAIZEN_DATA_DIR", "kaizen_data")),
        }
    }
}

/// Vector backend settings: the index endpoint plus the SQLite side-table
/// that holds namespace records.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSettings {
    pub uri: String,
    pub sqlite_path: PathBuf,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            uri: "http://localhost:19530".to_string(),
            sqlite_path: PathBuf::from("entities.sqlite.db"),
        }
    }
}

impl VectorSettings {
    pub fn from_env() -> Self {
        Self {
            uri: env_string("KAIZEN_MILVUS_URI", "http://localhost:19530"),
            sqlite_path: PathBuf::from(env_string("KAIZEN_SQLITE_PATH", "entities.sqlite.db")),
        }
    }
}

/// LLM gateway and embedding settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub tips_model: String,
    pub conflict_resolution_model: String,
    /// Provider tag forwarded to the gateway for capability detection.
    pub custom_llm_provider: Option<String>,
    /// OpenAI-compatible API base for completions and embeddings.
    pub api_base: String,
    pub api_key: String,
    /// Timeout applied to every LLM and embedding call.
    pub timeout: Duration,
    pub embedding_model: String,
    pub embedding_dimensions: i32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            tips_model: "openai/gpt-4o".to_string(),
            conflict_resolution_model: "openai/gpt-4o".to_string(),
            custom_llm_provider: None,
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(120),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 384,
        }
    }
}

impl LlmSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tips_model: env_string("KAIZEN_TIPS_MODEL", &defaults.tips_model),
            conflict_resolution_model: env_string(
                "KAIZEN_CONFLICT_RESOLUTION_MODEL",
                &defaults.conflict_resolution_model,
            ),
            custom_llm_provider: env_opt("KAIZEN_CUSTOM_LLM_PROVIDER"),
            api_base: env_string("KAIZEN_LLM_API_BASE", &defaults.api_base),
            api_key: env_string("KAIZEN_LLM_API_KEY", ""),
            timeout: Duration::from_secs(
                env_opt("KAIZEN_LLM_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(120),
            ),
            embedding_model: env_string("KAIZEN_EMBEDDING_MODEL", &defaults.embedding_model),
            embedding_dimensions: env_opt("KAIZEN_EMBEDDING_DIMENSIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.embedding_dimensions),
        }
    }
}

/// Phoenix trace store settings. Env prefix: `PHOENIX_`.
#[derive(Debug, Clone, PartialEq)]
pub struct PhoenixSettings {
    /// Phoenix server URL.
    pub url: String,
    /// Phoenix project name.
    pub project: String,
}

impl Default for PhoenixSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:6006".to_string(),
            project: "default".to_string(),
        }
    }
}

impl PhoenixSettings {
    pub fn from_env() -> Self {
        Self {
            url: env_string("PHOENIX_URL", "http://localhost:6006"),
            project: env_string("PHOENIX_PROJECT", "default"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_filesystem_and_defaults_to_vector() {
        assert_eq!(BackendKind::parse("filesystem"), BackendKind::Filesystem);
        assert_eq!(BackendKind::parse("vector"), BackendKind::Vector);
        assert_eq!(BackendKind::parse("anything-else"), BackendKind::Vector);
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = KaizenSettings::default();
        assert_eq!(settings.namespace_id, "kaizen");
        assert!((settings.clustering_threshold - 0.80).abs() < f32::EPSILON);

        let llm = LlmSettings::default();
        assert_eq!(llm.tips_model, "openai/gpt-4o");
        assert_eq!(llm.embedding_dimensions, 384);
        assert_eq!(llm.timeout, Duration::from_secs(120));
    }
}
