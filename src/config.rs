use crate::store::StorageBackend;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_TITLE: &str = "Бизнес-требования";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub provider: ProviderConfig,
    pub confluence: ConfluenceConfig,
    pub document: DocumentConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: Option<String>,
    pub workers: Option<usize>,
    /// Directory with a built frontend, served at `/`.
    pub static_path: Option<String>,
    pub frontend_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            log_level: None,
            workers: None,
            static_path: None,
            frontend_origin: "*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_path: "brd.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    #[serde(alias = "open_ai")]
    OpenAi,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Left empty, the kind follows whichever API key is present.
    pub kind: Option<ProviderKind>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: None,
            api_key: None,
            model: None,
            base_url: None,
            timeout_secs: 60,
            retries: 2,
        }
    }
}

impl ProviderConfig {
    pub fn resolved_kind(&self) -> ProviderKind {
        match (self.kind, self.api_key.as_deref().map(str::trim)) {
            (Some(kind), _) => kind,
            (None, Some(key)) if !key.is_empty() => ProviderKind::Gemini,
            _ => ProviderKind::None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfluenceConfig {
    pub url: Option<String>,
    pub email: Option<String>,
    pub api_token: Option<String>,
    pub space_key: Option<String>,
    pub parent_page_id: Option<String>,
}

impl ConfluenceConfig {
    pub fn is_configured(&self) -> bool {
        [&self.url, &self.email, &self.api_token, &self.space_key]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    pub default_title: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            default_title: DEFAULT_TITLE.to_string(),
        }
    }
}

impl Config {
    /// Reads the YAML file when present, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content =
                fs::read_to_string(path).with_context(|| format!("reading config file '{}'", path.display()))?;
            Self::from_yaml(&content).with_context(|| format!("parsing config file '{}'", path.display()))?
        } else {
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = var("DATABASE_PATH") {
            self.storage.database_path = path;
        }
        if let Some(origin) = var("FRONTEND_ORIGIN") {
            self.server.frontend_origin = origin;
        }

        let kind = self.provider.kind;
        if let Some(key) = var("GEMINI_API_KEY").filter(|_| matches!(kind, None | Some(ProviderKind::Gemini))) {
            self.provider.kind = Some(ProviderKind::Gemini);
            self.provider.api_key = Some(key);
        } else if let Some(key) = var("OPENAI_API_KEY").filter(|_| matches!(kind, None | Some(ProviderKind::OpenAi))) {
            self.provider.kind = Some(ProviderKind::OpenAi);
            self.provider.api_key = Some(key);
        }

        let confluence = &mut self.confluence;
        for (key, slot) in [
            ("CONFLUENCE_URL", &mut confluence.url),
            ("CONFLUENCE_EMAIL", &mut confluence.email),
            ("CONFLUENCE_API_TOKEN", &mut confluence.api_token),
            ("CONFLUENCE_SPACE_KEY", &mut confluence.space_key),
            ("CONFLUENCE_PARENT_PAGE_ID", &mut confluence.parent_page_id),
        ] {
            if let Some(value) = var(key) {
                *slot = Some(value);
            }
        }
    }
}
