use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use plume_llm::{
    DEFAULT_MODEL, GEMINI_OPENAI_ENDPOINT, RIG_GEMINI_PROVIDER_ID, SessionConfig, TransportConfig,
};

pub const SETTINGS_DIRECTORY_NAME: &str = "plume";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
/// `PLUME_API_KEY` etc. override the settings file.
pub const ENV_PREFIX: &str = "PLUME_";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful, energetic, and slightly witty \
     AI assistant. Keep responses concise and engaging. Use formatting like bolding and lists \
     often.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
}

fn default_provider_id() -> String {
    RIG_GEMINI_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    GEMINI_OPENAI_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f64 {
    0.9
}

fn default_top_k() -> u32 {
    40
}

fn default_top_p() -> f64 {
    0.95
}

fn default_system_instruction() -> String {
    DEFAULT_SYSTEM_INSTRUCTION.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            max_tokens: None,
            system_instruction: default_system_instruction(),
        }
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_string()
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().to_string()
        };
        self.model = if self.model.trim().is_empty() {
            default_model()
        } else {
            self.model.trim().to_string()
        };

        self
    }

    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig::new(&self.provider_id, &self.api_key, &self.endpoint)
    }

    pub fn to_session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(&self.model)
            .with_system_instruction(&self.system_instruction)
            .with_temperature(self.temperature)
            .with_top_k(self.top_k)
            .with_top_p(self.top_p);
        if let Some(max_tokens) = self.max_tokens {
            config = config.with_max_tokens(max_tokens);
        }
        config
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to move settings file from {from:?} to {to:?} on `{stage}`: {source}"))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

/// In-memory settings handle backed by one JSON file.
pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".plume"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    /// Persists then swaps, so readers never observe unsaved settings.
    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> Settings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }

        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}
