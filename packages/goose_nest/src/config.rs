use anyhow::{Context, Result, bail};
use goose_chat::ContentRules;
use goose_chat::types::{DEFAULT_CONFIRM_MESSAGE, DEFAULT_MEDIA_PREFIX};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [session]
//                    email = "buyer@example.com"
//
//   env var:         NEST_SESSION__EMAIL=buyer@example.com   (double underscore = nesting)

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub api: ApiFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Backend endpoints (lives under `[api]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_base_url: default_ws_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Who we are (lives under `[session]`). The token is the JWT issued at login.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Message content conventions (lives under `[chat]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    #[serde(default = "default_confirm_message")]
    pub confirm_message: String,
    #[serde(default = "default_media_url_prefix")]
    pub media_url_prefix: String,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            confirm_message: default_confirm_message(),
            media_url_prefix: default_media_url_prefix(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_ws_base_url() -> String {
    "ws://localhost:8080".to_string()
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_confirm_message() -> String {
    DEFAULT_CONFIRM_MESSAGE.to_string()
}
fn default_media_url_prefix() -> String {
    DEFAULT_MEDIA_PREFIX.to_string()
}

/// Build a figment that layers: defaults → config.toml → NEST_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `NEST_API__BASE_URL=https://api.example.com`  →  `api.base_url`
///   `NEST_SESSION__TOKEN=...`  →  `session.token`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("NEST_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// Everything needed to talk to the backend as one member.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub ws_base_url: String,
    pub timeout: Duration,
    pub email: String,
    pub token: String,
    pub rules: ContentRules,
}

impl ClientConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self> {
        let email = fc
            .session
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .context("No session email configured (set [session] email or NEST_SESSION__EMAIL)")?;
        if !email.contains('@') {
            bail!("Session email {:?} is not an email address", email);
        }
        let token = fc
            .session
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .context("No session token configured (set [session] token or NEST_SESSION__TOKEN)")?;
        if fc.api.timeout_secs == 0 {
            bail!("api.timeout_secs must be greater than zero");
        }

        Ok(Self {
            base_url: fc.api.base_url.clone(),
            ws_base_url: fc.api.ws_base_url.clone(),
            timeout: Duration::from_secs(fc.api.timeout_secs),
            email: email.to_string(),
            token: token.to_string(),
            rules: ContentRules {
                media_prefix: fc.chat.media_url_prefix.clone(),
                confirm_message: fc.chat.confirm_message.clone(),
            },
        })
    }
}

// =============================================================================
// Directory layout (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct NestConfig {
    pub data_dir: PathBuf,
}

impl NestConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".goosenest"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;
        debug!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    /// Load and validate the layered configuration.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let fc: FileConfig = load_config(&self.data_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {:?}", self.config_toml_path()))?;
        ClientConfig::from_file(&fc)
    }
}
