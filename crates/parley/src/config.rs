use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::connection::SupervisorConfig;
use crate::dispatch::{AddressPolicy, DispatchConfig};
use crate::pipeline::AggregatorConfig;
use crate::runtime::ReplyConfig;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub responder: ResponderConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Optional admin API token. If set, `/api/v1` routes require it as a
    /// bearer token.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            admin_token: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    60
}

// ============================================================================
// TransportConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TransportConfig {
    /// Transport program speaking JSON Lines over stdio.
    #[serde(default = "default_transport_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Where session credentials are persisted.
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            command: default_transport_command(),
            args: Vec::new(),
            session_dir: default_session_dir(),
            ack_timeout_seconds: default_ack_timeout(),
        }
    }
}

impl TransportConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_seconds)
    }
}

fn default_transport_command() -> String {
    "parley-transport".to_string()
}

fn default_session_dir() -> PathBuf {
    PathBuf::from(".parley/session")
}

fn default_ack_timeout() -> u64 {
    30
}

// ============================================================================
// ConnectionConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Start a session as soon as the runtime is up.
    #[serde(default = "default_true")]
    pub auto_init: bool,
    #[serde(default = "default_challenge_window")]
    pub challenge_window_seconds: u64,
    #[serde(default = "default_corrupt_session_restart")]
    pub corrupt_session_restart_ms: u64,
    #[serde(default = "default_manual_restart")]
    pub manual_restart_ms: u64,
    /// How long a send waits for a session to come up.
    #[serde(default = "default_connect_wait")]
    pub connect_wait_seconds: u64,
    #[serde(default = "default_keepalive")]
    pub keepalive_seconds: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auto_init: true,
            challenge_window_seconds: default_challenge_window(),
            corrupt_session_restart_ms: default_corrupt_session_restart(),
            manual_restart_ms: default_manual_restart(),
            connect_wait_seconds: default_connect_wait(),
            keepalive_seconds: default_keepalive(),
        }
    }
}

impl ConnectionConfig {
    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            challenge_window: Duration::from_secs(self.challenge_window_seconds),
            corrupt_session_restart: Duration::from_millis(self.corrupt_session_restart_ms),
            manual_restart: Duration::from_millis(self.manual_restart_ms),
        }
    }

    pub fn connect_wait(&self) -> Duration {
        Duration::from_secs(self.connect_wait_seconds)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_seconds.max(1))
    }
}

fn default_true() -> bool {
    true
}

fn default_challenge_window() -> u64 {
    10 * 60
}

fn default_corrupt_session_restart() -> u64 {
    2000
}

fn default_manual_restart() -> u64 {
    1000
}

fn default_connect_wait() -> u64 {
    10
}

fn default_keepalive() -> u64 {
    30
}

// ============================================================================
// PipelineConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub auto_reply: bool,
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Minimum time between replies to one conversation. 0 disables it.
    #[serde(default = "default_cooldown")]
    pub cooldown_ms: u64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// How long the typing indicator is shown before replying.
    #[serde(default = "default_typing_delay")]
    pub typing_delay_ms: u64,
    #[serde(default = "default_housekeeping")]
    pub housekeeping_minutes: u64,
    /// Sent when the responder fails.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
    /// Sent when a reply could not be delivered.
    #[serde(default = "default_apology_reply")]
    pub apology_reply: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_reply: true,
            debounce_ms: default_debounce(),
            max_batch_size: default_max_batch_size(),
            cooldown_ms: default_cooldown(),
            dedup_capacity: default_dedup_capacity(),
            typing_delay_ms: default_typing_delay(),
            housekeeping_minutes: default_housekeeping(),
            fallback_reply: default_fallback_reply(),
            apology_reply: default_apology_reply(),
        }
    }
}

impl PipelineConfig {
    pub fn aggregator(&self) -> AggregatorConfig {
        AggregatorConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            max_batch_size: self.max_batch_size.max(1),
            cooldown: Duration::from_millis(self.cooldown_ms),
            dedup_capacity: self.dedup_capacity,
        }
    }

    pub fn reply(&self) -> ReplyConfig {
        ReplyConfig {
            typing_delay: Duration::from_millis(self.typing_delay_ms),
            fallback_reply: self.fallback_reply.clone(),
            apology_reply: self.apology_reply.clone(),
        }
    }

    pub fn housekeeping(&self) -> Duration {
        Duration::from_secs(self.housekeeping_minutes.max(1) * 60)
    }
}

fn default_debounce() -> u64 {
    3000
}

fn default_max_batch_size() -> usize {
    5
}

fn default_cooldown() -> u64 {
    0
}

fn default_dedup_capacity() -> usize {
    1000
}

fn default_typing_delay() -> u64 {
    1000
}

fn default_housekeeping() -> u64 {
    30
}

fn default_fallback_reply() -> String {
    crate::runtime::reply::DEFAULT_FALLBACK_REPLY.to_string()
}

fn default_apology_reply() -> String {
    crate::runtime::reply::DEFAULT_APOLOGY_REPLY.to_string()
}

// ============================================================================
// DispatchSettings
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DispatchSettings {
    /// Prefix prepended to short local numbers.
    #[serde(default = "default_region_prefix")]
    pub region_prefix: String,
    /// Numbers with fewer digits than this get the region prefix.
    #[serde(default = "default_local_threshold")]
    pub local_threshold: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            region_prefix: default_region_prefix(),
            local_threshold: default_local_threshold(),
            max_retries: default_max_retries(),
        }
    }
}

impl DispatchSettings {
    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            addresses: AddressPolicy::new(self.region_prefix.clone(), self.local_threshold),
            max_retries: self.max_retries,
        }
    }
}

fn default_region_prefix() -> String {
    crate::dispatch::address::DEFAULT_REGION_PREFIX.to_string()
}

fn default_local_threshold() -> usize {
    crate::dispatch::address::DEFAULT_LOCAL_THRESHOLD
}

fn default_max_retries() -> u32 {
    crate::dispatch::dispatcher::DEFAULT_MAX_RETRIES
}

// ============================================================================
// ResponderConfig
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponderKind {
    /// OpenAI-compatible chat completions.
    #[default]
    Chat,
    /// Remote HTTP backend.
    Backend,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponderConfig {
    #[serde(default)]
    pub kind: ResponderKind,
    #[serde(default)]
    pub chat: ChatResponderConfig,
    #[serde(default)]
    pub backend: BackendResponderConfig,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponderConfig {
    #[serde(default = "default_chat_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Messages kept per conversation (system prompt excluded).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Conversations idle longer than this are forgotten.
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_minutes: u64,
    #[serde(default = "default_responder_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ChatResponderConfig {
    fn default() -> Self {
        Self {
            base_url: default_chat_base_url(),
            model: default_chat_model(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            history_limit: default_history_limit(),
            idle_ttl_minutes: default_idle_ttl(),
            timeout_seconds: default_responder_timeout(),
        }
    }
}

fn default_chat_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_system_prompt() -> String {
    "Eres un asistente virtual amigable y servicial. Responde de forma breve, clara y en el \
     mismo idioma que el usuario."
        .to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    500
}

fn default_history_limit() -> usize {
    20
}

fn default_idle_ttl() -> u64 {
    60
}

fn default_responder_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct BackendResponderConfig {
    #[serde(default = "default_backend_endpoint")]
    pub endpoint: String,
    /// Retried once when the primary endpoint fails. Derived from
    /// `endpoint` when unset.
    #[serde(default)]
    pub fallback_endpoint: Option<String>,
    #[serde(default = "default_responder_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BackendResponderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_backend_endpoint(),
            fallback_endpoint: None,
            timeout_seconds: default_responder_timeout(),
        }
    }
}

fn default_backend_endpoint() -> String {
    "http://localhost:8000/api/chat".to_string()
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert!(config.server.admin_token.is_none());
        assert_eq!(config.transport.session_dir, PathBuf::from(".parley/session"));
        assert!(config.connection.auto_init);
        assert_eq!(config.connection.challenge_window_seconds, 600);
        assert_eq!(config.pipeline.debounce_ms, 3000);
        assert_eq!(config.pipeline.max_batch_size, 5);
        assert_eq!(config.pipeline.cooldown_ms, 0);
        assert_eq!(config.pipeline.aggregator().cooldown, Duration::ZERO);
        assert_eq!(config.dispatch.region_prefix, "51");
        assert_eq!(config.dispatch.local_threshold, 11);
        assert_eq!(config.dispatch.max_retries, 2);
        assert_eq!(config.responder.kind, ResponderKind::Chat);
        assert_eq!(config.responder.chat.history_limit, 20);
    }

    #[tokio::test]
    async fn load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let missing_path = tmp_dir.path().join("missing-config.yaml");
        let config = Config::load(&missing_path).await.unwrap();
        assert_eq!(config.server.port, 3000);
        assert!(config.pipeline.auto_reply);
    }

    #[tokio::test]
    async fn load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_level: debug
server:
  host: "127.0.0.1"
  port: 8080
  admin_token: "secret"
transport:
  command: "node"
  args: ["transport.js"]
  session_dir: "/var/lib/parley"
connection:
  auto_init: false
  keepalive_seconds: 45
pipeline:
  debounce_ms: 1500
  cooldown_ms: 45000
  auto_reply: false
dispatch:
  region_prefix: "34"
responder:
  kind: backend
  backend:
    endpoint: "https://brain.example.com/api/chat"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.admin_token.as_deref(), Some("secret"));
        assert_eq!(config.transport.command, "node");
        assert_eq!(config.transport.args, vec!["transport.js".to_string()]);
        assert_eq!(config.transport.session_dir, PathBuf::from("/var/lib/parley"));
        assert!(!config.connection.auto_init);
        assert_eq!(config.connection.keepalive(), Duration::from_secs(45));
        assert_eq!(
            config.pipeline.aggregator().debounce,
            Duration::from_millis(1500)
        );
        assert_eq!(
            config.pipeline.aggregator().cooldown,
            Duration::from_secs(45)
        );
        assert!(!config.pipeline.auto_reply);
        assert_eq!(config.dispatch.region_prefix, "34");
        assert_eq!(config.responder.kind, ResponderKind::Backend);
        assert_eq!(
            config.responder.backend.endpoint,
            "https://brain.example.com/api/chat"
        );
    }

    #[tokio::test]
    async fn load_partial_yaml_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
pipeline:
  max_batch_size: 3
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.pipeline.max_batch_size, 3);
        assert_eq!(config.pipeline.debounce_ms, 3000); // default
        assert_eq!(config.pipeline.typing_delay_ms, 1000); // default
        assert_eq!(config.server.port, 3000); // default
        assert_eq!(config.connection.connect_wait(), Duration::from_secs(10)); // default
    }

    #[tokio::test]
    async fn load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(file.path()).await;
        assert!(result.is_err());
    }

    #[test]
    fn supervisor_settings() {
        let config = ConnectionConfig::default();
        let supervisor = config.supervisor();
        assert_eq!(supervisor.challenge_window, Duration::from_secs(600));
        assert_eq!(
            supervisor.corrupt_session_restart,
            Duration::from_millis(2000)
        );
        assert_eq!(supervisor.manual_restart, Duration::from_millis(1000));
    }

    #[test]
    fn config_error_display() {
        let io_error = ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "test",
        ));
        assert!(io_error.to_string().contains("failed to read config file"));
    }
}
