//! # Configuration Management
//!
//! This module loads the gateway configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with the APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between Rust structs and TOML/JSON/environment data
//! - **derive macros**: Generate Debug, Clone, Serialize and Deserialize impls
//! - **Result<T, E>**: Loading and validation can fail, and callers must handle it
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (HOST, PORT, JWT_SECRET, SARVAM_API_KEY, AI_API_KEY)
//! 2. Environment variables (APP_SERVER__PORT, APP_STT__FLUSH_TIMEOUT_MS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration.
///
/// ## Why separate config structs:
/// Each collaborator of the gateway (speech-to-text provider, generative model,
/// credential verifier) gets its own section so deployments can override one
/// concern without touching the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub interview: InterviewConfig,
    pub performance: PerformanceConfig,
}

/// Server bind settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Candidate credential settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to verify candidate tokens
    pub jwt_secret: String,
    /// Cookie carrying the token on the websocket handshake
    pub cookie_name: String,
}

/// Streaming speech-to-text provider settings.
///
/// ## Fields:
/// - `endpoint`: WebSocket URL of the provider's streaming endpoint
/// - `api_key`: Subscription key sent as the `Api-Subscription-Key` header
/// - `default_*`: Values used when the client's start signal omits them
/// - `flush_timeout_ms`: How long to wait for the provider after a flush before
///   the upstream connection is closed regardless
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    pub endpoint: String,
    pub api_key: String,
    pub default_language_code: String,
    pub default_model: String,
    pub default_sample_rate: String,
    pub flush_timeout_ms: u64,
}

/// Generative-text service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the generateContent API
    pub endpoint: String,
    pub api_key: String,
    /// Model answering interview turns (small and fast)
    pub turn_model: String,
    /// Model scoring the finished interview
    pub feedback_model: String,
    pub turn_temperature: f32,
    pub turn_max_output_tokens: u32,
    pub request_timeout_secs: u64,
}

/// Interview session timing and caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewConfig {
    /// Used when the interview record has no (or an unparsable) duration
    pub default_duration_minutes: u32,
    /// Expiry of the cached start/end window
    pub timing_ttl_secs: u64,
    /// Expiry of the cached interview configuration
    pub config_cache_ttl_secs: u64,
}

/// Connection limits and liveness checks.
///
/// ## Tuning guidelines:
/// - Every connection may hold one upstream speech-to-text socket, so the
///   connection limit also bounds upstream sockets.
/// - `heartbeat_interval_secs` must be shorter than `client_timeout_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_connections: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// Sections read once at startup.
pub const FIXED_AT_STARTUP: &[&str] = &["server", "auth", "llm", "interview"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            auth: AuthConfig {
                jwt_secret: String::new(),
                cookie_name: "usertoken".to_string(),
            },
            stt: SttConfig {
                endpoint: "wss://api.sarvam.ai/speech-to-text/ws".to_string(),
                api_key: String::new(),
                default_language_code: "en-IN".to_string(),
                default_model: "saarika:v2.5".to_string(),
                default_sample_rate: "16000".to_string(),
                flush_timeout_ms: 3000,
            },
            llm: LlmConfig {
                endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                api_key: String::new(),
                turn_model: "gemini-2.0-flash-lite".to_string(),
                feedback_model: "gemini-2.0-flash".to_string(),
                turn_temperature: 0.4,
                turn_max_output_tokens: 100,
                request_timeout_secs: 60,
            },
            interview: InterviewConfig {
                default_duration_minutes: 10,
                timing_ttl_secs: 3600,
                config_cache_ttl_secs: 3600,
            },
            performance: PerformanceConfig {
                max_concurrent_connections: 200,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_STT__FLUSH_TIMEOUT_MS=5000`: Wait longer for the final transcript
    /// - `APP_LLM__TURN_MODEL=gemini-2.0-flash`: Use a larger turn model
    /// - `PORT=3000`: Special case for deployment platforms
    /// - `SARVAM_API_KEY`, `AI_API_KEY`, `JWT_SECRET`: Secrets kept out of files
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Variables used by deployment platforms and secret managers
        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("JWT_SECRET", "auth.jwt_secret"),
            ("SARVAM_API_KEY", "stt.api_key"),
            ("AI_API_KEY", "llm.api_key"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - At least one connection is allowed
    /// - The flush timeout is not 0 (a zero timeout would close the upstream
    ///   before the provider can return the final transcript)
    /// - The heartbeat fires more often than the client timeout
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_connections == 0 {
            return Err(anyhow::anyhow!("Max concurrent connections must be greater than 0"));
        }

        if self.stt.flush_timeout_ms == 0 {
            return Err(anyhow::anyhow!("STT flush timeout must be greater than 0"));
        }

        if self.performance.heartbeat_interval_secs == 0
            || self.performance.heartbeat_interval_secs >= self.performance.client_timeout_secs
        {
            return Err(anyhow::anyhow!(
                "Heartbeat interval must be non-zero and shorter than the client timeout"
            ));
        }

        if self.interview.default_duration_minutes == 0 {
            return Err(anyhow::anyhow!("Default interview duration must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (runtime updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed, for example
    /// `{"stt": {"flush_timeout_ms": 5000}}`. Changes apply to connections
    /// opened afterwards.
    ///
    /// ## Fixed at startup:
    /// The listener, secrets, model clients and interview defaults are built
    /// once when the server starts. An update naming any of
    /// [`FIXED_AT_STARTUP`] is refused instead of being echoed back unused.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(section) = FIXED_AT_STARTUP
            .iter()
            .find(|section| partial_config.get(**section).is_some())
        {
            return Err(anyhow::anyhow!(
                "'{}' settings are fixed at startup and cannot be changed at runtime",
                section
            ));
        }

        if let Some(stt) = partial_config.get("stt") {
            if let Some(language) = stt.get("default_language_code").and_then(|v| v.as_str()) {
                self.stt.default_language_code = language.to_string();
            }
            if let Some(model) = stt.get("default_model").and_then(|v| v.as_str()) {
                self.stt.default_model = model.to_string();
            }
            if let Some(timeout) = stt.get("flush_timeout_ms").and_then(|v| v.as_u64()) {
                self.stt.flush_timeout_ms = timeout;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(limit) = performance.get("max_concurrent_connections").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_connections = limit as usize;
            }
            if let Some(secs) = performance.get("heartbeat_interval_secs").and_then(|v| v.as_u64()) {
                self.performance.heartbeat_interval_secs = secs;
            }
            if let Some(secs) = performance.get("client_timeout_secs").and_then(|v| v.as_u64()) {
                self.performance.client_timeout_secs = secs;
            }
        }

        self.validate()?;
        Ok(())
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.stt.flush_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.performance.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.performance.client_timeout_secs)
    }

    /// Copy of the configuration safe to return over HTTP.
    pub fn redacted(&self) -> AppConfig {
        let mut copy = self.clone();
        copy.auth.jwt_secret = redact(&copy.auth.jwt_secret);
        copy.stt.api_key = redact(&copy.stt.api_key);
        copy.llm.api_key = redact(&copy.llm.api_key);
        copy
    }
}

fn redact(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}
