//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every websocket actor.
//!
//! ## What lives here:
//! - **Configuration**: Runtime-updatable, behind `Arc<RwLock<AppConfig>>`
//! - **Metrics**: Request counters plus gateway counters (messages, replies,
//!   finalized interviews, relays)
//! - **Collaborators**: The interview service, the authenticator, the
//!   speech-to-text connector and the connection registry, each behind an
//!   `Arc` so cloning the state is cheap
//!
//! ## Key Rust Concepts:
//! - **Arc<RwLock<T>>**: Many readers or one writer, shared across threads
//! - **Trait objects**: `Arc<dyn SttConnector>` lets tests swap in fakes
//!
//! ## Lock poisoning:
//! A panic while holding one of these locks leaves plain counters or config
//! behind, which stay usable, so a poisoned lock is recovered rather than
//! propagated.

use crate::auth::Authenticator;
use crate::config::AppConfig;
use crate::interview::{Finalizer, InterviewService, TurnEngine};
use crate::llm::{GeminiClient, GenerativeModel};
use crate::rooms::ConnectionRegistry;
use crate::store::{MemoryCache, MemoryRecordStore, RecordStore, SessionStore};
use crate::stt::{SarvamConnector, SttConnector};

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// The main application state shared across handlers and connections.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and gateway counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    pub service: Arc<InterviewService>,
    pub auth: Authenticator,
    pub connector: Arc<dyn SttConnector>,
    pub rooms: Arc<ConnectionRegistry>,

    /// Expiring cache behind the session store, kept for periodic purging
    pub cache: Arc<MemoryCache>,
}

/// Counters collected across requests and connections.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of HTTP errors since server start
    pub error_count: u64,

    /// Upstream speech-to-text sessions currently live
    pub active_relays: u32,

    /// Gateway event counters
    pub gateway: GatewayMetrics,

    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct GatewayMetrics {
    pub user_messages: u64,
    pub ai_responses: u64,
    pub interviews_finalized: u64,
    /// Error events sent to interview clients
    pub client_errors: u64,
    pub relay_sessions_started: u64,
}

/// Per-endpoint request statistics.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Which gateway counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayCounter {
    UserMessage,
    AiResponse,
    InterviewFinalized,
    ClientError,
    RelayStarted,
}

impl AppState {
    /// Build the state with in-process stores and the hosted services named
    /// in `config`.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let cache = Arc::new(MemoryCache::new());
        let records: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let model: Arc<dyn GenerativeModel> = Arc::new(GeminiClient::new(&config.llm)?);
        let connector: Arc<dyn SttConnector> =
            Arc::new(SarvamConnector::new(config.stt.api_key.clone()));

        Ok(Self::with_backends(config, cache, records, model, connector))
    }

    /// Build the state around explicit backends.
    pub fn with_backends(
        config: AppConfig,
        cache: Arc<MemoryCache>,
        records: Arc<dyn RecordStore>,
        model: Arc<dyn GenerativeModel>,
        connector: Arc<dyn SttConnector>,
    ) -> Self {
        let sessions = SessionStore::new(
            cache.clone(),
            Duration::from_secs(config.interview.config_cache_ttl_secs),
            Duration::from_secs(config.interview.timing_ttl_secs),
        );
        let service = InterviewService::new(
            sessions,
            records.clone(),
            TurnEngine::new(model.clone(), &config.llm),
            Finalizer::new(model, &config.llm),
            config.interview.default_duration_minutes,
        );
        let auth = Authenticator::new(&config.auth, records);

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            service: Arc::new(service),
            auth,
            connector,
            rooms: Arc::new(ConnectionRegistry::new()),
            cache,
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// Only future connections see the new values. Collaborators built at
    /// startup (model client, credential key) keep their settings.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
        Ok(())
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record one request against `endpoint` (e.g. "GET /health").
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn record_gateway(&self, counter: GatewayCounter) {
        let mut metrics = self.metrics_mut();
        let gateway = &mut metrics.gateway;
        match counter {
            GatewayCounter::UserMessage => gateway.user_messages += 1,
            GatewayCounter::AiResponse => gateway.ai_responses += 1,
            GatewayCounter::InterviewFinalized => gateway.interviews_finalized += 1,
            GatewayCounter::ClientError => gateway.client_errors += 1,
            GatewayCounter::RelayStarted => gateway.relay_sessions_started += 1,
        }
    }

    pub fn increment_active_relays(&self) {
        self.metrics_mut().active_relays += 1;
    }

    /// Saturates at zero.
    pub fn decrement_active_relays(&self) {
        let mut metrics = self.metrics_mut();
        metrics.active_relays = metrics.active_relays.saturating_sub(1);
    }

    /// Consistent copy of the metrics, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
