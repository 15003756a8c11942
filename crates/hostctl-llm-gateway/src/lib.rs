#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **hostctl-llm-gateway** – Secure, rate-limited LLM provider gateway.
//!
//! Wraps a raw HTTP provider (Anthropic or OpenAI) with request
//! sanitization, response validation, a token-bucket rate limit, and
//! metrics, then exposes the result as
//! [`hostctl_activities::llm::LlmProvider`] — the seam the incident
//! investigation agent's `Chat` activity drives. No request carries an
//! agent id the way the old single-prompt contract did, so rate
//! limiting is a single global bucket rather than one keyed per caller.
//!
//! ## Security
//!
//! - **Memory-safe secrets**: API keys are held in `secrecy::Secret` and
//!   zeroized on drop.
//! - **Rate limiting**: a `governor` token bucket bounds call volume.
//! - **Request sanitization**: [`RequestSanitizer`] blocks or redacts
//!   prompt-injection/exfiltration patterns in user-authored messages
//!   before they reach a provider.
//! - **Response validation**: [`ResponseValidator`] blocks responses
//!   that smuggle back executable shell/filesystem snippets.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use hostctl_activities::llm::{ChatMessage, ChatOutput, LlmProvider, ToolSpec};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub mod config;
pub mod providers;
pub mod sanitizer;
pub mod validator;

pub use config::{Config, EnvLoader};
pub use providers::{AnthropicProvider, OpenAiProvider};
pub use sanitizer::RequestSanitizer;
pub use validator::ResponseValidator;

/// Maximum allowed length, summed across message contents, to prevent
/// memory exhaustion.
pub const MAX_PROMPT_LENGTH: usize = 32_768;

/// Maximum allowed response content length.
pub const MAX_RESPONSE_LENGTH: usize = 1_048_576;

/// Default rate limit: 60 requests per minute.
pub const DEFAULT_RATE_LIMIT: u32 = 60;

/// Metrics collected by the gateway for monitoring.
#[derive(Debug, Default, Clone)]
pub struct GatewayMetrics {
    /// Total requests processed.
    pub total_requests: u64,
    /// Total successful responses.
    pub successful_responses: u64,
    /// Total failed requests.
    pub failed_requests: u64,
    /// Average response time in milliseconds.
    pub avg_response_time_ms: f64,
}

/// Wraps a raw provider with the gateway's security/observability
/// layer, itself implementing [`LlmProvider`] so it can be handed
/// straight to `hostctl_activities::llm::Chat::new`.
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    rate_limiter: Arc<RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>,
    sanitizer: RequestSanitizer,
    validator: ResponseValidator,
    metrics: Arc<RwLock<GatewayMetrics>>,
}

impl LlmGateway {
    /// Build the gateway from configuration, constructing the
    /// underlying provider and wiring the rate limiter to its
    /// configured quota.
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing LLM gateway with provider: {}", config.provider_name());

        let provider = config.create_provider().await.context("Failed to create LLM provider")?;
        let quota = Quota::per_minute(std::num::NonZeroU32::new(config.rate_limit().max(1)).unwrap());

        Ok(Self {
            provider,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            sanitizer: RequestSanitizer::new(),
            validator: ResponseValidator::new(),
            metrics: Arc::new(RwLock::new(GatewayMetrics::default())),
        })
    }

    /// Wrap an already-constructed provider directly, bypassing
    /// [`Config`] — what tests and `local`-style providers use.
    pub fn wrap(provider: Arc<dyn LlmProvider>, rate_limit_per_minute: u32) -> Self {
        let quota = Quota::per_minute(std::num::NonZeroU32::new(rate_limit_per_minute.max(1)).unwrap());
        Self {
            provider,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            sanitizer: RequestSanitizer::new(),
            validator: ResponseValidator::new(),
            metrics: Arc::new(RwLock::new(GatewayMetrics::default())),
        }
    }

    /// Snapshot current gateway metrics.
    pub async fn metrics(&self) -> GatewayMetrics {
        self.metrics.read().await.clone()
    }

    async fn record_success(&self, duration: Duration) {
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;
        metrics.successful_responses += 1;
        let total = metrics.successful_responses as f64;
        let new_ms = duration.as_millis() as f64;
        metrics.avg_response_time_ms = (metrics.avg_response_time_ms * (total - 1.0) + new_ms) / total;
    }

    async fn record_failure(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;
        metrics.failed_requests += 1;
    }
}

#[async_trait]
impl LlmProvider for LlmGateway {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatOutput> {
        let start_time = std::time::Instant::now();

        if self.rate_limiter.check().is_err() {
            warn!("LLM gateway rate limit exceeded");
            anyhow::bail!("Rate limit exceeded");
        }

        let sanitized = self.sanitizer.sanitize(messages).context("Failed to sanitize request")?;

        debug!(message_count = sanitized.len(), tool_count = tools.len(), "dispatching chat turn to provider");

        let output = match self.provider.complete(&sanitized, tools).await {
            Ok(output) => output,
            Err(e) => {
                error!("LLM provider request failed: {}", e);
                self.record_failure().await;
                return Err(e);
            }
        };

        let validated = self.validator.validate(output).context("Response validation failed")?;

        let duration = start_time.elapsed();
        self.record_success(duration).await;
        info!("Completed chat turn in {}ms", duration.as_millis());

        Ok(validated)
    }
}
