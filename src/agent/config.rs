//! Engine configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::path::PathBuf;
use std::time::Duration;

use super::routing::Specialist;
use crate::error::AgentError;

/// Default maximum concurrent provider calls.
const DEFAULT_MAX_CONCURRENCY: usize = 4;
/// Default manager max tokens.
const DEFAULT_MANAGER_MAX_TOKENS: u32 = 8192;
/// Default specialist max tokens. Dense guidelines yield long cohort lists.
const DEFAULT_SPECIALIST_MAX_TOKENS: u32 = 16384;
/// Default verifier max tokens.
const DEFAULT_VERIFIER_MAX_TOKENS: u32 = 2048;
/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Default max retries after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base delay for exponential backoff, in milliseconds.
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Bounds on the workflow state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowLimits {
    /// Times a node may run again after its first visit.
    pub max_revisits: usize,
    /// Manager plus specialist invocations per run.
    pub max_iterations: usize,
    /// Fewer manager themes than this produce a warning.
    pub min_themes: usize,
    /// Manager themes beyond this are discarded.
    pub max_themes: usize,
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self {
            max_revisits: 2,
            max_iterations: 8,
            min_themes: 3,
            max_themes: 5,
        }
    }
}

/// Evidence verification thresholds and weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerificationConfig {
    /// Sentences retrieved per question.
    pub top_k: usize,
    /// Questions generated per sub-cohort.
    pub max_questions: usize,
    /// Sub-cohorts below this confidence are kept but flagged.
    pub low_confidence_threshold: f64,
    /// Sub-cohorts whose best lexical evidence is below this are dropped.
    pub evidence_floor: f64,
    /// Share of the lexical score in the per-question score.
    pub lexical_weight: f64,
    /// Multiplicative discount per retrieval rank.
    pub rank_decay: f64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_questions: 3,
            low_confidence_threshold: 0.5,
            evidence_floor: 0.1,
            lexical_weight: 0.5,
            rank_decay: 0.5,
        }
    }
}

/// Fallback ordering and tie-break vocabularies for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Specialists run when the manager's choice is unusable.
    pub default_order: Vec<Specialist>,
    /// Terms counted in manager themes for the drug specialist.
    pub drug_vocabulary: Vec<String>,
    /// Terms counted in manager themes for the diagnosis specialist.
    pub diagnosis_vocabulary: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|w| (*w).to_string()).collect();
        Self {
            default_order: vec![Specialist::Drug, Specialist::Diagnosis],
            drug_vocabulary: words(&[
                "drug",
                "medication",
                "therapy",
                "treatment",
                "dose",
                "dosing",
                "statin",
                "prescribe",
                "pharmacologic",
                "agent",
            ]),
            diagnosis_vocabulary: words(&[
                "diagnosis",
                "diagnostic",
                "screening",
                "test",
                "criteria",
                "assessment",
                "measurement",
                "risk",
                "imaging",
                "biomarker",
            ]),
        }
    }
}

impl RoutingConfig {
    /// Vocabulary used to break ties for `specialist`.
    #[must_use]
    pub fn vocabulary(&self, specialist: Specialist) -> &[String] {
        match specialist {
            Specialist::Drug => &self.drug_vocabulary,
            Specialist::Diagnosis => &self.diagnosis_vocabulary,
        }
    }
}

/// Configuration for the orchestration engine.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// LLM provider name (e.g., "openai").
    pub provider: String,
    /// API key for the provider.
    pub api_key: String,
    /// Optional base URL override (for proxies or compatible APIs).
    pub base_url: Option<String>,
    /// Model for the manager agent.
    pub manager_model: String,
    /// Model for the specialist agents.
    pub specialist_model: String,
    /// Model for verification questions and judgments.
    pub verifier_model: String,
    /// Maximum tokens for manager responses.
    pub manager_max_tokens: u32,
    /// Maximum tokens for specialist responses.
    pub specialist_max_tokens: u32,
    /// Maximum tokens for verifier responses.
    pub verifier_max_tokens: u32,
    /// Per-call timeout enforced by the gateway.
    pub timeout: Duration,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries.
    pub retry_base_delay: Duration,
    /// Maximum concurrent specialist tasks.
    pub max_concurrency: usize,
    /// Run the specialists of one routing round concurrently.
    pub parallel_specialists: bool,
    /// Manager input is cut at a sentence boundary beyond this many bytes.
    pub max_manager_chars: Option<usize>,
    /// Directory containing prompt template files.
    ///
    /// Missing files fall back to compiled-in defaults.
    pub prompt_dir: Option<PathBuf>,
    /// State-machine bounds.
    pub limits: WorkflowLimits,
    /// Verification policy.
    pub verification: VerificationConfig,
    /// Routing fallback and tie-break vocabularies.
    pub routing: RoutingConfig,
}

impl AgentConfig {
    /// Creates a new builder for `AgentConfig`.
    #[must_use]
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key is found.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::builder().from_env().build()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Builder for [`AgentConfig`].
#[derive(Debug, Clone, Default)]
pub struct AgentConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    manager_model: Option<String>,
    specialist_model: Option<String>,
    verifier_model: Option<String>,
    manager_max_tokens: Option<u32>,
    specialist_max_tokens: Option<u32>,
    verifier_max_tokens: Option<u32>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    retry_base_delay: Option<Duration>,
    max_concurrency: Option<usize>,
    parallel_specialists: Option<bool>,
    max_manager_chars: Option<usize>,
    prompt_dir: Option<PathBuf>,
    limits: Option<WorkflowLimits>,
    max_revisits: Option<usize>,
    max_iterations: Option<usize>,
    verification: Option<VerificationConfig>,
    routing: Option<RoutingConfig>,
}

impl AgentConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.provider.is_none() {
            self.provider = std::env::var("GKG_PROVIDER").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("OPENAI_API_KEY")
                .or_else(|_| std::env::var("GKG_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("OPENAI_BASE_URL")
                .or_else(|_| std::env::var("GKG_BASE_URL"))
                .ok();
        }
        if self.manager_model.is_none() {
            self.manager_model = std::env::var("GKG_MANAGER_MODEL").ok();
        }
        if self.specialist_model.is_none() {
            self.specialist_model = std::env::var("GKG_SPECIALIST_MODEL").ok();
        }
        if self.verifier_model.is_none() {
            self.verifier_model = std::env::var("GKG_VERIFIER_MODEL").ok();
        }
        if self.timeout.is_none() {
            self.timeout = env_parse::<u64>("GKG_TIMEOUT_SECS").map(Duration::from_secs);
        }
        if self.max_retries.is_none() {
            self.max_retries = env_parse("GKG_MAX_RETRIES");
        }
        if self.max_concurrency.is_none() {
            self.max_concurrency = env_parse("GKG_MAX_CONCURRENCY");
        }
        if self.max_revisits.is_none() {
            self.max_revisits = env_parse("GKG_MAX_REVISITS");
        }
        if self.max_iterations.is_none() {
            self.max_iterations = env_parse("GKG_MAX_ITERATIONS");
        }
        if self.max_manager_chars.is_none() {
            self.max_manager_chars = env_parse("GKG_MAX_MANAGER_CHARS");
        }
        if self.prompt_dir.is_none() {
            self.prompt_dir = std::env::var("GKG_PROMPT_DIR").ok().map(PathBuf::from);
        }
        self
    }

    /// Sets the LLM provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the manager model.
    #[must_use]
    pub fn manager_model(mut self, model: impl Into<String>) -> Self {
        self.manager_model = Some(model.into());
        self
    }

    /// Sets the specialist model.
    #[must_use]
    pub fn specialist_model(mut self, model: impl Into<String>) -> Self {
        self.specialist_model = Some(model.into());
        self
    }

    /// Sets the verifier model.
    #[must_use]
    pub fn verifier_model(mut self, model: impl Into<String>) -> Self {
        self.verifier_model = Some(model.into());
        self
    }

    /// Sets the manager max tokens.
    #[must_use]
    pub const fn manager_max_tokens(mut self, n: u32) -> Self {
        self.manager_max_tokens = Some(n);
        self
    }

    /// Sets the specialist max tokens.
    #[must_use]
    pub const fn specialist_max_tokens(mut self, n: u32) -> Self {
        self.specialist_max_tokens = Some(n);
        self
    }

    /// Sets the verifier max tokens.
    #[must_use]
    pub const fn verifier_max_tokens(mut self, n: u32) -> Self {
        self.verifier_max_tokens = Some(n);
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Sets the max retries.
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Sets the base backoff delay.
    #[must_use]
    pub const fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    /// Sets the maximum concurrency.
    #[must_use]
    pub const fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    /// Enables or disables concurrent specialists.
    #[must_use]
    pub const fn parallel_specialists(mut self, enabled: bool) -> Self {
        self.parallel_specialists = Some(enabled);
        self
    }

    /// Caps the manager input size.
    #[must_use]
    pub const fn max_manager_chars(mut self, n: usize) -> Self {
        self.max_manager_chars = Some(n);
        self
    }

    /// Sets the prompt template directory.
    #[must_use]
    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_dir = Some(dir.into());
        self
    }

    /// Replaces all workflow limits.
    #[must_use]
    pub const fn limits(mut self, limits: WorkflowLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Sets the revisit limit.
    #[must_use]
    pub const fn max_revisits(mut self, n: usize) -> Self {
        self.max_revisits = Some(n);
        self
    }

    /// Sets the iteration cap.
    #[must_use]
    pub const fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    /// Sets the verification policy.
    #[must_use]
    pub const fn verification(mut self, verification: VerificationConfig) -> Self {
        self.verification = Some(verification);
        self
    }

    /// Sets routing fallback and vocabularies.
    #[must_use]
    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Builds the [`AgentConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key was set.
    pub fn build(self) -> Result<AgentConfig, AgentError> {
        let api_key = self.api_key.ok_or(AgentError::ApiKeyMissing)?;

        let mut limits = self.limits.unwrap_or_default();
        if let Some(n) = self.max_revisits {
            limits.max_revisits = n;
        }
        if let Some(n) = self.max_iterations {
            limits.max_iterations = n;
        }
        limits.max_themes = limits.max_themes.max(limits.min_themes);

        let mut routing = self.routing.unwrap_or_default();
        if routing.default_order.is_empty() {
            routing.default_order = Specialist::ALL.to_vec();
        }

        Ok(AgentConfig {
            provider: self.provider.unwrap_or_else(|| "openai".to_string()),
            api_key,
            base_url: self.base_url,
            manager_model: self.manager_model.unwrap_or_else(|| "gpt-4o".to_string()),
            specialist_model: self
                .specialist_model
                .unwrap_or_else(|| "gpt-4o".to_string()),
            verifier_model: self
                .verifier_model
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            manager_max_tokens: self
                .manager_max_tokens
                .unwrap_or(DEFAULT_MANAGER_MAX_TOKENS),
            specialist_max_tokens: self
                .specialist_max_tokens
                .unwrap_or(DEFAULT_SPECIALIST_MAX_TOKENS),
            verifier_max_tokens: self
                .verifier_max_tokens
                .unwrap_or(DEFAULT_VERIFIER_MAX_TOKENS),
            timeout: self
                .timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_base_delay: self
                .retry_base_delay
                .unwrap_or(Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS)),
            max_concurrency: self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY).max(1),
            parallel_specialists: self.parallel_specialists.unwrap_or(true),
            max_manager_chars: self.max_manager_chars.filter(|&n| n > 0),
            prompt_dir: self.prompt_dir,
            limits,
            verification: self.verification.unwrap_or_default(),
            routing,
        })
    }
}
