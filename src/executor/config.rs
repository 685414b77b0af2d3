//! Runtime configuration for the executor.

use crate::utils::id_generator::IdGenerator;

/// Environment variable controlling the per-layer concurrency limit.
pub const MAX_CONCURRENCY_ENV: &str = "LOOMFLOW_MAX_CONCURRENCY";

/// Per-executor settings.
///
/// All settings are optional; `run_id` defaults to a fresh UUID per run and
/// the concurrency limit defaults to the host's available parallelism.
///
/// # Examples
///
/// ```
/// use loomflow::executor::ExecutorConfig;
///
/// let config = ExecutorConfig::new()
///     .with_run_id("triage-demo")
///     .with_max_concurrency(4);
/// assert_eq!(config.max_concurrency(), 4);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ExecutorConfig {
    run_id: Option<String>,
    max_concurrency: Option<usize>,
}

impl ExecutorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the run id instead of generating one per run.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Cap how many sibling nodes of one layer run at once.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Read overrides from the environment (and a `.env` file, if present).
    ///
    /// Currently honors `LOOMFLOW_MAX_CONCURRENCY`; unparsable values are
    /// logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::new();
        if let Ok(raw) = std::env::var(MAX_CONCURRENCY_ENV) {
            match raw.parse::<usize>() {
                Ok(limit) if limit > 0 => config.max_concurrency = Some(limit),
                _ => {
                    tracing::warn!(value = %raw, "ignoring unparsable {MAX_CONCURRENCY_ENV}");
                }
            }
        }
        config
    }

    /// The configured run id, or a freshly generated one.
    pub fn resolve_run_id(&self, ids: &IdGenerator) -> String {
        self.run_id
            .clone()
            .unwrap_or_else(|| ids.generate_run_id())
    }

    /// The effective per-layer concurrency limit.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1)
        })
    }
}
