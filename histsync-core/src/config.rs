use crate::types::{DAY_MS, HOUR_MS};

/// Default cap applied by the source to a single query.
pub const DEFAULT_PER_CALL_CAP: usize = 100_000;
/// Default ceiling on records returned by one fetch.
pub const DEFAULT_MAX_TOTAL: usize = 500_000;
/// Ceiling used when fetching everything for a full upload.
pub const FULL_FETCH_MAX_TOTAL: usize = 1_000_000;

/// Window-walk parameters for the history fetcher
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum items the source returns per query
    pub per_call_cap: usize,

    /// Width of the first window (ms)
    pub initial_window_ms: i64,

    /// Smallest window after repeated saturation (ms)
    pub min_window_ms: i64,

    /// Upper bound when growing through sparse windows (ms)
    pub max_sparse_window_ms: i64,

    /// Upper bound when growing through empty windows (ms)
    pub max_empty_window_ms: i64,

    /// A window with fewer results than this is sparse
    pub sparse_threshold: usize,

    /// Divisor applied to the window on saturation
    pub shrink_factor: i64,

    /// Multiplier applied after a sparse window
    pub sparse_growth: i64,

    /// Multiplier applied after a run of empty windows
    pub empty_growth: i64,

    /// Consecutive empty windows that trigger growth
    pub empty_run_before_growth: u32,

    /// Consecutive empty windows below the horizon after which the walk stops
    pub empty_run_before_stop: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            per_call_cap: DEFAULT_PER_CALL_CAP,
            initial_window_ms: DAY_MS,
            min_window_ms: HOUR_MS,
            max_sparse_window_ms: 7 * DAY_MS,
            max_empty_window_ms: 30 * DAY_MS,
            sparse_threshold: 100,
            shrink_factor: 4,
            sparse_growth: 2,
            empty_growth: 3,
            empty_run_before_growth: 3,
            empty_run_before_stop: 10,
        }
    }
}

impl FetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-call cap
    pub fn with_per_call_cap(mut self, cap: usize) -> Self {
        self.per_call_cap = cap;
        self
    }

    /// Set the initial window width
    pub fn with_initial_window_ms(mut self, ms: i64) -> Self {
        self.initial_window_ms = ms;
        self
    }

    /// Set the minimum window width
    pub fn with_min_window_ms(mut self, ms: i64) -> Self {
        self.min_window_ms = ms;
        self
    }

    pub fn with_max_sparse_window_ms(mut self, ms: i64) -> Self {
        self.max_sparse_window_ms = ms;
        self
    }

    pub fn with_max_empty_window_ms(mut self, ms: i64) -> Self {
        self.max_empty_window_ms = ms;
        self
    }

    pub fn with_sparse_threshold(mut self, threshold: usize) -> Self {
        self.sparse_threshold = threshold;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.per_call_cap == 0 {
            return Err("per_call_cap must be greater than 0".to_string());
        }

        if self.min_window_ms <= 0 {
            return Err("min_window_ms must be greater than 0".to_string());
        }

        if self.initial_window_ms < self.min_window_ms {
            return Err("initial_window_ms must be at least min_window_ms".to_string());
        }

        if self.max_sparse_window_ms < self.initial_window_ms
            || self.max_empty_window_ms < self.initial_window_ms
        {
            return Err("window maxima must be at least initial_window_ms".to_string());
        }

        if self.shrink_factor < 2 || self.sparse_growth < 1 || self.empty_growth < 1 {
            return Err("shrink_factor must be >= 2 and growth factors >= 1".to_string());
        }

        Ok(())
    }
}
