//! System-wide default constants.
//!
//! Centralises magic numbers used as config defaults. Grouped by subsystem
//! for easy discovery.

// ============================================================================
// Acquisition
// ============================================================================

/// Target acquisition cycle period (ms). ~31 Hz.
pub const ACQUISITION_CYCLE_MS: u64 = 32;

/// Raw lump/neck counter value above which the hardware counters are reset.
pub const COUNTER_HIGH_WATER: u16 = 9_000;

/// Consecutive cycles with zero deltas before an idle-time counter reset.
pub const STABLE_CYCLES_BEFORE_RESET: u32 = 128;

/// Attempts of the assert/clear/verify counter reset sequence.
pub const COUNTER_RESET_ATTEMPTS: u32 = 3;

/// Sleep after a failed connection attempt (ms).
pub const RECONNECT_BACKOFF_MS: u64 = 1_000;

/// Retries of a single PLC request rejected as busy.
pub const BUSY_RETRIES: u32 = 3;

/// Linear backoff step between busy retries (ms).
pub const BUSY_BACKOFF_MS: u64 = 5;

/// Acquisition → router channel capacity (samples).
pub const ACQUISITION_CHANNEL_CAPACITY: usize = 250;

/// Analysis → acquisition command channel capacity.
pub const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Minimum interval between "sample dropped" warnings (ms).
pub const DROP_LOG_INTERVAL_MS: u64 = 5_000;

// ============================================================================
// Router
// ============================================================================

/// Samples routed per drain cycle.
pub const ROUTER_BATCH_SIZE: usize = 100;

/// Queue depth that triggers shedding of the oldest samples.
pub const QUEUE_CRITICAL_DEPTH: usize = 200;

/// Queue depth shedding brings the backlog down to.
pub const QUEUE_WARNING_DEPTH: usize = 50;

/// Router → analysis channel capacity (samples).
pub const ANALYSIS_CHANNEL_CAPACITY: usize = 64;

/// Cap of each display history. 2 000 samples ≈ 1 minute at 32 ms.
pub const HISTORY_MAX_SAMPLES: usize = 2_000;

/// Configured line speed (m/min).
pub const LINE_SPEED_M_PER_MIN: f64 = 30.0;

// ============================================================================
// Analysis
// ============================================================================

/// Diameter samples required before a spectrum is computed.
pub const FFT_MIN_SAMPLES: usize = 64;

/// Sample rate assumed when the observed period is unusable (Hz). 1 / 32 ms.
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 31.25;

/// Minimum peak prominence in the magnitude spectrum (mm).
pub const PEAK_MIN_PROMINENCE: f64 = 0.005;

/// Minimum separation between reported spectral peaks (bins).
pub const PEAK_MIN_DISTANCE_BINS: usize = 2;

/// Trailing samples per diameter channel for the std-dev alarm.
pub const STD_DEV_WINDOW: usize = 64;

// ============================================================================
// Storage / Server
// ============================================================================

/// sled database directory.
pub const DATABASE_PATH: &str = "./data/lineguard.db";

/// Alarm events queued for the background writer before new ones are dropped.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// HTTP status server bind address.
pub const SERVER_ADDR: &str = "0.0.0.0:8080";

/// Bounded wait for each pipeline context to exit on shutdown (ms).
pub const SHUTDOWN_JOIN_TIMEOUT_MS: u64 = 2_000;
