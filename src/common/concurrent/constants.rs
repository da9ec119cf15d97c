use std::time::Duration;

/// The default number of live entries drawn for each eviction round.
pub(crate) const DEFAULT_EVICTION_SAMPLE_SIZE: usize = 8;

/// The default number of consecutive eviction rounds that may fail to find an
/// evictable candidate before capacity enforcement gives up.
pub(crate) const DEFAULT_MAX_EVICTION_ATTEMPTS: usize = 16;

/// The default number of segments of a store's entry map.
pub(crate) const DEFAULT_NUM_SEGMENTS: usize = 64;

/// How many times a reader retries after a fault it was waiting on has been
/// abandoned because its computation panicked.
pub(crate) const MAX_ABANDONED_FAULT_RETRIES: usize = 200;

/// The granularity at which blocked waits re-check the calling thread's
/// interrupt flag.
pub(crate) const INTERRUPT_CHECK_INTERVAL: Duration = Duration::from_millis(10);
