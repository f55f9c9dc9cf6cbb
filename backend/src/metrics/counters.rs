use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub planner_ticks: Arc<AtomicU64>,
    pub planner_enqueued: Arc<AtomicU64>,
    pub planner_duplicate_suppressed: Arc<AtomicU64>,
    pub planner_skip_no_power_data: Arc<AtomicU64>,
    pub planner_skip_threshold_not_met: Arc<AtomicU64>,

    pub dispatch_batches: Arc<AtomicU64>,
    pub dispatch_claimed: Arc<AtomicU64>,
    pub dispatch_publish_ok: Arc<AtomicU64>,
    pub dispatch_publish_failed: Arc<AtomicU64>,
    pub dispatch_retried: Arc<AtomicU64>,

    pub ack_correlated: Arc<AtomicU64>,
    pub ack_unknown_command: Arc<AtomicU64>,
    pub ack_malformed: Arc<AtomicU64>,

    pub sweeper_timed_out: Arc<AtomicU64>,
}
