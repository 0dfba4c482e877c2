//! Metrics for IKE negotiation
//!
//! Provides counters and gauges for monitoring Quick Mode and Informational
//! exchanges. All metrics use atomic operations for thread-safe updates.
//!
//! # Example
//!
//! ```
//! use isakmp_proto::ipsec::metrics::IkeMetrics;
//!
//! let metrics = IkeMetrics::new();
//!
//! metrics.record_quick_mode_started();
//! // ... exchange runs ...
//! metrics.record_quick_mode_completed();
//! metrics.record_sa_pair_installed();
//!
//! let snapshot = metrics.snapshot();
//! println!("Quick Modes: {}", snapshot.quick_mode_started);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// IKE metrics for monitoring
///
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct IkeMetrics {
    /// Quick Mode exchanges started, either role
    pub quick_mode_started: Arc<AtomicU64>,

    /// Quick Mode exchanges completed
    pub quick_mode_completed: Arc<AtomicU64>,

    /// Quick Mode exchanges aborted
    pub quick_mode_failed: Arc<AtomicU64>,

    /// Messages resent, on timer or on a duplicate from the peer
    pub retransmissions: Arc<AtomicU64>,

    /// IPsec SA pairs installed
    pub sa_pairs_installed: Arc<AtomicU64>,

    /// IPsec SA pairs removed
    pub sa_pairs_removed: Arc<AtomicU64>,

    /// Notifications sent
    pub notifies_sent: Arc<AtomicU64>,

    /// Notifications received
    pub notifies_received: Arc<AtomicU64>,

    /// Delete payloads processed
    pub deletes_processed: Arc<AtomicU64>,

    /// Proposal selection or verification failures
    pub proposal_selection_failed: Arc<AtomicU64>,

    /// Hash verification failures
    pub authentication_failed: Arc<AtomicU64>,

    /// Phase 2 handles currently alive
    pub phase2_active: Arc<AtomicU64>,
}

impl IkeMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self {
            quick_mode_started: Arc::new(AtomicU64::new(0)),
            quick_mode_completed: Arc::new(AtomicU64::new(0)),
            quick_mode_failed: Arc::new(AtomicU64::new(0)),
            retransmissions: Arc::new(AtomicU64::new(0)),
            sa_pairs_installed: Arc::new(AtomicU64::new(0)),
            sa_pairs_removed: Arc::new(AtomicU64::new(0)),
            notifies_sent: Arc::new(AtomicU64::new(0)),
            notifies_received: Arc::new(AtomicU64::new(0)),
            deletes_processed: Arc::new(AtomicU64::new(0)),
            proposal_selection_failed: Arc::new(AtomicU64::new(0)),
            authentication_failed: Arc::new(AtomicU64::new(0)),
            phase2_active: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record a Quick Mode exchange started
    pub fn record_quick_mode_started(&self) {
        self.quick_mode_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a Quick Mode exchange completed
    pub fn record_quick_mode_completed(&self) {
        self.quick_mode_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a Quick Mode exchange aborted
    pub fn record_quick_mode_failed(&self) {
        self.quick_mode_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a resent message
    pub fn record_retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an IPsec SA pair installed
    pub fn record_sa_pair_installed(&self) {
        self.sa_pairs_installed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record IPsec SA pairs removed
    ///
    /// # Arguments
    ///
    /// * `count` - Number of pairs removed
    pub fn record_sa_pairs_removed(&self, count: usize) {
        self.sa_pairs_removed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a notification sent
    pub fn record_notify_sent(&self) {
        self.notifies_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a notification received
    pub fn record_notify_received(&self) {
        self.notifies_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a Delete payload processed
    pub fn record_delete_processed(&self) {
        self.deletes_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a proposal selection or verification failure
    pub fn record_proposal_selection_failed(&self) {
        self.proposal_selection_failed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a hash verification failure
    pub fn record_authentication_failed(&self) {
        self.authentication_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a Phase 2 handle created
    pub fn record_phase2_created(&self) {
        self.phase2_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a Phase 2 handle released
    pub fn record_phase2_released(&self) {
        // Saturate so a reset in between cannot wrap the gauge
        let _ = self
            .phase2_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// Get current metrics snapshot
    ///
    /// Values may be slightly inconsistent across metrics due to concurrent updates.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            quick_mode_started: self.quick_mode_started.load(Ordering::Relaxed),
            quick_mode_completed: self.quick_mode_completed.load(Ordering::Relaxed),
            quick_mode_failed: self.quick_mode_failed.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            sa_pairs_installed: self.sa_pairs_installed.load(Ordering::Relaxed),
            sa_pairs_removed: self.sa_pairs_removed.load(Ordering::Relaxed),
            notifies_sent: self.notifies_sent.load(Ordering::Relaxed),
            notifies_received: self.notifies_received.load(Ordering::Relaxed),
            deletes_processed: self.deletes_processed.load(Ordering::Relaxed),
            proposal_selection_failed: self.proposal_selection_failed.load(Ordering::Relaxed),
            authentication_failed: self.authentication_failed.load(Ordering::Relaxed),
            phase2_active: self.phase2_active.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        self.quick_mode_started.store(0, Ordering::Relaxed);
        self.quick_mode_completed.store(0, Ordering::Relaxed);
        self.quick_mode_failed.store(0, Ordering::Relaxed);
        self.retransmissions.store(0, Ordering::Relaxed);
        self.sa_pairs_installed.store(0, Ordering::Relaxed);
        self.sa_pairs_removed.store(0, Ordering::Relaxed);
        self.notifies_sent.store(0, Ordering::Relaxed);
        self.notifies_received.store(0, Ordering::Relaxed);
        self.deletes_processed.store(0, Ordering::Relaxed);
        self.proposal_selection_failed.store(0, Ordering::Relaxed);
        self.authentication_failed.store(0, Ordering::Relaxed);
        self.phase2_active.store(0, Ordering::Relaxed);
    }
}

impl Default for IkeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all IKE metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Quick Mode exchanges started
    pub quick_mode_started: u64,

    /// Quick Mode exchanges completed
    pub quick_mode_completed: u64,

    /// Quick Mode exchanges aborted
    pub quick_mode_failed: u64,

    /// Messages resent
    pub retransmissions: u64,

    /// IPsec SA pairs installed
    pub sa_pairs_installed: u64,

    /// IPsec SA pairs removed
    pub sa_pairs_removed: u64,

    /// Notifications sent
    pub notifies_sent: u64,

    /// Notifications received
    pub notifies_received: u64,

    /// Delete payloads processed
    pub deletes_processed: u64,

    /// Proposal selection or verification failures
    pub proposal_selection_failed: u64,

    /// Hash verification failures
    pub authentication_failed: u64,

    /// Phase 2 handles currently alive
    pub phase2_active: u64,
}

impl MetricsSnapshot {
    /// Quick Mode success rate (0.0 to 1.0)
    pub fn quick_mode_success_rate(&self) -> f64 {
        if self.quick_mode_started == 0 {
            return 0.0;
        }
        self.quick_mode_completed as f64 / self.quick_mode_started as f64
    }

    /// Average resends per started exchange
    pub fn retransmissions_per_exchange(&self) -> f64 {
        if self.quick_mode_started == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.quick_mode_started as f64
    }
}
