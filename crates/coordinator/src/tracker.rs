//! Rolling per-(backend, intent) performance history.
//!
//! Every execution attempt, success or failure, is appended to a bounded
//! ring buffer keyed by `"<backend>:<intent>"`. Scores weight correctness
//! above speed. Buffers sit behind a `parking_lot` lock so concurrent
//! in-flight requests can append without lost updates; the lock is never
//! held across a suspension point.

use flowline_common::{BackendKind, FlowPerformance};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Latency above which the latency sub-score saturates at zero.
const LATENCY_CEILING_MS: f64 = 5000.0;

/// One execution attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Completion time (Unix millis).
    pub timestamp: u64,

    /// Observed latency in milliseconds.
    pub latency_ms: f64,

    /// Whether the attempt succeeded.
    pub success: bool,
}

/// Sizing knobs for the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Ring-buffer capacity per (backend, intent) key.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Number of most-recent records a score is computed over.
    #[serde(default = "default_score_window")]
    pub score_window: usize,
}

fn default_max_history() -> usize {
    100
}

fn default_score_window() -> usize {
    10
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            score_window: default_score_window(),
        }
    }
}

/// Bounded per-(backend, intent) history producing a rolling score.
pub struct PerformanceTracker {
    config: PerformanceConfig,
    buffers: RwLock<HashMap<String, VecDeque<PerformanceRecord>>>,
}

impl PerformanceTracker {
    pub fn new(config: PerformanceConfig) -> Self {
        Self {
            config,
            buffers: RwLock::new(HashMap::new()),
        }
    }

    fn key(backend: BackendKind, intent: &str) -> String {
        format!("{backend}:{intent}")
    }

    /// Append one attempt, evicting the oldest record on overflow.
    pub fn record(&self, backend: BackendKind, intent: &str, latency_ms: f64, success: bool) {
        let record = PerformanceRecord {
            timestamp: unix_millis(),
            latency_ms,
            success,
        };

        let mut buffers = self.buffers.write();
        let buffer = buffers
            .entry(Self::key(backend, intent))
            .or_insert_with(|| VecDeque::with_capacity(self.config.max_history));
        buffer.push_back(record);
        while buffer.len() > self.config.max_history {
            buffer.pop_front();
        }
    }

    /// Rolling score in [0, 1] for a (backend, intent) pair.
    ///
    /// Returns a neutral 0.5 with no history — cold starts are never
    /// penalized. Otherwise, over the most recent `score_window` records:
    /// `0.7 * success_rate + 0.3 * latency_score`, where the latency score
    /// decays linearly and saturates at zero past 5 seconds.
    pub fn get_score(&self, backend: BackendKind, intent: &str) -> f64 {
        let buffers = self.buffers.read();
        let Some(buffer) = buffers.get(&Self::key(backend, intent)) else {
            return 0.5;
        };
        if buffer.is_empty() {
            return 0.5;
        }

        let recent: Vec<&PerformanceRecord> =
            buffer.iter().rev().take(self.config.score_window).collect();
        let count = recent.len() as f64;
        let successes = recent.iter().filter(|r| r.success).count() as f64;
        let avg_latency = recent.iter().map(|r| r.latency_ms).sum::<f64>() / count;

        let success_rate = successes / count;
        let latency_score = (1.0 - avg_latency / LATENCY_CEILING_MS).max(0.0);

        (0.7 * success_rate + 0.3 * latency_score).clamp(0.0, 1.0)
    }

    /// Snapshot over the scored window, suitable for embedding in a
    /// [`Flow`](flowline_common::Flow). `None` with no history.
    pub fn snapshot(&self, backend: BackendKind, intent: &str) -> Option<FlowPerformance> {
        let buffers = self.buffers.read();
        let buffer = buffers.get(&Self::key(backend, intent))?;
        if buffer.is_empty() {
            return None;
        }

        let recent: Vec<&PerformanceRecord> =
            buffer.iter().rev().take(self.config.score_window).collect();
        let count = recent.len() as f64;
        Some(FlowPerformance {
            avg_latency_ms: recent.iter().map(|r| r.latency_ms).sum::<f64>() / count,
            success_rate: recent.iter().filter(|r| r.success).count() as f64 / count,
            sample_count: recent.len() as u64,
        })
    }

    /// Number of retained records for a key. Test and introspection aid.
    pub fn history_len(&self, backend: BackendKind, intent: &str) -> usize {
        self.buffers
            .read()
            .get(&Self::key(backend, intent))
            .map_or(0, VecDeque::len)
    }
}

fn unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tracker() -> PerformanceTracker {
        PerformanceTracker::new(PerformanceConfig::default())
    }

    #[test]
    fn unseen_key_scores_neutral() {
        assert_eq!(tracker().get_score(BackendKind::N8n, "automation"), 0.5);
    }

    #[test]
    fn buffer_is_bounded_fifo() {
        let t = PerformanceTracker::new(PerformanceConfig {
            max_history: 5,
            score_window: 10,
        });
        // First 5 slow failures, then 5 fast successes. With capacity 5,
        // only the successes survive.
        for _ in 0..5 {
            t.record(BackendKind::N8n, "automation", 4000.0, false);
        }
        for _ in 0..5 {
            t.record(BackendKind::N8n, "automation", 100.0, true);
        }
        assert_eq!(t.history_len(BackendKind::N8n, "automation"), 5);

        let score = t.get_score(BackendKind::N8n, "automation");
        // 0.7 * 1.0 + 0.3 * (1 - 100/5000)
        assert!((score - (0.7 + 0.3 * 0.98)).abs() < 1e-9);
    }

    #[test]
    fn score_weights_success_above_latency() {
        let t = tracker();
        // All failures, instant responses.
        for _ in 0..10 {
            t.record(BackendKind::Flowise, "conversation", 0.0, false);
        }
        let all_fail = t.get_score(BackendKind::Flowise, "conversation");
        assert!((all_fail - 0.3).abs() < 1e-9);

        // All successes, responses at the latency ceiling.
        for _ in 0..10 {
            t.record(BackendKind::Langflow, "conversation", 5000.0, true);
        }
        let all_slow = t.get_score(BackendKind::Langflow, "conversation");
        assert!((all_slow - 0.7).abs() < 1e-9);
    }

    #[test]
    fn latency_score_saturates_past_ceiling() {
        let t = tracker();
        for _ in 0..3 {
            t.record(BackendKind::N8n, "data_analysis", 60_000.0, true);
        }
        let score = t.get_score(BackendKind::N8n, "data_analysis");
        assert!((score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn score_only_covers_recent_window() {
        let t = PerformanceTracker::new(PerformanceConfig {
            max_history: 100,
            score_window: 10,
        });
        // 20 old failures, then 10 recent successes: window sees only the
        // successes.
        for _ in 0..20 {
            t.record(BackendKind::N8n, "integration", 100.0, false);
        }
        for _ in 0..10 {
            t.record(BackendKind::N8n, "integration", 100.0, true);
        }
        let score = t.get_score(BackendKind::N8n, "integration");
        assert!(score > 0.9);
    }

    #[test]
    fn keys_are_isolated_per_backend_and_intent() {
        let t = tracker();
        t.record(BackendKind::N8n, "automation", 100.0, false);
        assert_eq!(t.get_score(BackendKind::N8n, "integration"), 0.5);
        assert_eq!(t.get_score(BackendKind::Flowise, "automation"), 0.5);
    }

    #[test]
    fn snapshot_reports_window_stats() {
        let t = tracker();
        assert!(t.snapshot(BackendKind::N8n, "automation").is_none());

        t.record(BackendKind::N8n, "automation", 200.0, true);
        t.record(BackendKind::N8n, "automation", 400.0, false);
        let snap = t.snapshot(BackendKind::N8n, "automation").unwrap();
        assert_eq!(snap.sample_count, 2);
        assert!((snap.avg_latency_ms - 300.0).abs() < 1e-9);
        assert!((snap.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let t = Arc::new(PerformanceTracker::new(PerformanceConfig {
            max_history: 1000,
            score_window: 10,
        }));

        let mut handles = vec![];
        for _ in 0..8 {
            let t = t.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    t.record(BackendKind::N8n, "automation", 50.0, true);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(t.history_len(BackendKind::N8n, "automation"), 800);
    }
}
