//! The decision core: scoring backends for a request.
//!
//! Intelligent routing scores every backend whose health is freshly
//! re-checked true, combining flow-match specificity, liveness, and rolling
//! performance into a composite in [0, 1]. Every decision also carries a
//! ranked list of alternatives the coordinator can fall back to.

use crate::intent::{IntentClassifier, IntentMatch};
use crate::registry::BackendRegistry;
use crate::tracker::PerformanceTracker;
use flowline_common::{BackendKind, Flow, FlowCapability, FlowlineError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Weights of the composite score. The 3-factor scheme is canonical;
/// capability affinity is an optional, disabled-by-default fourth term
/// that takes a share of the match weight when switched on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingWeights {
    #[serde(default = "default_match_weight")]
    pub match_weight: f64,

    #[serde(default = "default_health_weight")]
    pub health_weight: f64,

    #[serde(default = "default_performance_weight")]
    pub performance_weight: f64,

    /// Enable the capability-affinity term (off by default).
    #[serde(default)]
    pub capability_affinity: bool,
}

fn default_match_weight() -> f64 {
    0.5
}

fn default_health_weight() -> f64 {
    0.3
}

fn default_performance_weight() -> f64 {
    0.2
}

impl Default for RoutingWeights {
    fn default() -> Self {
        Self {
            match_weight: default_match_weight(),
            health_weight: default_health_weight(),
            performance_weight: default_performance_weight(),
            capability_affinity: false,
        }
    }
}

impl RoutingWeights {
    /// Weights must each lie in [0, 1] and sum to 1.
    pub fn validate(&self) -> Result<()> {
        let weights = [self.match_weight, self.health_weight, self.performance_weight];
        if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err(FlowlineError::Config(
                "routing weights must lie in [0, 1]".into(),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(FlowlineError::Config(format!(
                "routing weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }

    fn composite(&self, breakdown: &ScoreBreakdown, capability: f64) -> f64 {
        let base = if self.capability_affinity {
            // Affinity takes a fifth of the match weight.
            let affinity_weight = self.match_weight * 0.2;
            (self.match_weight - affinity_weight) * breakdown.match_score
                + affinity_weight * capability
                + self.health_weight * breakdown.health_score
                + self.performance_weight * breakdown.performance_score
        } else {
            self.match_weight * breakdown.match_score
                + self.health_weight * breakdown.health_score
                + self.performance_weight * breakdown.performance_score
        };
        base.clamp(0.0, 1.0)
    }
}

/// How the backend was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMethod {
    /// Operator named the backend; scoring was skipped.
    Explicit,
    /// Composite scoring across all healthy backends.
    Intelligent,
}

/// Sub-scores behind one composite, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub match_score: f64,
    pub health_score: f64,
    pub performance_score: f64,
}

/// One scored (backend, flow) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingCandidate {
    pub backend: BackendKind,
    pub flow: Flow,
    pub composite: f64,
    pub breakdown: ScoreBreakdown,
}

/// The chosen backend and flow for one request, with scoring rationale and
/// the ranked fallback order. Ephemeral — produced fresh per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub backend: BackendKind,
    pub flow: Flow,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub intent: String,
    pub intent_confidence: f64,
    pub method: SelectionMethod,

    /// Remaining candidates in descending composite order.
    pub alternatives: Vec<RoutingCandidate>,
}

/// Scores all healthy backends for a request and produces a ranked
/// decision plus fallback order.
pub struct UniversalRouter {
    registry: Arc<BackendRegistry>,
    tracker: Arc<PerformanceTracker>,
    classifier: IntentClassifier,
    weights: RoutingWeights,
}

impl UniversalRouter {
    pub fn new(
        registry: Arc<BackendRegistry>,
        tracker: Arc<PerformanceTracker>,
        classifier: IntentClassifier,
        weights: RoutingWeights,
    ) -> Self {
        Self {
            registry,
            tracker,
            classifier,
            weights,
        }
    }

    /// Select a backend and flow for a question.
    ///
    /// An explicit `backend_override` skips scoring entirely — operator
    /// intent overrides automatic matching, even when the named backend
    /// has no flow matching the resolved intent (a degraded match).
    pub async fn select_backend(
        &self,
        question: &str,
        intent_override: Option<&str>,
        backend_override: Option<BackendKind>,
    ) -> Result<RoutingDecision> {
        if self.registry.is_empty().await {
            return Err(FlowlineError::NoBackendsAvailable);
        }

        let resolved = match intent_override {
            Some(intent) => IntentMatch::explicit(intent),
            None => self.classifier.classify(question),
        };

        match backend_override {
            Some(kind) => self.select_explicit(kind, resolved).await,
            None => self.select_intelligent(resolved).await,
        }
    }

    async fn select_explicit(
        &self,
        kind: BackendKind,
        resolved: IntentMatch,
    ) -> Result<RoutingDecision> {
        if !self.registry.is_registered(kind).await {
            return Err(FlowlineError::UnknownBackend(kind.to_string()));
        }
        if !self.registry.is_connected(kind).await {
            return Err(FlowlineError::BackendUnavailable(format!(
                "{kind} is registered but not connected"
            )));
        }

        let flows = self.registry.flows(kind).await?;
        if flows.is_empty() {
            return Err(FlowlineError::NoMatchingFlow {
                intent: resolved.intent,
            });
        }

        let keywords = self.intent_keywords(&resolved.intent);
        let (flow, matched) = match best_matching_flow(&flows, &resolved.intent, &keywords) {
            Some(flow) => (flow.clone(), true),
            None => {
                // Operator intent overrides automatic matching.
                let flow = best_available_flow(&flows).clone();
                warn!(
                    backend = %kind,
                    intent = %resolved.intent,
                    flow = %flow.universal_id,
                    "Explicit override has no flow for intent, using best available (degraded match)"
                );
                (flow, false)
            }
        };

        let breakdown = ScoreBreakdown {
            match_score: if matched { 1.0 } else { 0.0 },
            health_score: 1.0,
            performance_score: self.tracker.get_score(kind, &resolved.intent),
        };

        Ok(RoutingDecision {
            backend: kind,
            flow,
            score: 1.0,
            breakdown,
            intent: resolved.intent,
            intent_confidence: resolved.confidence,
            method: SelectionMethod::Explicit,
            alternatives: vec![],
        })
    }

    async fn select_intelligent(&self, resolved: IntentMatch) -> Result<RoutingDecision> {
        let keywords = self.intent_keywords(&resolved.intent);
        let mut candidates: Vec<RoutingCandidate> = vec![];
        let mut healthy_backends = 0usize;

        for kind in self.registry.kinds().await {
            // Routing never trusts a stale liveness result: re-check now.
            let status = match self.registry.health_check(kind).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(backend = %kind, error = %e, "Health re-check failed");
                    continue;
                }
            };
            if !status.healthy {
                debug!(backend = %kind, "Excluded from scoring: unhealthy");
                continue;
            }
            healthy_backends += 1;

            let flows = match self.registry.flows(kind).await {
                Ok(flows) => flows,
                Err(e) => {
                    warn!(backend = %kind, error = %e, "Flow fetch failed during scoring");
                    continue;
                }
            };

            let Some(flow) = best_matching_flow(&flows, &resolved.intent, &keywords) else {
                debug!(backend = %kind, intent = %resolved.intent, "No matching flow");
                continue;
            };

            let breakdown = ScoreBreakdown {
                match_score: match_score(flow),
                health_score: 1.0,
                performance_score: self.tracker.get_score(kind, &resolved.intent),
            };
            let capability = capability_score(flow, &resolved.intent);
            let composite = self.weights.composite(&breakdown, capability);

            debug!(
                backend = %kind,
                flow = %flow.universal_id,
                composite,
                match_score = breakdown.match_score,
                performance_score = breakdown.performance_score,
                "Scored candidate"
            );

            candidates.push(RoutingCandidate {
                backend: kind,
                flow: flow.clone(),
                composite,
                breakdown,
            });
        }

        if healthy_backends == 0 {
            return Err(FlowlineError::BackendUnavailable(
                "no healthy backends".into(),
            ));
        }
        if candidates.is_empty() {
            // Never silently degrade to an arbitrary backend.
            return Err(FlowlineError::NoMatchingFlow {
                intent: resolved.intent,
            });
        }

        candidates.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.backend.as_str().cmp(b.backend.as_str()))
        });

        let primary = candidates.remove(0);
        Ok(RoutingDecision {
            backend: primary.backend,
            flow: primary.flow,
            score: primary.composite,
            breakdown: primary.breakdown,
            intent: resolved.intent,
            intent_confidence: resolved.confidence,
            method: SelectionMethod::Intelligent,
            alternatives: candidates,
        })
    }

    fn intent_keywords(&self, intent: &str) -> Vec<String> {
        self.classifier
            .keywords_for(intent)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }
}

/// Match score for a matching flow: rewards keyword specificity,
/// saturating at ten keywords. Always in [0.5, 1.0] for a match; a
/// non-matching flow scores 0 and is not a candidate.
fn match_score(flow: &Flow) -> f64 {
    0.5 + 0.5 * (flow.keyword_count() as f64 / 10.0).min(1.0)
}

/// Whether a flow covers an intent: one of its keywords equals the intent
/// name or appears in the classifier's keyword table for that intent.
fn flow_matches(flow: &Flow, intent: &str, intent_keywords: &[String]) -> bool {
    flow.intent_keywords.iter().any(|keyword| {
        let keyword = keyword.to_lowercase();
        keyword == intent || intent_keywords.contains(&keyword)
    })
}

/// The most specific matching flow. Ties break on highest keyword count,
/// then ascending universal id, keeping routing reproducible.
fn best_matching_flow<'a>(
    flows: &'a [Flow],
    intent: &str,
    intent_keywords: &[String],
) -> Option<&'a Flow> {
    flows
        .iter()
        .filter(|flow| flow_matches(flow, intent, intent_keywords))
        .max_by(|a, b| {
            a.keyword_count()
                .cmp(&b.keyword_count())
                .then_with(|| b.universal_id.cmp(&a.universal_id))
        })
}

/// Best flow regardless of intent match, same stable ordering. Only
/// called with a non-empty list.
fn best_available_flow(flows: &[Flow]) -> &Flow {
    flows
        .iter()
        .max_by(|a, b| {
            a.keyword_count()
                .cmp(&b.keyword_count())
                .then_with(|| b.universal_id.cmp(&a.universal_id))
        })
        .expect("caller checked flows is non-empty")
}

/// Capability implied by a default-table intent, for the optional
/// affinity term.
fn capability_score(flow: &Flow, intent: &str) -> f64 {
    let implied = match intent {
        "creative_guidance" => FlowCapability::TextGeneration,
        "document_search" => FlowCapability::DocumentSearch,
        "data_analysis" => FlowCapability::DataAnalysis,
        "automation" => FlowCapability::Automation,
        "integration" => FlowCapability::Integration,
        "conversation" => FlowCapability::Conversation,
        _ => return 0.0,
    };
    if flow.capabilities.contains(&implied) {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(kind: BackendKind, id: &str, keywords: &[&str]) -> Flow {
        Flow::new(kind, id, id).with_keywords(keywords.iter().copied())
    }

    #[test]
    fn default_weights_validate() {
        RoutingWeights::default().validate().unwrap();
    }

    #[test]
    fn unbalanced_weights_are_rejected() {
        let weights = RoutingWeights {
            match_weight: 0.9,
            health_weight: 0.3,
            performance_weight: 0.2,
            capability_affinity: false,
        };
        assert_eq!(weights.validate().unwrap_err().kind(), "configuration_error");
    }

    #[test]
    fn match_score_rewards_specificity_and_saturates() {
        let two = flow(BackendKind::N8n, "a", &["creative", "goal"]);
        let twelve_keywords: Vec<String> = (0..12).map(|i| format!("kw{i}")).collect();
        let many = Flow::new(BackendKind::N8n, "b", "b").with_keywords(twelve_keywords);

        assert!((match_score(&two) - 0.6).abs() < 1e-9);
        assert!((match_score(&many) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn flow_matches_on_intent_name_or_table_keyword() {
        let f = flow(BackendKind::N8n, "a", &["creative", "goal"]);
        let table = vec!["creative".to_string(), "idea".to_string()];
        assert!(flow_matches(&f, "creative_guidance", &table));
        assert!(!flow_matches(&f, "document_search", &["search".to_string()]));

        // A flow naming the intent itself matches even without a table.
        let named = flow(BackendKind::N8n, "b", &["automation"]);
        assert!(flow_matches(&named, "automation", &[]));
    }

    #[test]
    fn best_matching_flow_prefers_higher_keyword_count() {
        let table = vec!["creative".to_string(), "goal".to_string()];
        let flows = vec![
            flow(BackendKind::N8n, "broad", &["creative"]),
            flow(BackendKind::N8n, "specific", &["creative", "goal", "idea"]),
        ];
        let best = best_matching_flow(&flows, "creative_guidance", &table).unwrap();
        assert_eq!(best.backend_flow_id, "specific");
    }

    #[test]
    fn equally_specific_flows_tie_break_on_id() {
        let table = vec!["creative".to_string()];
        let flows = vec![
            flow(BackendKind::N8n, "zeta", &["creative", "story"]),
            flow(BackendKind::N8n, "alpha", &["creative", "vision"]),
        ];
        let best = best_matching_flow(&flows, "creative_guidance", &table).unwrap();
        assert_eq!(best.backend_flow_id, "alpha");
    }

    #[test]
    fn composite_uses_canonical_three_factor_scheme() {
        let weights = RoutingWeights::default();
        let breakdown = ScoreBreakdown {
            match_score: 0.6,
            health_score: 1.0,
            performance_score: 0.5,
        };
        let composite = weights.composite(&breakdown, 0.0);
        assert!((composite - (0.5 * 0.6 + 0.3 + 0.2 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn capability_affinity_changes_nothing_when_disabled() {
        let weights = RoutingWeights::default();
        let breakdown = ScoreBreakdown {
            match_score: 0.6,
            health_score: 1.0,
            performance_score: 0.5,
        };
        assert_eq!(
            weights.composite(&breakdown, 0.0),
            weights.composite(&breakdown, 1.0)
        );
    }

    #[test]
    fn capability_affinity_rewards_matching_capability_when_enabled() {
        let weights = RoutingWeights {
            capability_affinity: true,
            ..Default::default()
        };
        let breakdown = ScoreBreakdown {
            match_score: 0.6,
            health_score: 1.0,
            performance_score: 0.5,
        };
        assert!(weights.composite(&breakdown, 1.0) > weights.composite(&breakdown, 0.0));
    }
}
