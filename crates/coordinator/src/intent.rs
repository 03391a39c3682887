//! Keyword-table intent classification.
//!
//! Classification is pure and synchronous: an ordered table of intent ->
//! keyword set, scored by keyword overlap. Ties resolve by table order
//! (first-defined wins) — deterministic but arbitrary, so the default
//! table lists more specific intents first.

use serde::{Deserialize, Serialize};

/// Intent the classifier falls back to when nothing matches.
pub const DEFAULT_INTENT: &str = "conversation";

/// A resolved intent with the classifier's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentMatch {
    pub intent: String,

    /// In [0.5, 0.95] for classified intents; exactly 1.0 for explicit
    /// caller-supplied overrides.
    pub confidence: f64,
}

impl IntentMatch {
    /// An explicit caller-supplied intent always carries confidence 1.0.
    pub fn explicit(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            confidence: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
struct IntentEntry {
    intent: String,
    keywords: Vec<String>,
}

/// Maps question text to an intent by keyword-table lookup.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    table: Vec<IntentEntry>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::with_table(vec![
            (
                "creative_guidance",
                vec![
                    "creative", "goal", "idea", "inspire", "brainstorm", "imagine", "vision",
                    "story",
                ],
            ),
            (
                "document_search",
                vec![
                    "search", "document", "find", "lookup", "retrieve", "knowledge", "file",
                    "reference",
                ],
            ),
            (
                "data_analysis",
                vec![
                    "analyze", "data", "report", "metric", "chart", "trend", "statistic",
                    "summary",
                ],
            ),
            (
                "automation",
                vec![
                    "automate", "trigger", "schedule", "pipeline", "batch", "job", "deploy",
                ],
            ),
            (
                "integration",
                vec!["integrate", "connect", "sync", "webhook", "export", "import"],
            ),
            (
                DEFAULT_INTENT,
                vec!["chat", "talk", "hello", "help", "question", "explain"],
            ),
        ])
    }
}

impl IntentClassifier {
    /// Build a classifier from an ordered intent table. Order matters:
    /// ties resolve to the first-defined intent.
    pub fn with_table(table: Vec<(&str, Vec<&str>)>) -> Self {
        Self {
            table: table
                .into_iter()
                .map(|(intent, keywords)| IntentEntry {
                    intent: intent.to_string(),
                    keywords: keywords.into_iter().map(str::to_lowercase).collect(),
                })
                .collect(),
        }
    }

    /// Classify a question into an intent.
    ///
    /// Per intent, `score = matches / |keywords|`; confidence is
    /// `0.5 + 0.45 * score`, bounding results to [0.5, 0.95]. A question
    /// with zero keyword overlap everywhere classifies as
    /// [`DEFAULT_INTENT`] at exactly 0.5.
    pub fn classify(&self, question: &str) -> IntentMatch {
        let lower = question.to_lowercase();

        let mut best: Option<(&IntentEntry, f64)> = None;
        for entry in &self.table {
            if entry.keywords.is_empty() {
                continue;
            }
            let matches = entry
                .keywords
                .iter()
                .filter(|keyword| lower.contains(keyword.as_str()))
                .count();
            let score = matches as f64 / entry.keywords.len() as f64;
            if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((entry, score));
            }
        }

        match best {
            Some((entry, score)) => IntentMatch {
                intent: entry.intent.clone(),
                confidence: (0.5 + 0.45 * score).clamp(0.5, 0.95),
            },
            None => IntentMatch {
                intent: DEFAULT_INTENT.to_string(),
                confidence: 0.5,
            },
        }
    }

    /// The keyword set for an intent, used by the router to decide whether
    /// a flow covers that intent. `None` for intents outside the table
    /// (e.g. a free-form explicit override).
    pub fn keywords_for(&self, intent: &str) -> Option<&[String]> {
        self.table
            .iter()
            .find(|entry| entry.intent == intent)
            .map(|entry| entry.keywords.as_slice())
    }

    /// Intents in table order.
    pub fn intents(&self) -> Vec<&str> {
        self.table.iter().map(|entry| entry.intent.as_str()).collect()
    }
}
