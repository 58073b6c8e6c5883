use crate::task::types::Task;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Decomposition-worthiness signals, each in `[0, 100]`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub struct ComplexityScore {
    pub lexical: f64,
    pub semantic: f64,
    pub scope: f64,
    pub total: f64,
}

/// Scores a task's decomposition-worthiness
pub trait ComplexityEstimator: Send + Sync {
    fn analyze_complexity(&self, task: &Task) -> ComplexityScore;
}

impl ComplexityScore {
    /// Build a score from its components, clamping each to `[0, 100]`
    pub fn from_components(lexical: f64, semantic: f64, scope: f64) -> Self {
        let lexical = lexical.clamp(0.0, 100.0);
        let semantic = semantic.clamp(0.0, 100.0);
        let scope = scope.clamp(0.0, 100.0);
        let total = (lexical * 0.3 + semantic * 0.4 + scope * 0.3).clamp(0.0, 100.0);
        Self {
            lexical,
            semantic,
            scope,
            total,
        }
    }

    /// A score with the given total and matching components
    pub fn uniform(total: f64) -> Self {
        Self::from_components(total, total, total)
    }
}

static COMPLEX_ACTIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(implement|create|build|develop|design|refactor|migrate|integrate|optimi[sz]e|architect|research|analy[sz]e|investigate|study)\w*",
    )
    .unwrap()
});

static DOMAIN_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(system|service|api|database|authentication|security|pipeline|infrastructure|distributed|concurren\w*|protocol|framework|architecture)\b",
    )
    .unwrap()
});

static SCOPE_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(,|;|\band\b|\bthen\b|\b(?:step|phase|stage)\b)").unwrap());

/// Keyword and shape based estimator; no external calls
#[derive(Debug, Clone, Default)]
pub struct HeuristicComplexityEstimator;

impl HeuristicComplexityEstimator {
    pub fn new() -> Self {
        Self
    }

    fn lexical(description: &str) -> f64 {
        let words: Vec<&str> = description.split_whitespace().collect();
        let long_words = words.iter().filter(|w| w.len() > 8).count();
        words.len() as f64 * 2.5 + long_words as f64 * 4.0
    }

    fn semantic(description: &str) -> f64 {
        let actions = COMPLEX_ACTIONS.find_iter(description).count();
        let domain = DOMAIN_TERMS.find_iter(description).count();
        actions as f64 * 30.0 + domain as f64 * 15.0
    }

    fn scope(description: &str) -> f64 {
        let markers = SCOPE_MARKERS.find_iter(description).count();
        let sentences = description
            .split(['.', '\n'])
            .filter(|s| !s.trim().is_empty())
            .count();
        markers as f64 * 20.0 + sentences.saturating_sub(1) as f64 * 15.0
    }
}

impl ComplexityEstimator for HeuristicComplexityEstimator {
    fn analyze_complexity(&self, task: &Task) -> ComplexityScore {
        let description = task.description.to_lowercase();
        ComplexityScore::from_components(
            Self::lexical(&description),
            Self::semantic(&description),
            Self::scope(&description),
        )
    }
}
