//! Deterministic query-complexity classifier.
//!
//! Pure pattern matching, no LLM call and no failure mode: every query
//! classifies to something, worst case `QueryType::Simple` with low
//! confidence. Signal regexes and the scoring algorithm are grounded on
//! the reference classifier.

use lazy_static::lazy_static;
use regex::Regex;

use crate::schemas::{ClassificationResult, QueryType};

const COMPLEXITY_THRESHOLD: f64 = 0.4;

struct SignalSet {
    query_type: QueryType,
    patterns: &'static [&'static str],
}

static RELATIONSHIP_PATTERNS: &[&str] = &[
    r"(?i)\bwhile\b.*\bwhat\b",
    r"(?i)\bwhen\b.*\bwhat\b",
    r"(?i)\bduring\b.*\bwhat\b",
    r"(?i)\balongside\b",
    r"(?i)\btogether with\b",
    r"(?i)\bat the same time\b",
    r"(?i)\blistening to\b.*\bwhile\b",
    r"(?i)\bwatching\b.*\bwhile\b",
    r"(?i)\bwhat\b.*\bwhen\b.*\bwas\b",
];

static COMPARISON_PATTERNS: &[&str] = &[
    r"(?i)\bcompare\b",
    r"(?i)\bvs\b|\bversus\b",
    r"(?i)\bdifference between\b",
    r"(?i)\bchanged over\b",
    r"(?i)\bhow\b.*\bchanged\b",
    r"(?i)\bfrom\b.*\bto\b.*\bperiod\b",
    r"(?i)\blast (week|month|year)\b.*\bthis (week|month|year)\b",
    r"(?i)\bjanuary\b.*\bvs\b",
];

static MEMORY_RECALL_PATTERNS: &[&str] = &[
    r"(?i)\bi remember\b",
    r"(?i)\bthere was\b.*\babout\b",
    r"(?i)\bsomething about\b",
    r"(?i)\bwhat was it\b",
    r"(?i)\bwhat did i learn\b",
    r"(?i)\bcan'?t recall\b",
    r"(?i)\btrying to remember\b",
    r"(?i)\bwhat was the\b.*\bthat\b",
];

static CORRELATION_PATTERNS: &[&str] = &[
    r"(?i)\bpattern\b",
    r"(?i)\busually\b",
    r"(?i)\btend to\b",
    r"(?i)\bafter\b.*\bdo i\b",
    r"(?i)\bbefore\b.*\bdo i\b",
    r"(?i)\btypically\b",
    r"(?i)\bwhat do i (usually|typically)\b",
    r"(?i)\bis there a (pattern|correlation)\b",
    r"(?i)\bhow often\b",
];

static WEB_AUGMENTED_PATTERNS: &[&str] = &[
    r"(?i)\blatest\b",
    r"(?i)\bcurrent\b.*\b(news|events|developments)\b",
    r"(?i)\brecent news\b",
    r"(?i)\bsince then\b",
    r"(?i)\bdevelopments\b",
    r"(?i)\bwhat (is|are) the (latest|current)\b",
    r"(?i)\bwhat happened\b.*\bworld\b",
    r"(?i)\bconnect\b.*\bwith current\b",
];

static MULTI_ENTITY_PATTERNS: &[&str] = &[
    r"(?i)\bboth\b.*\band\b",
    r"(?i)\brelationship between\b",
    r"(?i)\bhow are\b.*\brelated\b",
    r"(?i)\bconnection between\b",
    r"(?i)\w+ and \w+ (together|related)",
];

static SIMPLE_PATTERNS: &[&str] = &[
    r"(?i)^what did i do (today|yesterday|this week)\??$",
    r"(?i)^(tell me )?about \w+\??$",
    r"(?i)^what\s+(?:apps?|sites?|topics?)\b",
    r"(?i)^what\s+(?:most|top)\s+(?:apps?|sites?|topics?)\b",
    r"(?i)^summary\s+of\s+(?:today|yesterday|this\s+week)\b",
];

lazy_static! {
    // Declaration order doubles as priority order: ties in score are
    // broken in favor of whichever type appears first here.
    static ref SIGNAL_SETS: Vec<SignalSet> = vec![
        SignalSet { query_type: QueryType::Relationship, patterns: RELATIONSHIP_PATTERNS },
        SignalSet { query_type: QueryType::Comparison, patterns: COMPARISON_PATTERNS },
        SignalSet { query_type: QueryType::MemoryRecall, patterns: MEMORY_RECALL_PATTERNS },
        SignalSet { query_type: QueryType::Correlation, patterns: CORRELATION_PATTERNS },
        SignalSet { query_type: QueryType::WebAugmented, patterns: WEB_AUGMENTED_PATTERNS },
        SignalSet { query_type: QueryType::MultiEntity, patterns: MULTI_ENTITY_PATTERNS },
    ];
}

fn signal_sets() -> &'static [SignalSet] {
    &SIGNAL_SETS
}

fn compiled(patterns: &'static [&'static str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).expect("pattern is a static, tested literal")).collect()
}

/// Stateless regex-based query classifier.
///
/// Construction pre-compiles every signal set; a `Classifier` is cheap to
/// clone (an `Arc` internally) and safe to share across tasks.
#[derive(Clone)]
pub struct Classifier {
    inner: std::sync::Arc<CompiledSignals>,
}

struct CompiledSignals {
    complexity: Vec<(QueryType, Vec<Regex>)>,
    simple: Vec<Regex>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        let complexity = signal_sets().iter().map(|set| (set.query_type, compiled(set.patterns))).collect();
        let simple = compiled(SIMPLE_PATTERNS);
        Self { inner: std::sync::Arc::new(CompiledSignals { complexity, simple }) }
    }

    /// Classify a query.
    ///
    /// A simple-signal match short-circuits with high confidence. Otherwise
    /// every complexity signal set is scored as `min(1.0, matches * 0.4)`
    /// and the highest-scoring type wins, ties going to the
    /// first-declared type; a query is complex only once its best score
    /// clears [`COMPLEXITY_THRESHOLD`].
    pub fn classify(&self, query: &str) -> ClassificationResult {
        let query = query.trim();

        for pattern in &self.inner.simple {
            if pattern.is_match(query) {
                return ClassificationResult {
                    is_complex: false,
                    query_type: QueryType::Simple,
                    confidence: 0.9,
                    signals: vec!["simple_pattern_match".to_string()],
                    reasoning: "Query matches simple pattern, no agentic processing needed".to_string(),
                };
            }
        }

        let mut detected_signals: Vec<String> = Vec::new();
        let mut type_scores: Vec<(QueryType, f64)> = Vec::new();

        for (query_type, patterns) in &self.inner.complexity {
            let mut matches = 0u32;
            for pattern in patterns {
                if pattern.is_match(query) {
                    matches += 1;
                    detected_signals.push(format!("{query_type:?}:{}", pattern.as_str()));
                }
            }
            if matches > 0 {
                type_scores.push((*query_type, (matches as f64 * 0.4).min(1.0)));
            }
        }

        // Fold instead of `max_by`/`max_by_key`: those return the LAST
        // maximal element on a tie, but ties must go to whichever type is
        // declared first (`type_scores` is already in declaration order).
        let mut best: Option<(QueryType, f64)> = None;
        for &(query_type, score) in &type_scores {
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((query_type, score));
            }
        }
        let Some((best_type, best_score)) = best else {
            return ClassificationResult {
                is_complex: false,
                query_type: QueryType::Simple,
                confidence: 0.7,
                signals: Vec::new(),
                reasoning: "No complexity signals detected".to_string(),
            };
        };

        let is_complex = best_score >= COMPLEXITY_THRESHOLD;
        let reasoning = if is_complex {
            format!("Detected {best_type:?} query with {} signal(s)", detected_signals.len())
        } else {
            format!("Low confidence ({best_score:.2}) for {best_type:?} classification")
        };
        detected_signals.truncate(5);

        ClassificationResult {
            is_complex,
            query_type: if is_complex { best_type } else { QueryType::Simple },
            confidence: best_score,
            signals: detected_signals,
            reasoning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_relationship_query() {
        let c = Classifier::new();
        let result = c.classify("What was I watching while working on the report?");
        assert!(result.is_complex);
        assert_eq!(result.query_type, QueryType::Relationship);
    }

    #[test]
    fn detects_comparison_query() {
        let c = Classifier::new();
        let result = c.classify("Compare this week to last week");
        assert!(result.is_complex);
        assert_eq!(result.query_type, QueryType::Comparison);
    }

    #[test]
    fn detects_memory_recall_query() {
        let c = Classifier::new();
        let result = c.classify("I remember there was something about quantum physics, what was it?");
        assert_eq!(result.query_type, QueryType::MemoryRecall);
    }

    #[test]
    fn detects_correlation_query() {
        let c = Classifier::new();
        let result = c.classify("Is there a pattern to when I usually tend to procrastinate?");
        assert_eq!(result.query_type, QueryType::Correlation);
    }

    #[test]
    fn detects_web_augmented_query() {
        let c = Classifier::new();
        let result = c.classify("What's the latest news on current AI developments?");
        assert_eq!(result.query_type, QueryType::WebAugmented);
    }

    #[test]
    fn simple_pattern_short_circuits_even_with_complexity_signals() {
        let c = Classifier::new();
        let result = c.classify("what apps did I use while listening to music?");
        assert!(!result.is_complex);
        assert_eq!(result.query_type, QueryType::Simple);
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn ties_are_broken_by_first_declared_type() {
        let c = Classifier::new();
        // "alongside" scores relationship 0.4; "compare" scores comparison
        // 0.4. Relationship is declared first and must win the tie.
        let result = c.classify("alongside compare");
        assert_eq!(result.query_type, QueryType::Relationship);
    }

    #[test]
    fn falls_back_to_simple_default_when_nothing_matches() {
        let c = Classifier::new();
        let result = c.classify("blah");
        assert!(!result.is_complex);
        assert_eq!(result.query_type, QueryType::Simple);
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn single_signal_match_scores_at_the_complexity_threshold() {
        let c = Classifier::new();
        let result = c.classify("alongside");
        assert!(result.is_complex);
        assert_eq!(result.confidence, 0.4);
    }

    #[test]
    fn signals_are_capped_at_five() {
        let c = Classifier::new();
        let result = c.classify("while what when what was during what alongside together with at the same time");
        assert!(result.signals.len() <= 5);
    }
}
