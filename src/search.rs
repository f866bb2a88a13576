//! Agentic search pipeline: search → grade → expand → cluster.
//!
//! The agent issues one similarity query against the external semantic
//! index, then walks the raw pool in similarity order, grading each
//! candidate with a fixed heuristic and short-circuiting once the target
//! count is accepted. Fragments below the word-count floor are expanded
//! with their parent's text before grading instead of being rejected
//! outright. Accepted results are labeled with a cheap source+time
//! cluster before being returned.
//!
//! Only the initial index call can fail. Grading and expansion never
//! error: malformed or empty candidate text simply grades poorly and is
//! rejected.
//!
//! The grading constants are a starting calibration, not a tuned model.

use std::time::{Duration, Instant};

use crate::error::SearchError;
use crate::index::{IndexQuery, SemanticIndex};
use crate::links::{self, DEFAULT_CLUSTER_WINDOW_DAYS};
use crate::models::{count_words, ContentNode, ContentQuality};
use crate::progress::{CancelFlag, SearchProgressReporter};

/// Agent configuration. Every field is independently overridable; the
/// defaults are the documented baseline.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Accepted results to collect before stopping.
    pub target_count: usize,
    /// Raw candidate pool size requested from the index.
    pub search_limit: usize,
    /// Acceptance floor for the overall grade, out of 5.
    pub min_quality: f64,
    /// Candidates below this word count are expanded or rejected.
    pub min_word_count: usize,
    /// Whether undersized candidates may borrow parent context.
    pub expand_context: bool,
    /// Maximum context segments stitched during expansion. The index
    /// returns at most one parent today, so values above 1 add nothing;
    /// 0 disables expansion entirely.
    pub context_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            target_count: 20,
            search_limit: 100,
            min_quality: 2.5,
            min_word_count: 30,
            expand_context: true,
            context_size: 2,
        }
    }
}

/// Pipeline phase, surfaced through progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Searching,
    Grading,
    Expanding,
    Clustering,
    Complete,
}

impl SearchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchPhase::Searching => "searching",
            SearchPhase::Grading => "grading",
            SearchPhase::Expanding => "expanding",
            SearchPhase::Clustering => "clustering",
            SearchPhase::Complete => "complete",
        }
    }
}

/// One progress event with running counts.
#[derive(Debug, Clone)]
pub struct SearchProgress {
    pub phase: SearchPhase,
    pub searched: usize,
    pub graded: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub target: usize,
    pub message: String,
}

/// One accepted, cluster-labeled result.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub node: ContentNode,
    pub similarity: f64,
    pub quality: ContentQuality,
    /// The combined parent+fragment text when expansion was used.
    pub expanded_context: Option<String>,
    pub cluster: String,
}

/// Outcome counters for one agent search.
#[derive(Debug, Clone)]
pub struct SearchStats {
    pub total_searched: usize,
    pub total_accepted: usize,
    pub total_rejected: usize,
    pub total_expanded: usize,
    pub clusters: usize,
    /// True when the raw pool ran out before `target_count` was reached.
    pub exhausted: bool,
    pub duration: Duration,
}

/// Results plus stats, the full return of [`SearchAgent::agent_search`].
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub stats: SearchStats,
}

/// Separator joining parent and fragment text during expansion.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

const GRADING_PROGRESS_EVERY: usize = 10;

// Grading calibration. Inherited as-is; see the module docs.
const SPECIFICITY_DIVISOR: f64 = 10.0;
const URL_RATIO_LIMIT: f64 = 0.3;
const RELEVANCE_WEIGHT: f64 = 0.5;

/// The search agent. Owns its index handle and configuration; stateless
/// between calls, so one agent serves any number of concurrent queries.
pub struct SearchAgent<I: SemanticIndex> {
    index: I,
    config: SearchConfig,
}

impl<I: SemanticIndex> SearchAgent<I> {
    pub fn new(index: I, config: SearchConfig) -> Self {
        Self { index, config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Raw similarity-ranked nodes, no grading, expansion, or clustering.
    pub async fn quick_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ContentNode>, SearchError> {
        let hits = self
            .index
            .search(&IndexQuery {
                query: query.to_string(),
                limit,
                threshold: 0.0,
                include_parent: false,
            })
            .await?;
        Ok(hits.into_iter().map(|h| h.node).collect())
    }

    /// Run the full search → grade → expand → cluster pipeline.
    pub async fn agent_search(
        &self,
        query: &str,
        reporter: &dyn SearchProgressReporter,
        cancel: &CancelFlag,
    ) -> Result<SearchOutcome, SearchError> {
        let started = Instant::now();
        let target = self.config.target_count;

        let progress = |phase: SearchPhase, searched, graded, accepted, rejected, message: &str| {
            reporter.report(&SearchProgress {
                phase,
                searched,
                graded,
                accepted,
                rejected,
                target,
                message: message.to_string(),
            });
        };

        progress(SearchPhase::Searching, 0, 0, 0, 0, "querying semantic index");
        let hits = self
            .index
            .search(&IndexQuery {
                query: query.to_string(),
                limit: self.config.search_limit,
                threshold: 0.0,
                include_parent: self.config.expand_context,
            })
            .await?;

        let total_searched = hits.len();
        if hits.is_empty() {
            progress(SearchPhase::Complete, 0, 0, 0, 0, "no raw results");
            return Ok(SearchOutcome {
                results: Vec::new(),
                stats: SearchStats {
                    total_searched: 0,
                    total_accepted: 0,
                    total_rejected: 0,
                    total_expanded: 0,
                    clusters: 0,
                    exhausted: true,
                    duration: started.elapsed(),
                },
            });
        }

        progress(
            SearchPhase::Grading,
            total_searched,
            0,
            0,
            0,
            "grading candidates",
        );

        let mut results: Vec<SearchResult> = Vec::new();
        let mut graded = 0usize;
        let mut rejected = 0usize;
        let mut expanded = 0usize;
        let mut cancelled = false;

        for hit in &hits {
            if results.len() >= target {
                break;
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let own_words = count_words(&hit.node.content.text);
            let (graded_text, used_expansion) = if own_words < self.config.min_word_count {
                let parent = hit
                    .parent
                    .as_ref()
                    .filter(|_| self.config.expand_context && self.config.context_size > 0);
                match parent {
                    Some(parent) => {
                        let combined = format!(
                            "{}{}{}",
                            parent.content.text, CONTEXT_SEPARATOR, hit.node.content.text
                        );
                        if count_words(&combined) >= self.config.min_word_count {
                            (combined, true)
                        } else {
                            // Even with context the fragment is too small.
                            rejected += 1;
                            continue;
                        }
                    }
                    None => {
                        rejected += 1;
                        continue;
                    }
                }
            } else {
                (hit.node.content.text.clone(), false)
            };

            graded += 1;
            if used_expansion {
                expanded += 1;
            }
            let quality = grade(&graded_text, query);
            if quality.overall >= self.config.min_quality {
                results.push(SearchResult {
                    node: hit.node.clone(),
                    similarity: hit.similarity,
                    quality,
                    expanded_context: used_expansion.then_some(graded_text),
                    cluster: String::new(),
                });
            } else {
                rejected += 1;
            }

            if graded % GRADING_PROGRESS_EVERY == 0 {
                progress(
                    SearchPhase::Grading,
                    total_searched,
                    graded,
                    results.len(),
                    rejected,
                    "grading candidates",
                );
            }
        }

        progress(
            SearchPhase::Expanding,
            total_searched,
            graded,
            results.len(),
            rejected,
            "expansion folded into grading",
        );
        progress(
            SearchPhase::Clustering,
            total_searched,
            graded,
            results.len(),
            rejected,
            "labeling clusters",
        );

        let nodes: Vec<ContentNode> = results.iter().map(|r| r.node.clone()).collect();
        let labels = links::cluster(
            &nodes,
            chrono::Duration::days(DEFAULT_CLUSTER_WINDOW_DAYS),
        );
        for result in &mut results {
            result.cluster = labels
                .get(&result.node.id)
                .cloned()
                .unwrap_or_else(|| format!("{}-0", result.node.source.source_type));
        }
        let clusters = {
            let mut distinct: Vec<&str> = results.iter().map(|r| r.cluster.as_str()).collect();
            distinct.sort_unstable();
            distinct.dedup();
            distinct.len()
        };

        let exhausted = !cancelled && results.len() < target;
        let stats = SearchStats {
            total_searched,
            total_accepted: results.len(),
            total_rejected: rejected,
            total_expanded: expanded,
            clusters,
            exhausted,
            duration: started.elapsed(),
        };
        progress(
            SearchPhase::Complete,
            total_searched,
            graded,
            results.len(),
            rejected,
            "search complete",
        );

        Ok(SearchOutcome { results, stats })
    }
}

/// Grade a candidate text against a query. Pure and deterministic; never
/// fails — degenerate input just grades poorly.
pub fn grade(text: &str, query: &str) -> ContentQuality {
    let words = count_words(text);
    let sentences = sentence_count(text);
    let avg_sentence_len = if sentences == 0 {
        0.0
    } else {
        words as f64 / sentences as f64
    };

    let specificity = (1.0 + avg_sentence_len / SPECIFICITY_DIVISOR).min(5.0);
    let coherence = if sentences >= 2 && avg_sentence_len > 5.0 {
        4.0
    } else if sentences >= 1 {
        3.0
    } else {
        2.0
    };
    let substance = if words >= 30 && url_char_ratio(text) < URL_RATIO_LIMIT {
        4.0
    } else if words >= 15 {
        3.0
    } else {
        2.0
    };

    let relevance = relevance_bonus(text, query);
    let overall = ((specificity + coherence + substance) / 3.0 + relevance).min(5.0);
    ContentQuality {
        overall: (overall * 10.0).round() / 10.0,
        specificity,
        coherence,
        substance,
    }
}

fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
}

/// Share of non-whitespace characters that belong to URL-like tokens.
fn url_char_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut url = 0usize;
    for token in text.split_whitespace() {
        total += token.chars().count();
        if token.starts_with("http://") || token.starts_with("https://") || token.starts_with("www.")
        {
            url += token.chars().count();
        }
    }
    if total == 0 {
        0.0
    } else {
        url as f64 / total as f64
    }
}

/// `0.5 × (matched query terms / total query terms)`, case-insensitive
/// substring match per term.
fn relevance_bonus(text: &str, query: &str) -> f64 {
    let text_lower = text.to_lowercase();
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let matched = terms.iter().filter(|t| text_lower.contains(t.as_str())).count();
    RELEVANCE_WEIGHT * matched as f64 / terms.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexHit;
    use crate::models::{ContentFormat, NodeContent, NodeMetadata};
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct FakeIndex {
        hits: Vec<IndexHit>,
    }

    #[async_trait]
    impl SemanticIndex for FakeIndex {
        async fn search(&self, query: &IndexQuery) -> Result<Vec<IndexHit>, SearchError> {
            let mut hits = self.hits.clone();
            hits.truncate(query.limit);
            Ok(hits)
        }
    }

    fn node(offset: u64, text: &str) -> ContentNode {
        ContentNode::assemble(
            "chatgpt",
            "chatgpt",
            "conv-grade",
            offset,
            NodeContent {
                text: text.to_string(),
                format: ContentFormat::Plain,
            },
            NodeMetadata::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
        )
    }

    fn substantive(repeats: usize) -> String {
        "This fragment carries enough meaningful words to pass grading easily. "
            .repeat(repeats)
            .trim_end()
            .to_string()
    }

    fn hit(offset: u64, text: &str, similarity: f64) -> IndexHit {
        IndexHit {
            node: node(offset, text),
            similarity,
            parent: None,
        }
    }

    #[test]
    fn grading_is_deterministic_and_pinned() {
        // 2 sentences, 42 words, no URLs, both query terms present:
        // specificity 3.1, coherence 4, substance 4, bonus 0.5 -> 4.2.
        let sentence = "alpha beta gamma delta epsilon zeta eta theta iota kappa \
                        lambda mu nu xi omicron pi rho sigma tau refund";
        let text = format!("{} one. {} policy.", sentence, sentence);
        assert_eq!(count_words(&text), 42);

        let a = grade(&text, "refund policy");
        let b = grade(&text, "refund policy");
        assert_eq!(a.overall, b.overall);
        assert_eq!(a.specificity, b.specificity);
        assert!((a.specificity - 3.1).abs() < 1e-9);
        assert_eq!(a.coherence, 4.0);
        assert_eq!(a.substance, 4.0);
        assert_eq!(a.overall, 4.2);
    }

    #[test]
    fn degenerate_text_grades_low_without_panicking() {
        for text in ["", "   ", "ok.", "no sentence terminator"] {
            let q = grade(text, "anything");
            assert!(q.overall < 2.5, "{:?} should grade below the floor", text);
        }
    }

    #[test]
    fn url_spam_loses_substance() {
        let urls = "https://a.example/x https://b.example/y https://c.example/z ";
        let text = format!(
            "{} look at these links now please and more filler words here too",
            urls.repeat(6)
        );
        assert!(count_words(&text) >= 30, "word count alone would earn a 4");
        let q = grade(&text, "links");
        assert_eq!(q.substance, 3.0, "URL-heavy text is capped");
    }

    #[test]
    fn relevance_bonus_counts_matched_terms() {
        assert!((relevance_bonus("the refund policy is strict", "refund policy") - 0.5).abs() < 1e-9);
        assert!((relevance_bonus("the refund is strict", "refund policy") - 0.25).abs() < 1e-9);
        assert_eq!(relevance_bonus("nothing relevant", "refund policy"), 0.0);
        assert_eq!(relevance_bonus("anything", ""), 0.0);
    }

    #[tokio::test]
    async fn empty_pool_completes_exhausted() {
        let agent = SearchAgent::new(FakeIndex { hits: vec![] }, SearchConfig::default());
        let outcome = agent
            .agent_search("anything", &NoProgress, &CancelFlag::new())
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
        assert!(outcome.stats.exhausted);
        assert_eq!(outcome.stats.total_searched, 0);
    }

    #[tokio::test]
    async fn target_count_short_circuits_grading() {
        let hits: Vec<IndexHit> = (0..30)
            .map(|i| hit(i, &substantive(4), 1.0 - i as f64 / 100.0))
            .collect();
        let agent = SearchAgent::new(
            FakeIndex { hits },
            SearchConfig {
                target_count: 3,
                ..Default::default()
            },
        );
        let outcome = agent
            .agent_search("meaningful words", &NoProgress, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 3);
        assert!(!outcome.stats.exhausted, "pool was not consumed");
        // Results keep similarity order.
        assert!(outcome.results[0].similarity > outcome.results[2].similarity);
        assert!(outcome.results.iter().all(|r| !r.cluster.is_empty()));
    }

    #[tokio::test]
    async fn undersized_without_parent_is_rejected_ungraded() {
        let hits = vec![hit(0, "tiny fragment", 0.9), hit(1, &substantive(4), 0.8)];
        let agent = SearchAgent::new(FakeIndex { hits }, SearchConfig::default());
        let outcome = agent
            .agent_search("meaningful", &NoProgress, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(outcome.stats.total_accepted, 1);
        assert_eq!(outcome.stats.total_rejected, 1);
        assert_eq!(outcome.stats.total_expanded, 0);
        assert!(outcome.stats.exhausted, "pool consumed below target");
    }

    #[tokio::test]
    async fn undersized_with_parent_is_expanded() {
        let parent = node(100, &substantive(4));
        let mut fragment = hit(0, "short but in context", 0.95);
        fragment.parent = Some(parent);

        let agent = SearchAgent::new(
            FakeIndex {
                hits: vec![fragment],
            },
            SearchConfig::default(),
        );
        let outcome = agent
            .agent_search("meaningful words", &NoProgress, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(outcome.stats.total_expanded, 1);
        assert_eq!(outcome.stats.total_accepted, 1);
        let expanded = outcome.results[0].expanded_context.as_ref().unwrap();
        assert!(expanded.contains(CONTEXT_SEPARATOR));
        assert!(expanded.ends_with("short but in context"));
    }

    #[tokio::test]
    async fn oversized_candidate_is_graded_unmodified() {
        let parent = node(100, &substantive(6));
        let mut big = hit(0, &substantive(4), 0.9);
        big.parent = Some(parent);

        let agent = SearchAgent::new(FakeIndex { hits: vec![big] }, SearchConfig::default());
        let outcome = agent
            .agent_search("meaningful", &NoProgress, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(outcome.stats.total_expanded, 0);
        assert!(outcome.results[0].expanded_context.is_none());
    }

    #[tokio::test]
    async fn cancellation_returns_partial_not_exhausted() {
        let hits: Vec<IndexHit> = (0..10).map(|i| hit(i, &substantive(4), 0.9)).collect();
        let agent = SearchAgent::new(FakeIndex { hits }, SearchConfig::default());

        let cancel = CancelFlag::new();
        cancel.cancel();
        let outcome = agent
            .agent_search("meaningful", &NoProgress, &cancel)
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
        assert!(!outcome.stats.exhausted);
    }

    #[tokio::test]
    async fn context_size_zero_disables_expansion() {
        let parent = node(100, &substantive(4));
        let mut fragment = hit(0, "short but in context", 0.95);
        fragment.parent = Some(parent);

        let agent = SearchAgent::new(
            FakeIndex {
                hits: vec![fragment],
            },
            SearchConfig {
                context_size: 0,
                ..Default::default()
            },
        );
        let outcome = agent
            .agent_search("meaningful", &NoProgress, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(outcome.stats.total_expanded, 0);
        assert_eq!(outcome.stats.total_rejected, 1);
    }
}
