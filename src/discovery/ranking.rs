//! Candidate scoring against the intended topic

use super::normalize::normalize_title;
use crate::telegram::Candidate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

const USERNAME_WEIGHT: f64 = 0.45;
const TITLE_WEIGHT: f64 = 0.30;
const JACCARD_WEIGHT: f64 = 0.15;
const ABOUT_WEIGHT: f64 = 0.10;
const USERNAME_KEYWORD_BONUS: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
    /// Served from local persistence without searching
    Cached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub candidate: Candidate,
    pub score: f64,
    pub confidence: Confidence,
    pub matched_query: String,
}

pub struct CandidateScorer {
    medium_threshold: f64,
    high_threshold: f64,
}

impl CandidateScorer {
    pub fn new(medium_threshold: f64, high_threshold: f64) -> Self {
        Self {
            medium_threshold,
            high_threshold,
        }
    }

    pub fn band(&self, score: f64) -> Confidence {
        if score < self.medium_threshold {
            Confidence::Low
        } else if score < self.high_threshold {
            Confidence::Medium
        } else {
            Confidence::High
        }
    }

    /// Score one candidate against one query (0.0-1.0)
    ///
    /// # Factors
    /// - Username: exact match after stripping separators returns 1.0 outright;
    ///   a substring match is 0.9; otherwise the fuzzy ratio
    /// - Title: token-sort fuzzy ratio of normalized titles
    /// - Token Jaccard between query and title
    /// - About text: share of topic keywords present (saturates at 3 hits)
    pub fn score(&self, query: &str, keyword_tokens: &[String], candidate: &Candidate) -> f64 {
        let query_title = normalize_title(query);
        let query_compact = strip_separators(&query_title);

        let username_score = match candidate.username.as_deref() {
            Some(username) => {
                let compact = strip_separators(username);
                if !compact.is_empty() && compact == query_compact {
                    return 1.0;
                }
                if query_compact.chars().count() >= 3 && compact.contains(&query_compact) {
                    0.9
                } else {
                    ratio(&query_compact, &compact)
                }
            }
            None => 0.0,
        };

        let title_norm = candidate.title.as_deref().map(normalize_title).unwrap_or_default();
        let title_score = token_sort_ratio(&query_title, &title_norm);
        let jaccard_score = jaccard(&query_title, &title_norm);
        let about_score = candidate
            .about
            .as_deref()
            .map(|about| about_overlap(keyword_tokens, about))
            .unwrap_or(0.0);

        let mut total = USERNAME_WEIGHT * username_score
            + TITLE_WEIGHT * title_score
            + JACCARD_WEIGHT * jaccard_score
            + ABOUT_WEIGHT * about_score;

        if let Some(username) = candidate.username.as_deref() {
            if keyword_tokens
                .iter()
                .any(|token| token.chars().count() >= 3 && username.contains(token.as_str()))
            {
                total += USERNAME_KEYWORD_BONUS;
            }
        }

        total.clamp(0.0, 1.0)
    }

    /// Rank unique candidates by their best score over `queries`
    pub fn rank(&self, queries: &[String], keyword_tokens: &[String], candidates: &[Candidate]) -> Vec<RankedResult> {
        let mut seen = HashSet::new();
        let mut ranked: Vec<RankedResult> = candidates
            .iter()
            .filter(|c| seen.insert(c.entity_id))
            .map(|candidate| {
                let (score, matched_query) = queries
                    .iter()
                    .map(|q| (self.score(q, keyword_tokens, candidate), q))
                    .fold((0.0_f64, String::new()), |best, (score, q)| {
                        if score > best.0 || best.1.is_empty() {
                            (score, q.clone())
                        } else {
                            best
                        }
                    });

                RankedResult {
                    candidate: candidate.clone(),
                    score,
                    confidence: self.band(score),
                    matched_query,
                }
            })
            .collect();

        ranked.sort_by(compare_ranked);
        ranked
    }
}

/// Score descending, then candidates with a username first
pub fn compare_ranked(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.candidate.username.is_some().cmp(&a.candidate.username.is_some()))
        .then_with(|| a.candidate.entity_id.cmp(&b.candidate.entity_id))
}

fn strip_separators(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase()
}

/// Normalized Levenshtein similarity; an empty side never matches
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b)
}

/// `ratio` after sorting whitespace tokens of both sides
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    fn sorted(s: &str) -> String {
        let mut tokens: Vec<&str> = s.split_whitespace().collect();
        tokens.sort_unstable();
        tokens.join(" ")
    }
    ratio(&sorted(a), &sorted(b))
}

pub fn jaccard(a: &str, b: &str) -> f64 {
    let a: HashSet<&str> = a.split_whitespace().collect();
    let b: HashSet<&str> = b.split_whitespace().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

fn about_overlap(keyword_tokens: &[String], about: &str) -> f64 {
    if keyword_tokens.is_empty() {
        return 0.0;
    }
    let about_norm = normalize_title(about);
    let about_tokens: HashSet<&str> = about_norm.split_whitespace().collect();
    let hits = keyword_tokens
        .iter()
        .filter(|t| about_tokens.contains(t.as_str()))
        .count();
    let denominator = keyword_tokens.len().min(3);
    (hits as f64 / denominator as f64).min(1.0)
}

/// Merge fresh rankings into an accumulator keeping each entity's best entry
pub fn merge_best(acc: &mut HashMap<i64, RankedResult>, fresh: Vec<RankedResult>) {
    for result in fresh {
        match acc.get(&result.candidate.entity_id) {
            Some(existing) if existing.score >= result.score => {}
            _ => {
                acc.insert(result.candidate.entity_id, result);
            }
        }
    }
}
