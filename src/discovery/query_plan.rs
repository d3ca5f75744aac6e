//! Ordered, deduplicated search query plan for one topic

use super::normalize::normalize_title;
use super::suggest::Suggestions;
use std::collections::HashSet;

/// Suffixes appended to the first token and to the underscored topic
pub const DOMAIN_SUFFIXES: [&str; 6] = ["group", "chat", "prep", "community", "uz", "official"];

/// Tokens too generic to count as topic keywords
const GENERIC_TOKENS: [&str; 14] = [
    "group", "chat", "prep", "community", "uz", "official", "guruh", "rasmiy", "the", "and", "for",
    "of", "in", "va",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    /// Queries in execution order
    pub queries: Vec<String>,
    /// Topic keyword tokens used for about-text overlap and the username bonus
    pub keyword_tokens: Vec<String>,
}

pub fn is_generic_token(token: &str) -> bool {
    GENERIC_TOKENS.contains(&token)
}

/// Build the plan for `raw`, capped at `max_queries`
///
/// Order: raw, normalized, underscored, concatenated, leading two-token
/// forms, suggested usernames and keywords, single tokens (3+ chars),
/// suffix variants, suggested variations.
pub fn build_plan(raw: &str, suggestions: &Suggestions, max_queries: usize) -> QueryPlan {
    let normalized = normalize_title(raw);
    let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();

    let mut ordered: Vec<String> = Vec::new();
    ordered.push(raw.trim().to_string());
    ordered.push(normalized.clone());

    let underscored = tokens.join("_");
    ordered.push(underscored.clone());
    ordered.push(tokens.concat());

    if tokens.len() >= 2 {
        let lead = &tokens[..2];
        ordered.push(lead.join(" "));
        ordered.push(lead.join("_"));
        ordered.push(lead.concat());
    }

    ordered.extend(suggestions.usernames.iter().cloned());
    ordered.extend(suggestions.keywords.iter().cloned());

    ordered.extend(tokens.iter().filter(|t| t.chars().count() >= 3).map(|t| t.to_string()));

    if let Some(first) = tokens.first() {
        ordered.extend(DOMAIN_SUFFIXES.iter().map(|s| format!("{}_{}", first, s)));
    }
    if tokens.len() >= 2 {
        ordered.extend(DOMAIN_SUFFIXES.iter().map(|s| format!("{}_{}", underscored, s)));
    }

    ordered.extend(suggestions.variations.iter().cloned());

    let mut seen = HashSet::new();
    let queries: Vec<String> = ordered
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_lowercase()))
        .take(max_queries)
        .collect();

    let mut token_seen = HashSet::new();
    let keyword_tokens = tokens
        .iter()
        .map(|t| t.to_string())
        .chain(
            suggestions
                .keywords
                .iter()
                .flat_map(|k| normalize_title(k).split(' ').map(str::to_string).collect::<Vec<_>>()),
        )
        .filter(|t| t.chars().count() >= 2 && !is_generic_token(t))
        .filter(|t| token_seen.insert(t.clone()))
        .collect();

    QueryPlan { queries, keyword_tokens }
}
