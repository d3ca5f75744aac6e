//! Keyword suggestion strategies
//!
//! The discovery pipeline and keyword evolution ask a `SuggestionStrategy`
//! for extra search terms. `Ai` delegates to a `KeywordSuggester` (the
//! production one is `LlmSuggester`, an OpenAI-compatible chat completions
//! client) and falls back to the rule-based generator whenever the suggester
//! errors or returns nothing. Nothing downstream depends on the AI path
//! succeeding.

use crate::config::SuggesterConfig;
use crate::discovery::normalize::{normalize_username, username_form};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SuggestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("suggester API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("unparseable suggester response: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestions {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub usernames: Vec<String>,
    #[serde(default)]
    pub variations: Vec<String>,
}

impl Suggestions {
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.usernames.is_empty() && self.variations.is_empty()
    }

    /// Every suggested term, usernames first
    pub fn all_terms(&self) -> impl Iterator<Item = &String> {
        self.usernames
            .iter()
            .chain(self.keywords.iter())
            .chain(self.variations.iter())
    }
}

#[async_trait]
pub trait KeywordSuggester: Send + Sync {
    async fn suggest(&self, topic: &str, count: usize) -> Result<Suggestions, SuggestError>;
}

#[derive(Clone)]
pub enum SuggestionStrategy {
    Ai(Arc<dyn KeywordSuggester>),
    RuleBased,
}

impl std::fmt::Debug for SuggestionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestionStrategy::Ai(_) => f.write_str("SuggestionStrategy::Ai"),
            SuggestionStrategy::RuleBased => f.write_str("SuggestionStrategy::RuleBased"),
        }
    }
}

impl SuggestionStrategy {
    pub async fn suggest(&self, topic: &str, count: usize) -> Suggestions {
        let suggester = match self {
            SuggestionStrategy::RuleBased => return rule_based(topic, count),
            SuggestionStrategy::Ai(suggester) => suggester,
        };

        match suggester.suggest(topic, count).await {
            Ok(suggestions) if !suggestions.is_empty() => suggestions,
            Ok(_) => {
                log::warn!("⚠️  Suggester returned nothing for '{}', using rule-based terms", topic);
                rule_based(topic, count)
            }
            Err(e) => {
                log::warn!("⚠️  Suggester failed for '{}': {}, using rule-based terms", topic, e);
                rule_based(topic, count)
            }
        }
    }
}

const ATTACHED_SUFFIXES: [&str; 7] = ["lik", "lar", "chilar", "uz", "group", "chat", "guruh"];
const UNDERSCORE_SUFFIXES: [&str; 5] = ["_group", "_chat", "_guruh", "_uz", "_official"];
const PREFIXES: [&str; 5] = ["guruh_", "chat_", "group_", "uz_", "official_"];

/// Username-shaped variations of `topic` built from fixed affixes
///
/// Only `variations` is populated. Returns at most `count` terms.
pub fn rule_based(topic: &str, count: usize) -> Suggestions {
    let word = match username_form(topic) {
        Some(word) => word,
        None => return Suggestions::default(),
    };

    let mut variations = vec![word.clone()];
    variations.extend(UNDERSCORE_SUFFIXES.iter().map(|s| format!("{}{}", word, s)));
    variations.extend(ATTACHED_SUFFIXES.iter().map(|s| format!("{}{}", word, s)));
    variations.extend(PREFIXES.iter().map(|p| format!("{}{}", p, word)));

    let mut seen = std::collections::HashSet::new();
    variations.retain(|v| seen.insert(v.clone()));
    variations.truncate(count);

    Suggestions {
        variations,
        ..Suggestions::default()
    }
}

const SYSTEM_PROMPT: &str = "You generate search terms for finding public chat groups. \
Reply with a single JSON object with the arrays \"keywords\", \"usernames\" and \"variations\". \
Usernames use only a-z, 0-9 and underscore, with no spaces.";

/// OpenAI-compatible chat completions client
pub struct LlmSuggester {
    client: reqwest::Client,
    config: SuggesterConfig,
}

impl LlmSuggester {
    pub fn new(config: SuggesterConfig) -> Result<Self, SuggestError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl KeywordSuggester for LlmSuggester {
    async fn suggest(&self, topic: &str, count: usize) -> Result<Suggestions, SuggestError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": 0.8,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("Topic: {}\nReturn up to {} terms per array.", topic, count) }
            ],
        });

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SuggestError::Api { status, body });
        }

        let json: serde_json::Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| SuggestError::Parse("missing choices[0].message.content".to_string()))?;

        let suggestions = parse_suggestions(content, count);
        log::info!(
            "🤖 Suggester: {} keywords, {} usernames, {} variations for '{}'",
            suggestions.keywords.len(),
            suggestions.usernames.len(),
            suggestions.variations.len(),
            topic
        );
        Ok(suggestions)
    }
}

/// Parse model output: a JSON object if there is one, otherwise a
/// comma-separated list treated as variations
pub fn parse_suggestions(content: &str, count: usize) -> Suggestions {
    let json_slice = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if end > start => Some(&content[start..=end]),
        _ => None,
    };

    let raw = json_slice
        .and_then(|slice| serde_json::from_str::<Suggestions>(slice).ok())
        .unwrap_or_else(|| Suggestions {
            variations: content.split([',', '\n']).map(str::to_string).collect(),
            ..Suggestions::default()
        });

    Suggestions {
        keywords: clean_terms(raw.keywords, count),
        usernames: raw
            .usernames
            .iter()
            .filter_map(|u| normalize_username(u))
            .filter(|u| u.len() >= 5)
            .take(count)
            .collect(),
        variations: clean_terms(raw.variations, count),
    }
}

fn clean_terms(terms: Vec<String>, count: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    terms
        .into_iter()
        .map(|t| t.trim().trim_matches('"').to_lowercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .take(count)
        .collect()
}
