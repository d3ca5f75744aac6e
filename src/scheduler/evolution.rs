//! Evolved keyword pool fed by titles of recently discovered entities

use super::keywords::normalize_keyword;
use crate::discovery::SuggestionStrategy;
use crate::store::EntityRecord;
use std::collections::{HashSet, VecDeque};

/// Terms requested from the suggestion strategy per entity title
const TERMS_PER_TITLE: usize = 5;

/// Bounded FIFO pool: once full, the oldest evolved keyword is dropped
#[derive(Debug)]
pub struct KeywordEvolution {
    pool: VecDeque<String>,
    members: HashSet<String>,
    max_size: usize,
}

impl KeywordEvolution {
    pub fn new(max_size: usize) -> Self {
        Self {
            pool: VecDeque::new(),
            members: HashSet::new(),
            max_size: max_size.max(1),
        }
    }

    /// Expand the titles of up to `sample` entities into new keywords
    ///
    /// Keywords in `excluded` never enter the pool. Returns only the keywords
    /// that were not already in the pool.
    pub async fn evolve_from_entities(
        &mut self,
        strategy: &SuggestionStrategy,
        entities: &[EntityRecord],
        sample: usize,
        excluded: &HashSet<String>,
    ) -> Vec<String> {
        let titles: Vec<&str> = entities
            .iter()
            .filter_map(|e| e.title.as_deref())
            .filter(|t| !t.trim().is_empty())
            .take(sample)
            .collect();

        if titles.is_empty() {
            return Vec::new();
        }

        let mut added = Vec::new();
        for title in titles {
            let suggestions = strategy.suggest(title, TERMS_PER_TITLE).await;
            for term in suggestions.all_terms() {
                let keyword = normalize_keyword(term);
                if excluded.contains(&keyword) {
                    continue;
                }
                if self.insert(keyword.clone()) {
                    added.push(keyword);
                }
            }
        }

        log::info!("🧬 Evolved {} new keywords ({} in pool)", added.len(), self.pool.len());
        added
    }

    /// Add one keyword. Returns `false` if it was empty or already present.
    pub fn insert(&mut self, keyword: String) -> bool {
        if keyword.is_empty() || self.members.contains(&keyword) {
            return false;
        }
        if self.pool.len() >= self.max_size {
            if let Some(oldest) = self.pool.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(keyword.clone());
        self.pool.push_back(keyword);
        true
    }

    pub fn keywords(&self) -> Vec<String> {
        self.pool.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::EntityKind;

    fn entity(id: i64, title: Option<&str>) -> EntityRecord {
        EntityRecord {
            entity_id: id,
            username: None,
            title: title.map(str::to_string),
            title_norm: title.map(|t| t.to_lowercase()).unwrap_or_default(),
            kind: EntityKind::Group,
            about: None,
            discovered_at: 0,
            last_seen_at: 0,
        }
    }

    fn contains(evolution: &KeywordEvolution, keyword: &str) -> bool {
        evolution.keywords().iter().any(|k| k == keyword)
    }

    #[tokio::test]
    async fn test_evolves_from_titles_without_duplicates() {
        let mut evolution = KeywordEvolution::new(100);
        let entities = vec![entity(1, Some("IELTS Masters")), entity(2, None), entity(3, Some("Grammar Hub"))];

        let added = evolution
            .evolve_from_entities(&SuggestionStrategy::RuleBased, &entities, 3, &HashSet::new())
            .await;

        assert_eq!(added.len(), 2 * TERMS_PER_TITLE);
        assert!(contains(&evolution, "ielts_masters"));
        assert!(contains(&evolution, "grammar_hub_group"));

        let again = evolution
            .evolve_from_entities(&SuggestionStrategy::RuleBased, &entities, 3, &HashSet::new())
            .await;
        assert!(again.is_empty());
        assert_eq!(evolution.len(), 2 * TERMS_PER_TITLE);
    }

    #[tokio::test]
    async fn test_sample_limits_titles_used() {
        let mut evolution = KeywordEvolution::new(100);
        let entities = vec![entity(1, Some("IELTS Masters")), entity(2, Some("Grammar Hub"))];

        evolution
            .evolve_from_entities(&SuggestionStrategy::RuleBased, &entities, 1, &HashSet::new())
            .await;

        assert!(contains(&evolution, "ielts_masters"));
        assert!(!contains(&evolution, "grammar_hub"));
    }

    #[tokio::test]
    async fn test_excluded_keywords_never_take_pool_slots() {
        let mut evolution = KeywordEvolution::new(TERMS_PER_TITLE);
        assert!(evolution.insert("keep".to_string()));
        let excluded: HashSet<String> = ["ielts_masters".to_string()].into_iter().collect();

        let added = evolution
            .evolve_from_entities(&SuggestionStrategy::RuleBased, &[entity(1, Some("IELTS Masters"))], 1, &excluded)
            .await;

        assert_eq!(added.len(), TERMS_PER_TITLE - 1);
        assert!(!contains(&evolution, "ielts_masters"));
        assert!(contains(&evolution, "keep"));
        assert_eq!(evolution.len(), TERMS_PER_TITLE);
    }

    #[test]
    fn test_pool_is_bounded_fifo() {
        let mut evolution = KeywordEvolution::new(2);
        assert!(evolution.insert("a".to_string()));
        assert!(evolution.insert("b".to_string()));
        assert!(!evolution.insert("b".to_string()));
        assert!(evolution.insert("c".to_string()));

        assert_eq!(evolution.keywords(), vec!["b", "c"]);
        assert!(!contains(&evolution, "a"));
        assert!(!evolution.insert(String::new()));
    }
}
