//! Deterministic base keyword generator

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;

pub const BASE_KEYWORDS: [&str; 34] = [
    "ielts",
    "ielts uzbek",
    "ielts speaking",
    "ielts writing",
    "english",
    "english group",
    "ingliz tili",
    "study abroad",
    "xorijda o'qish",
    "scholarship",
    "grant",
    "stipendiya",
    "cefr",
    "dtm",
    "dtm 2025",
    "tashkent",
    "toshkent",
    "samarkand",
    "bukhara",
    "uzbekistan",
    "o'zbekiston",
    "university",
    "universitet",
    "talaba",
    "education",
    "ta'lim",
    "o'quv markaz",
    "english course",
    "ingliz tili kursi",
    "репетитор",
    "английский",
    "ташкент",
    "работа ташкент",
    "вакансии",
];

pub const MODIFIERS: [&str; 8] = ["guruh", "chat", "group", "community", "2024", "2025", "official", "rasmiy"];

/// Every base keyword alone and combined with each modifier in both orders,
/// lowercased, deduplicated, then shuffled with `seed`
///
/// The same `seed` and input always produce the same order.
pub fn generate_base_keywords(keywords: &[String], seed: u64) -> Vec<String> {
    let mut combined: Vec<String> = keywords.iter().map(|k| normalize_keyword(k)).collect();
    for keyword in keywords {
        for modifier in MODIFIERS {
            combined.push(normalize_keyword(&format!("{} {}", keyword, modifier)));
            combined.push(normalize_keyword(&format!("{} {}", modifier, keyword)));
        }
    }

    let mut seen = HashSet::new();
    combined.retain(|k| !k.is_empty() && seen.insert(k.clone()));

    let mut rng = StdRng::seed_from_u64(seed);
    combined.shuffle(&mut rng);
    combined
}

pub fn default_keywords() -> Vec<String> {
    BASE_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

pub fn normalize_keyword(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}
