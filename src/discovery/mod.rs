//! Topic discovery: normalization, query planning, suggestion, ranking and
//! the tiered pipeline that ties them together

pub mod normalize;
pub mod pipeline;
pub mod query_plan;
pub mod ranking;
pub mod suggest;

pub use normalize::{explicit_handle, normalize_title, normalize_username};
pub use pipeline::{
    Attempt, AttemptResult, DiscoveryError, DiscoveryOutcome, DiscoveryPipeline, DiscoveryStatus,
};
pub use query_plan::{build_plan, QueryPlan};
pub use ranking::{CandidateScorer, Confidence, RankedResult};
pub use suggest::{KeywordSuggester, LlmSuggester, SuggestionStrategy, Suggestions};
