use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const SUBREDDIT_DESCRIPTION_TTL_DAYS: u32 = 30;
pub const DEFAULT_ANALYSIS_TTL_DAYS: u32 = 7;

/// Every setting that changes what ends up in the prompt. Two runs with
/// different options must never share an analysis cache entry, so anything
/// added here is automatically part of [`AnalysisOptions::fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub comments_limit: usize,
    pub posts_limit: usize,
    pub include_post_bodies: bool,
    pub llm_activities_limit: usize,
    pub max_post_body_length: usize,
    pub include_parent_context: bool,
    pub max_parent_context_length: usize,
    pub max_comment_length: usize,
    pub max_title_length: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            comments_limit: 100,
            posts_limit: 50,
            include_post_bodies: true,
            llm_activities_limit: 200,
            max_post_body_length: 500,
            include_parent_context: true,
            max_parent_context_length: 500,
            max_comment_length: 500,
            max_title_length: 300,
        }
    }
}

impl AnalysisOptions {
    /// SHA-256 hex digest of the canonical JSON form of the options.
    pub fn fingerprint(&self) -> String {
        // Field order is fixed by the struct definition, so the JSON is stable.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

/// How the analysis cache participates in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Read fresh entries, write new results.
    #[default]
    Normal,
    /// Skip reads, still write the new result.
    ForceRefresh,
    /// Neither read nor write.
    Disabled,
}

impl CachePolicy {
    pub fn from_flags(force_refresh: bool, no_cache: bool) -> Self {
        if no_cache {
            CachePolicy::Disabled
        } else if force_refresh {
            CachePolicy::ForceRefresh
        } else {
            CachePolicy::Normal
        }
    }

    pub fn reads(&self) -> bool {
        matches!(self, CachePolicy::Normal)
    }

    pub fn writes(&self) -> bool {
        !matches!(self, CachePolicy::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = AnalysisOptions::default();
        let b = AnalysisOptions::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_every_option() {
        let base = AnalysisOptions::default();
        let variants = vec![
            AnalysisOptions { comments_limit: 2, ..base.clone() },
            AnalysisOptions { posts_limit: 1, ..base.clone() },
            AnalysisOptions { include_post_bodies: false, ..base.clone() },
            AnalysisOptions { llm_activities_limit: 10, ..base.clone() },
            AnalysisOptions { max_post_body_length: 150, ..base.clone() },
            AnalysisOptions { include_parent_context: false, ..base.clone() },
            AnalysisOptions { max_parent_context_length: 200, ..base.clone() },
            AnalysisOptions { max_comment_length: 100, ..base.clone() },
            AnalysisOptions { max_title_length: 80, ..base.clone() },
        ];

        let mut seen = std::collections::HashSet::new();
        seen.insert(base.fingerprint());
        for variant in variants {
            assert!(seen.insert(variant.fingerprint()), "collision for {:?}", variant);
        }
    }

    #[test]
    fn test_cache_policy_flags() {
        assert_eq!(CachePolicy::from_flags(false, false), CachePolicy::Normal);
        assert_eq!(CachePolicy::from_flags(true, false), CachePolicy::ForceRefresh);
        assert_eq!(CachePolicy::from_flags(true, true), CachePolicy::Disabled);

        assert!(CachePolicy::Normal.reads());
        assert!(!CachePolicy::ForceRefresh.reads());
        assert!(CachePolicy::ForceRefresh.writes());
        assert!(!CachePolicy::Disabled.writes());
    }
}
