pub mod summary;

use chrono::{DateTime, Utc};
use disk_cache::{CacheKey, DiskCache, Namespace};
use llm_interface::{build_analysis_prompt, LlmProvider, PromptLimits, ANALYSIS_INSTRUCTIONS};
use reddit_client::RedditSource;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use whodis_core::{
    merge_activities, Activity, AnalysisOptions, AnalysisRecord, CachePolicy, CoreError, ErrorExt,
    SubredditContext, SubredditContexts, DEFAULT_ANALYSIS_TTL_DAYS,
    SUBREDDIT_DESCRIPTION_TTL_DAYS,
};

pub use summary::{fallback_summary, speak_summary};

/// One analysis run, fully resolved before any network activity.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub username: String,
    pub options: AnalysisOptions,
    pub cache_policy: CachePolicy,
    pub cache_days: u32,
}

impl AnalysisRequest {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            options: AnalysisOptions::default(),
            cache_policy: CachePolicy::Normal,
            cache_days: DEFAULT_ANALYSIS_TTL_DAYS,
        }
    }

    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_cache_days(mut self, days: u32) -> Self {
        self.cache_days = days;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub record: AnalysisRecord,
    pub from_cache: bool,
    /// When the record was produced; set for both fresh and cached results.
    pub cached_at: Option<DateTime<Utc>>,
}

pub struct AnalysisService<R, L> {
    reddit: R,
    llm: L,
    cache: DiskCache,
}

impl<R: RedditSource, L: LlmProvider> AnalysisService<R, L> {
    pub fn new(reddit: R, llm: L, cache: DiskCache) -> Self {
        Self { reddit, llm, cache }
    }

    pub fn reddit(&self) -> &R {
        &self.reddit
    }

    pub fn llm(&self) -> &L {
        &self.llm
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisReport, CoreError> {
        self.analyze_at(request, Utc::now()).await
    }

    /// Same as [`Self::analyze`] with the clock supplied by the caller, so
    /// cache freshness can be checked against a fixed instant.
    pub async fn analyze_at(
        &self,
        request: &AnalysisRequest,
        now: DateTime<Utc>,
    ) -> Result<AnalysisReport, CoreError> {
        let username = request.username.as_str();
        let policy = request.cache_policy;
        let key = CacheKey::analysis(username, &request.options);

        if policy.reads() {
            if let Some(entry) =
                self.cache
                    .get_at::<AnalysisRecord>(Namespace::AnalysisResults, &key, now)
            {
                info!(
                    "Using cached analysis for u/{} from {}",
                    username, entry.timestamp
                );
                return Ok(AnalysisReport {
                    record: entry.value,
                    from_cache: true,
                    cached_at: Some(entry.timestamp),
                });
            }
        } else {
            debug!("Skipping analysis cache lookup ({:?})", policy);
        }

        info!("Fetching Reddit data for u/{}", username);
        let user_info = self.reddit.fetch_user_info(username).await?;

        let options = &request.options;
        let comments = self
            .reddit
            .fetch_comments(username, options.comments_limit, options.include_parent_context)
            .await?;
        let posts = self.reddit.fetch_posts(username, options.posts_limit).await?;
        info!(
            "Fetched {} comments and {} posts for u/{}",
            comments.len(),
            posts.len(),
            username
        );

        let activities = merge_activities(comments, posts, options.llm_activities_limit);
        if activities.is_empty() {
            return Err(CoreError::NotFound {
                resource: format!("comments or posts for u/{}", username),
            });
        }

        let contexts = self.resolve_contexts(&activities, policy, now).await;

        let prompt = build_analysis_prompt(
            &activities,
            &contexts,
            ANALYSIS_INSTRUCTIONS,
            &PromptLimits::from(options),
        )?;
        info!(
            "Analyzing {} activities across {} subreddits with {}",
            activities.len(),
            contexts.len(),
            self.llm.model()
        );
        let analysis = self.llm.complete(&prompt).await?;

        let record = AnalysisRecord {
            username: user_info.name.clone(),
            user_info,
            analysis,
            activity_count: activities.len(),
            subreddit_count: contexts.len(),
            model: self.llm.model().to_string(),
        };

        if policy.writes() {
            if let Err(e) = self.cache.put_at(
                Namespace::AnalysisResults,
                &key,
                &record,
                request.cache_days,
                now,
            ) {
                e.log_warn();
            }
        }

        Ok(AnalysisReport {
            record,
            from_cache: false,
            cached_at: Some(now),
        })
    }

    /// One context per distinct subreddit in `activities`. Descriptions come
    /// from the cache when allowed, otherwise from Reddit. Failed lookups get
    /// a placeholder and are not cached.
    async fn resolve_contexts(
        &self,
        activities: &[Activity],
        policy: CachePolicy,
        now: DateTime<Utc>,
    ) -> SubredditContexts {
        let names: BTreeSet<&str> = activities.iter().map(|a| a.subreddit()).collect();
        let mut contexts = SubredditContexts::new();

        for name in names {
            let key = CacheKey::subreddit(name);

            if policy.reads() {
                if let Some(entry) =
                    self.cache
                        .get_at::<String>(Namespace::SubredditDescriptions, &key, now)
                {
                    contexts.insert(name.to_string(), SubredditContext::new(name, &entry.value));
                    continue;
                }
            }

            let context = match self.reddit.fetch_subreddit_description(name).await {
                Ok(description) => {
                    if policy.writes() {
                        if let Err(e) = self.cache.put_at(
                            Namespace::SubredditDescriptions,
                            &key,
                            &description,
                            SUBREDDIT_DESCRIPTION_TTL_DAYS,
                            now,
                        ) {
                            e.log_warn();
                        }
                    }
                    SubredditContext::new(name, &description)
                }
                Err(e) => {
                    warn!("Could not fetch description for r/{}: {}", name, e);
                    SubredditContext::unavailable(name)
                }
            };
            contexts.insert(name.to_string(), context);
        }

        contexts
    }
}
