pub mod api;
pub mod auth;
pub mod rate_limiter;
pub mod retry;


use api::{activity_from_child, parent_text, RawChild, RedditApiClient, PAGE_SIZE};
pub use auth::{AuthState, RedditOAuth2Config, RedditToken, TokenManager};
use rate_limiter::RateLimitStatus;
use retry::{CircuitBreakerState, RetryMetrics};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use whodis_core::{Activity, Comment, CoreError, Post, UserInfo};

/// Everything the analysis needs from Reddit.
pub trait RedditSource {
    async fn fetch_user_info(&self, username: &str) -> Result<UserInfo, CoreError>;

    /// Up to `limit` comments, newest first. With `include_parent_context`
    /// each reply carries the text it was replying to.
    async fn fetch_comments(
        &self,
        username: &str,
        limit: usize,
        include_parent_context: bool,
    ) -> Result<Vec<Comment>, CoreError>;

    /// Up to `limit` submissions, newest first.
    async fn fetch_posts(&self, username: &str, limit: usize) -> Result<Vec<Post>, CoreError>;

    /// Raw description text; empty when the subreddit has none.
    async fn fetch_subreddit_description(&self, subreddit: &str) -> Result<String, CoreError>;
}

/// Request health for one session.
#[derive(Debug, Clone)]
pub struct RequestStats {
    pub retry: RetryMetrics,
    pub circuit_breaker: CircuitBreakerState,
    pub rate_limit: RateLimitStatus,
}

pub struct RedditClient {
    api: RedditApiClient,
}

impl RedditClient {
    pub fn new(config: RedditOAuth2Config) -> Result<Self, CoreError> {
        let api = RedditApiClient::new(TokenManager::new(config))?;
        Ok(Self { api })
    }

    pub fn api(&self) -> &RedditApiClient {
        &self.api
    }

    pub async fn get_auth_state(&self) -> AuthState {
        self.api.auth().get_auth_state().await
    }

    pub async fn request_stats(&self) -> RequestStats {
        RequestStats {
            retry: self.api.retry_executor().get_metrics(),
            circuit_breaker: self.api.retry_executor().get_circuit_breaker_state(),
            rate_limit: self.api.get_rate_limit_status().await,
        }
    }

    /// Logs how the session's requests went; retries and throttling at info,
    /// the rest at debug.
    pub async fn log_request_stats(&self) {
        let stats = self.request_stats().await;
        debug!(
            "Reddit requests: {} sent, {} rate limited, circuit breaker {:?}",
            stats.rate_limit.requests_sent,
            stats.rate_limit.rate_limited_responses,
            stats.circuit_breaker
        );
        if stats.retry.total_retries > 0 || stats.retry.failed_operations > 0 {
            info!(
                "Reddit retries: {} retries, {} recovered, {} failed, {} breaker trips, {:.0}ms average delay",
                stats.retry.total_retries,
                stats.retry.successful_retries,
                stats.retry.failed_operations,
                stats.retry.circuit_breaker_trips,
                stats.retry.average_retry_delay_ms
            );
        }
    }

    /// Follows `after` cursors until `limit` children are collected or the
    /// listing runs out.
    async fn fetch_listing(
        &self,
        username: &str,
        listing: &str,
        limit: usize,
    ) -> Result<Vec<RawChild>, CoreError> {
        let mut children = Vec::new();
        let mut after: Option<String> = None;

        while children.len() < limit {
            let page = self
                .api
                .get_user_listing_page(username, listing, limit - children.len(), after.as_deref())
                .await?;

            let received = page.data.children.len();
            children.extend(page.data.children);

            if received > 0 && children.len() % PAGE_SIZE == 0 {
                info!("Fetched {} {} so far...", children.len(), listing);
            }

            match page.data.after {
                Some(next) if received > 0 => after = Some(next),
                _ => break,
            }
        }

        children.truncate(limit);
        Ok(children)
    }

    /// Resolves parent fullnames to their text in batches. Failed batches
    /// are logged and skipped.
    async fn fetch_parent_texts(&self, comments: &[Comment]) -> HashMap<String, String> {
        let mut texts = HashMap::new();
        for batch in parent_batches(comments) {
            match self.api.get_info(&batch).await {
                Ok(listing) => {
                    texts.extend(listing.data.children.iter().filter_map(parent_text));
                }
                Err(e) => {
                    warn!(
                        "Could not fetch parent context for {} comments: {}",
                        batch.len(),
                        e
                    );
                }
            }
        }
        texts
    }
}

/// Distinct parent fullnames in first-seen order, split into `/api/info`
/// sized batches.
pub fn parent_batches(comments: &[Comment]) -> Vec<Vec<String>> {
    let mut seen = std::collections::HashSet::new();
    let fullnames: Vec<String> = comments
        .iter()
        .filter_map(|c| c.parent_id.clone())
        .filter(|id| seen.insert(id.clone()))
        .collect();

    fullnames.chunks(PAGE_SIZE).map(|chunk| chunk.to_vec()).collect()
}

fn expect_comment(activity: Activity) -> Result<Comment, CoreError> {
    match activity {
        Activity::Comment(comment) => Ok(comment),
        Activity::Post(post) => Err(CoreError::malformed(post.id, "post in comment listing")),
    }
}

fn expect_post(activity: Activity) -> Result<Post, CoreError> {
    match activity {
        Activity::Post(post) => Ok(post),
        Activity::Comment(comment) => Err(CoreError::malformed(
            comment.id,
            "comment in submission listing",
        )),
    }
}

impl RedditSource for RedditClient {
    async fn fetch_user_info(&self, username: &str) -> Result<UserInfo, CoreError> {
        let info = self.api.get_user_about(username).await?.into_user_info()?;
        debug!(
            "u/{}: {} comment karma, {} link karma",
            info.name, info.comment_karma, info.link_karma
        );
        Ok(info)
    }

    async fn fetch_comments(
        &self,
        username: &str,
        limit: usize,
        include_parent_context: bool,
    ) -> Result<Vec<Comment>, CoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut comments = self
            .fetch_listing(username, "comments", limit)
            .await?
            .into_iter()
            .map(|child| activity_from_child(child).and_then(expect_comment))
            .collect::<Result<Vec<_>, _>>()?;

        if include_parent_context {
            let texts = self.fetch_parent_texts(&comments).await;
            for comment in &mut comments {
                comment.parent_context = comment
                    .parent_id
                    .as_ref()
                    .and_then(|id| texts.get(id))
                    .cloned();
            }
        }

        info!("Successfully fetched {} comments.", comments.len());
        Ok(comments)
    }

    async fn fetch_posts(&self, username: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let posts = self
            .fetch_listing(username, "submitted", limit)
            .await?
            .into_iter()
            .map(|child| activity_from_child(child).and_then(expect_post))
            .collect::<Result<Vec<_>, _>>()?;

        info!("Successfully fetched {} posts.", posts.len());
        Ok(posts)
    }

    async fn fetch_subreddit_description(&self, subreddit: &str) -> Result<String, CoreError> {
        let about = self.api.get_subreddit_about(subreddit).await?;
        Ok(about.best_description().to_string())
    }
}
