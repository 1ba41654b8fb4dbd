use crate::auth::TokenManager;
use crate::rate_limiter::{RateLimitStatus, RateLimiter};
use crate::retry::{RetryConfig, RetryExecutor};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;
use whodis_core::{Activity, Comment, CoreError, Post, RedditApiError, UserInfo};

pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";

/// Reddit's maximum page size for listings and `/api/info`.
pub const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    pub before: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

/// Listing children are kept as raw JSON until their kind is known.
pub type RawListing = RedditListing<serde_json::Value>;
pub type RawChild = RedditListingChild<serde_json::Value>;

#[derive(Debug, Clone, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    #[serde(default)]
    pub subreddit: String,
    pub created_utc: f64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub link_title: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    #[serde(default)]
    pub subreddit: String,
    pub created_utc: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditUserData {
    pub name: String,
    pub created_utc: Option<f64>,
    #[serde(default)]
    pub comment_karma: i64,
    #[serde(default)]
    pub link_karma: i64,
    #[serde(default)]
    pub is_suspended: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditSubredditData {
    pub display_name: String,
    #[serde(default)]
    pub public_description: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RedditSubredditData {
    /// The short public description, falling back to the sidebar text.
    pub fn best_description(&self) -> &str {
        [&self.public_description, &self.description]
            .into_iter()
            .flatten()
            .map(|d| d.trim())
            .find(|d| !d.is_empty())
            .unwrap_or("")
    }
}

fn timestamp(id: &str, created_utc: f64) -> Result<DateTime<Utc>, CoreError> {
    DateTime::from_timestamp(created_utc.trunc() as i64, 0)
        .ok_or_else(|| CoreError::malformed(id, format!("invalid timestamp {}", created_utc)))
}

fn require_subreddit(id: &str, subreddit: &str) -> Result<(), CoreError> {
    if subreddit.trim().is_empty() {
        return Err(CoreError::malformed(id, "missing subreddit"));
    }
    Ok(())
}

impl RedditCommentData {
    pub fn into_comment(self) -> Result<Comment, CoreError> {
        require_subreddit(&self.id, &self.subreddit)?;
        let created_utc = timestamp(&self.id, self.created_utc)?;
        Ok(Comment {
            id: self.id,
            subreddit: self.subreddit,
            created_utc,
            body: self.body,
            link_title: self.link_title,
            parent_id: self.parent_id,
            parent_context: None,
        })
    }
}

impl RedditPostData {
    pub fn into_post(self) -> Result<Post, CoreError> {
        require_subreddit(&self.id, &self.subreddit)?;
        let created_utc = timestamp(&self.id, self.created_utc)?;
        Ok(Post {
            id: self.id,
            subreddit: self.subreddit,
            created_utc,
            title: self.title,
            selftext: self.selftext,
        })
    }
}

/// Converts a raw listing child: `t1` is a comment, `t3` a post, and
/// anything else is rejected.
pub fn activity_from_child(child: RawChild) -> Result<Activity, CoreError> {
    let id = child
        .data
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("<unknown>")
        .to_string();

    match child.kind.as_str() {
        "t1" => {
            let data: RedditCommentData = serde_json::from_value(child.data)
                .map_err(|e| CoreError::malformed(&id, e.to_string()))?;
            Ok(Activity::Comment(data.into_comment()?))
        }
        "t3" => {
            let data: RedditPostData = serde_json::from_value(child.data)
                .map_err(|e| CoreError::malformed(&id, e.to_string()))?;
            Ok(Activity::Post(data.into_post()?))
        }
        other => Err(CoreError::malformed(
            id,
            format!("unexpected listing kind '{}'", other),
        )),
    }
}

/// Text used as the parent context of a reply: a comment's body, or a
/// post's title and body on separate lines.
pub fn parent_text(child: &RawChild) -> Option<(String, String)> {
    let data = &child.data;
    let field = |name: &str| data.get(name).and_then(|v| v.as_str()).unwrap_or("");
    let fullname = data.get("name").and_then(|v| v.as_str())?.to_string();

    let text = match child.kind.as_str() {
        "t1" => field("body").to_string(),
        "t3" => format!("{}\n{}", field("title"), field("selftext")),
        _ => return None,
    };
    Some((fullname, text))
}

impl RedditUserData {
    pub fn into_user_info(self) -> Result<UserInfo, CoreError> {
        if self.is_suspended {
            return Err(CoreError::RedditApi(RedditApiError::UserSuspended {
                username: self.name,
            }));
        }
        let created_utc = self
            .created_utc
            .and_then(|ts| DateTime::from_timestamp(ts.trunc() as i64, 0))
            .ok_or_else(|| {
                CoreError::RedditApi(RedditApiError::InvalidResponse {
                    details: format!("user '{}' has no creation date", self.name),
                })
            })?;
        Ok(UserInfo {
            name: self.name,
            created_utc,
            comment_karma: self.comment_karma,
            link_karma: self.link_karma,
        })
    }
}

/// What a request was about, so a 404 can name the missing thing.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    User(&'a str),
    Subreddit(&'a str),
    Endpoint(&'a str),
}

pub fn status_error(status: StatusCode, retry_after: Option<u64>, resource: Resource<'_>) -> RedditApiError {
    match status.as_u16() {
        401 => RedditApiError::InvalidToken,
        403 => RedditApiError::Forbidden {
            resource: match resource {
                Resource::User(name) => format!("u/{}", name),
                Resource::Subreddit(name) => format!("r/{}", name),
                Resource::Endpoint(endpoint) => endpoint.to_string(),
            },
        },
        404 => match resource {
            Resource::User(name) => RedditApiError::UserNotFound {
                username: name.to_string(),
            },
            Resource::Subreddit(name) => RedditApiError::SubredditNotFound {
                subreddit: name.to_string(),
            },
            Resource::Endpoint(endpoint) => RedditApiError::InvalidResponse {
                details: format!("{} not found", endpoint),
            },
        },
        429 => RedditApiError::RateLimitExceeded {
            retry_after: retry_after.unwrap_or(60),
        },
        code if status.is_server_error() => RedditApiError::ServerError { status_code: code },
        code => RedditApiError::InvalidResponse {
            details: format!("unexpected status {}", code),
        },
    }
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    auth: TokenManager,
    rate_limiter: RateLimiter,
    retry: RetryExecutor,
    api_base: String,
}

impl RedditApiClient {
    pub fn new(auth: TokenManager) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(auth.config().user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            auth,
            rate_limiter: RateLimiter::new(),
            retry: RetryExecutor::new(RetryConfig::reddit()),
            api_base: REDDIT_API_BASE.to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn auth(&self) -> &TokenManager {
        &self.auth
    }

    /// Joins `segments` onto the API base, percent-encoding each one.
    pub fn endpoint_url(&self, segments: &[&str]) -> Result<Url, CoreError> {
        let invalid_base = |reason: String| CoreError::InvalidInput {
            message: format!("invalid Reddit API base {}: {}", self.api_base, reason),
        };

        let mut url = Url::parse(&self.api_base).map_err(|e| invalid_base(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid_base("cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET `url` and decode the JSON body, with retries.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
        resource: Resource<'_>,
    ) -> Result<T, CoreError> {
        let endpoint = url.path().to_string();
        let endpoint = endpoint.as_str();
        let url = &url;

        self.retry
            .execute(endpoint, || async move {
                self.rate_limiter.acquire().await;
                let token = self.auth.access_token(&self.http_client).await?;

                debug!("GET {} {:?}", endpoint, query);
                let response = self
                    .http_client
                    .get(url.clone())
                    .bearer_auth(token)
                    .query(query)
                    .send()
                    .await
                    .map_err(|e| {
                        if e.is_timeout() {
                            CoreError::RedditApi(RedditApiError::RequestTimeout)
                        } else {
                            CoreError::Network(e)
                        }
                    })?;

                self.rate_limiter.update_from_headers(response.headers()).await;

                let status = response.status();
                if !status.is_success() {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok());

                    match status {
                        StatusCode::UNAUTHORIZED => self.auth.invalidate().await,
                        StatusCode::TOO_MANY_REQUESTS => {
                            self.rate_limiter.record_rate_limited().await
                        }
                        _ => {}
                    }

                    let err = status_error(status, retry_after, resource);
                    warn!("Request to {} failed with {}: {}", endpoint, status, err);
                    return Err(CoreError::RedditApi(err));
                }

                response.json::<T>().await.map_err(|e| {
                    error!("Failed to parse response from {}: {}", endpoint, e);
                    CoreError::RedditApi(RedditApiError::InvalidResponse {
                        details: format!("{}: {}", endpoint, e),
                    })
                })
            })
            .await
    }

    pub async fn get_user_about(&self, username: &str) -> Result<RedditUserData, CoreError> {
        let url = self.endpoint_url(&["user", username, "about"])?;
        let about: RedditListingChild<RedditUserData> = self
            .get_json(url, &[("raw_json", "1".to_string())], Resource::User(username))
            .await?;
        Ok(about.data)
    }

    /// One page of a user's comments or submissions, newest first.
    pub async fn get_user_listing_page(
        &self,
        username: &str,
        listing: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<RawListing, CoreError> {
        let url = self.endpoint_url(&["user", username, listing])?;
        let mut query = vec![
            ("sort", "new".to_string()),
            ("limit", limit.min(PAGE_SIZE).to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let page: RawListing = self
            .get_json(url, &query, Resource::User(username))
            .await?;
        debug!(
            "Retrieved {} {} for u/{}",
            page.data.children.len(),
            listing,
            username
        );
        Ok(page)
    }

    /// Looks up things by fullname (`t1_…`, `t3_…`), at most one page at a time.
    pub async fn get_info(&self, fullnames: &[String]) -> Result<RawListing, CoreError> {
        let ids = fullnames.join(",");
        self.get_json(
            self.endpoint_url(&["api", "info"])?,
            &[("id", ids), ("raw_json", "1".to_string())],
            Resource::Endpoint("/api/info"),
        )
        .await
    }

    pub async fn get_subreddit_about(&self, subreddit: &str) -> Result<RedditSubredditData, CoreError> {
        let url = self.endpoint_url(&["r", subreddit, "about"])?;
        let about: RedditListingChild<RedditSubredditData> = self
            .get_json(url, &[("raw_json", "1".to_string())], Resource::Subreddit(subreddit))
            .await?;
        info!("Retrieved info for r/{}", about.data.display_name);
        Ok(about.data)
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.get_rate_limit_status().await
    }

    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }
}
