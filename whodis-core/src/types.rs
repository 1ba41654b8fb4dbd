use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const NO_DESCRIPTION: &str = "(No description available)";
pub const DESCRIPTION_UNAVAILABLE: &str = "(Could not fetch description)";

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: String,
    pub subreddit: String,
    pub created_utc: DateTime<Utc>,
    pub body: String,
    /// Title of the thread the comment was posted in.
    pub link_title: String,
    /// Full name (`t1_…` / `t3_…`) of the parent thing.
    pub parent_id: Option<String>,
    pub parent_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub subreddit: String,
    pub created_utc: DateTime<Utc>,
    pub title: String,
    pub selftext: String,
}

/// A single comment or post authored by the analyzed user.
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    Comment(Comment),
    Post(Post),
}

impl Activity {
    pub fn id(&self) -> &str {
        match self {
            Activity::Comment(c) => &c.id,
            Activity::Post(p) => &p.id,
        }
    }

    pub fn subreddit(&self) -> &str {
        match self {
            Activity::Comment(c) => &c.subreddit,
            Activity::Post(p) => &p.subreddit,
        }
    }

    pub fn created_utc(&self) -> DateTime<Utc> {
        match self {
            Activity::Comment(c) => c.created_utc,
            Activity::Post(p) => p.created_utc,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Activity::Comment(_) => "comment",
            Activity::Post(_) => "post",
        }
    }
}

impl From<Comment> for Activity {
    fn from(comment: Comment) -> Self {
        Activity::Comment(comment)
    }
}

impl From<Post> for Activity {
    fn from(post: Post) -> Self {
        Activity::Post(post)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubredditContext {
    pub name: String,
    pub description: String,
}

impl SubredditContext {
    /// Trims the description and folds it onto one line; blank descriptions
    /// become the "no description" placeholder.
    pub fn new(name: impl Into<String>, description: &str) -> Self {
        let cleaned = description
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            name: name.into(),
            description: if cleaned.is_empty() {
                NO_DESCRIPTION.to_string()
            } else {
                cleaned
            },
        }
    }

    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: DESCRIPTION_UNAVAILABLE.to_string(),
        }
    }
}

/// Subreddit contexts keyed by name, iterated in name order.
pub type SubredditContexts = BTreeMap<String, SubredditContext>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub created_utc: DateTime<Utc>,
    pub comment_karma: i64,
    pub link_karma: i64,
}

/// The cached outcome of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub username: String,
    pub user_info: UserInfo,
    pub analysis: String,
    pub activity_count: usize,
    pub subreddit_count: usize,
    pub model: String,
}

/// Keeps the first `Activity` per id, then orders newest first. The sort is
/// stable, so activities with equal timestamps keep their input order.
pub fn merge_activities(
    comments: Vec<Comment>,
    posts: Vec<Post>,
    limit: usize,
) -> Vec<Activity> {
    let mut seen = std::collections::HashSet::new();
    let mut activities: Vec<Activity> = comments
        .into_iter()
        .map(Activity::from)
        .chain(posts.into_iter().map(Activity::from))
        .filter(|a| seen.insert(a.id().to_string()))
        .collect();

    activities.sort_by(|a, b| b.created_utc().cmp(&a.created_utc()));
    activities.truncate(limit);
    activities
}
