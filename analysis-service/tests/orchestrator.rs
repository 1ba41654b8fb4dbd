use analysis_service::{speak_summary, AnalysisRequest, AnalysisService};
use chrono::{DateTime, Duration, TimeZone, Utc};
use disk_cache::{CacheKey, CacheMode, DiskCache, Namespace};
use llm_interface::LlmProvider;
use reddit_client::RedditSource;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;
use tts_client::{AudioOutput, SpeechSynthesizer};
use whodis_core::{
    AnalysisOptions, AnalysisRecord, CachePolicy, Comment, CoreError, LlmError, Post,
    RedditApiError, TtsError, UserInfo, DESCRIPTION_UNAVAILABLE,
};

struct FakeReddit {
    comments: Vec<Comment>,
    posts: Vec<Post>,
    descriptions: HashMap<String, String>,
    missing_user: bool,
    canonical_name: Option<String>,
    user_calls: AtomicUsize,
    description_calls: Mutex<Vec<String>>,
}

impl FakeReddit {
    fn new(comments: Vec<Comment>, posts: Vec<Post>) -> Self {
        Self {
            comments,
            posts,
            descriptions: HashMap::new(),
            missing_user: false,
            canonical_name: None,
            user_calls: AtomicUsize::new(0),
            description_calls: Mutex::new(Vec::new()),
        }
    }

    fn with_description(mut self, subreddit: &str, description: &str) -> Self {
        self.descriptions
            .insert(subreddit.to_string(), description.to_string());
        self
    }

    fn description_requests(&self) -> Vec<String> {
        self.description_calls.lock().unwrap().clone()
    }
}

impl RedditSource for FakeReddit {
    async fn fetch_user_info(&self, username: &str) -> Result<UserInfo, CoreError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        if self.missing_user {
            return Err(RedditApiError::UserNotFound {
                username: username.to_string(),
            }
            .into());
        }
        Ok(UserInfo {
            name: self
                .canonical_name
                .clone()
                .unwrap_or_else(|| username.to_string()),
            created_utc: Utc.timestamp_opt(1_500_000_000, 0).unwrap(),
            comment_karma: 100,
            link_karma: 10,
        })
    }

    async fn fetch_comments(
        &self,
        _username: &str,
        limit: usize,
        _include_parent_context: bool,
    ) -> Result<Vec<Comment>, CoreError> {
        Ok(self.comments.iter().take(limit).cloned().collect())
    }

    async fn fetch_posts(&self, _username: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        Ok(self.posts.iter().take(limit).cloned().collect())
    }

    async fn fetch_subreddit_description(&self, subreddit: &str) -> Result<String, CoreError> {
        self.description_calls
            .lock()
            .unwrap()
            .push(subreddit.to_string());
        self.descriptions.get(subreddit).cloned().ok_or_else(|| {
            RedditApiError::Forbidden {
                resource: format!("r/{}", subreddit),
            }
            .into()
        })
    }
}

struct FakeLlm {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
    fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LlmProvider for FakeLlm {
    fn name(&self) -> &str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake-model"
    }

    async fn complete(&self, prompt: &str) -> Result<String, CoreError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().ok_or_else(|| {
            LlmError::ServiceUnavailable {
                provider: "fake".to_string(),
            }
            .into()
        })
    }
}

struct FakeTts {
    available: bool,
    spoken: Mutex<Vec<String>>,
}

impl SpeechSynthesizer for FakeTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CoreError> {
        self.spoken.lock().unwrap().push(text.to_string());
        if self.available {
            Ok(b"RIFFfakeWAVE".to_vec())
        } else {
            Err(TtsError::ServiceUnavailable {
                endpoint: "http://localhost:8880/v1/audio/speech".to_string(),
            }
            .into())
        }
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
}

fn comment(id: &str, subreddit: &str, ts: i64) -> Comment {
    Comment {
        id: id.to_string(),
        subreddit: subreddit.to_string(),
        created_utc: Utc.timestamp_opt(ts, 0).unwrap(),
        body: format!("comment body {}", id),
        link_title: format!("thread {}", id),
        parent_id: None,
        parent_context: None,
    }
}

fn post(id: &str, subreddit: &str, ts: i64) -> Post {
    Post {
        id: id.to_string(),
        subreddit: subreddit.to_string(),
        created_utc: Utc.timestamp_opt(ts, 0).unwrap(),
        title: format!("post title {}", id),
        selftext: format!("post body {}", id),
    }
}

/// alice: three comments and two posts, newest first as Reddit returns them.
fn alice() -> FakeReddit {
    FakeReddit::new(
        vec![
            comment("c1", "rust", 1_700_000_300),
            comment("c2", "AskReddit", 1_700_000_200),
            comment("c3", "rust", 1_700_000_100),
        ],
        vec![
            post("p1", "programming", 1_700_000_250),
            post("p2", "rust", 1_700_000_150),
        ],
    )
    .with_description("rust", "A place for all things Rust")
    .with_description("AskReddit", "Ask and answer")
    .with_description("programming", "Computer programming")
}

fn cached_record(text: &str) -> AnalysisRecord {
    AnalysisRecord {
        username: "alice".to_string(),
        user_info: UserInfo {
            name: "alice".to_string(),
            created_utc: Utc.timestamp_opt(1_500_000_000, 0).unwrap(),
            comment_karma: 1,
            link_karma: 2,
        },
        analysis: text.to_string(),
        activity_count: 5,
        subreddit_count: 3,
        model: "older-model".to_string(),
    }
}

fn enabled_cache(dir: &TempDir) -> DiskCache {
    DiskCache::new(dir.path(), CacheMode::Enabled)
}

#[tokio::test]
async fn test_alice_respects_per_kind_limits() {
    let dir = TempDir::new().unwrap();
    let service = AnalysisService::new(alice(), FakeLlm::replying("## Analysis"), enabled_cache(&dir));
    let options = AnalysisOptions {
        comments_limit: 2,
        posts_limit: 1,
        ..AnalysisOptions::default()
    };
    let request = AnalysisRequest::new("alice").with_options(options);

    let report = service.analyze_at(&request, now()).await.unwrap();

    assert!(!report.from_cache);
    assert_eq!(report.record.analysis, "## Analysis");
    assert_eq!(report.record.activity_count, 3);
    assert_eq!(report.record.subreddit_count, 3);
    assert_eq!(report.record.model, "fake-model");

    let prompts = service.llm().prompts();
    assert_eq!(prompts.len(), 1);
    let prompt = &prompts[0];
    assert_eq!(prompt.matches("<Activity type=\"comment\"").count(), 2);
    assert_eq!(prompt.matches("<Activity type=\"post\"").count(), 1);
    assert!(!prompt.contains("comment body c3"));
    assert!(!prompt.contains("post title p2"));

    let c1 = prompt.find("comment body c1").unwrap();
    let p1 = prompt.find("post title p1").unwrap();
    let c2 = prompt.find("comment body c2").unwrap();
    assert!(c1 < p1 && p1 < c2, "activities must be newest first");

    assert!(prompt.contains("A place for all things Rust"));
}

#[tokio::test]
async fn test_no_cache_neither_reads_nor_writes() {
    let dir = TempDir::new().unwrap();
    let service = AnalysisService::new(alice(), FakeLlm::replying("fresh"), enabled_cache(&dir));
    let request = AnalysisRequest::new("alice").with_cache_policy(CachePolicy::Disabled);

    let report = service.analyze_at(&request, now()).await.unwrap();

    assert!(!report.from_cache);
    assert_eq!(service.llm().prompts().len(), 1);
    assert!(!dir.path().join("analyses").exists());
    assert!(!dir.path().join("subreddits").exists());
}

#[tokio::test]
async fn test_no_cache_ignores_existing_entry() {
    let dir = TempDir::new().unwrap();
    let cache = enabled_cache(&dir);
    let key = CacheKey::analysis("alice", &AnalysisOptions::default());
    let stored_at = now() - Duration::days(1);
    cache
        .put_at(Namespace::AnalysisResults, &key, &cached_record("old"), 7, stored_at)
        .unwrap();

    let service = AnalysisService::new(alice(), FakeLlm::replying("fresh"), cache);
    let request = AnalysisRequest::new("alice").with_cache_policy(CachePolicy::Disabled);
    let report = service.analyze_at(&request, now()).await.unwrap();

    assert_eq!(report.record.analysis, "fresh");
    let entry = service
        .cache()
        .get_at::<AnalysisRecord>(Namespace::AnalysisResults, &key, now())
        .unwrap();
    assert_eq!(entry.timestamp, stored_at);
    assert_eq!(entry.value.analysis, "old");
}

#[tokio::test]
async fn test_fresh_cache_hit_skips_reddit_and_llm() {
    let dir = TempDir::new().unwrap();
    let cache = enabled_cache(&dir);
    let key = CacheKey::analysis("alice", &AnalysisOptions::default());
    let stored_at = now() - Duration::days(3);
    let record = cached_record("cached analysis text");
    cache
        .put_at(Namespace::AnalysisResults, &key, &record, 7, stored_at)
        .unwrap();

    let service = AnalysisService::new(alice(), FakeLlm::replying("unused"), cache);
    let report = service
        .analyze_at(&AnalysisRequest::new("alice"), now())
        .await
        .unwrap();

    assert!(report.from_cache);
    assert_eq!(report.record, record);
    assert_eq!(report.cached_at, Some(stored_at));
    assert!(service.llm().prompts().is_empty());
    assert_eq!(service.reddit().user_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_username_case_shares_cache_entry() {
    let dir = TempDir::new().unwrap();
    let cache = enabled_cache(&dir);
    let key = CacheKey::analysis("alice", &AnalysisOptions::default());
    cache
        .put_at(Namespace::AnalysisResults, &key, &cached_record("cached"), 7, now())
        .unwrap();

    let service = AnalysisService::new(alice(), FakeLlm::replying("unused"), cache);
    let report = service
        .analyze_at(&AnalysisRequest::new("Alice"), now())
        .await
        .unwrap();
    assert!(report.from_cache);
}

#[tokio::test]
async fn test_record_uses_reddit_casing_of_username() {
    let dir = TempDir::new().unwrap();
    let mut reddit = alice();
    reddit.canonical_name = Some("Alice".to_string());
    let service = AnalysisService::new(reddit, FakeLlm::replying("text"), enabled_cache(&dir));

    let fresh = service
        .analyze_at(&AnalysisRequest::new("ALICE"), now())
        .await
        .unwrap();
    assert_eq!(fresh.record.username, "Alice");

    let cached = service
        .analyze_at(&AnalysisRequest::new("alice"), now())
        .await
        .unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.record.username, "Alice");
}

#[tokio::test]
async fn test_expired_entry_is_recomputed() {
    let dir = TempDir::new().unwrap();
    let cache = enabled_cache(&dir);
    let key = CacheKey::analysis("alice", &AnalysisOptions::default());
    cache
        .put_at(
            Namespace::AnalysisResults,
            &key,
            &cached_record("stale"),
            7,
            now() - Duration::days(7) - Duration::seconds(1),
        )
        .unwrap();

    let service = AnalysisService::new(alice(), FakeLlm::replying("fresh"), cache);
    let report = service
        .analyze_at(&AnalysisRequest::new("alice"), now())
        .await
        .unwrap();

    assert!(!report.from_cache);
    assert_eq!(report.record.analysis, "fresh");
    assert_eq!(service.llm().prompts().len(), 1);
}

#[tokio::test]
async fn test_force_refresh_recomputes_and_restamps() {
    let dir = TempDir::new().unwrap();
    let cache = enabled_cache(&dir);
    let key = CacheKey::analysis("alice", &AnalysisOptions::default());
    cache
        .put_at(
            Namespace::AnalysisResults,
            &key,
            &cached_record("two days old"),
            7,
            now() - Duration::days(2),
        )
        .unwrap();

    let service = AnalysisService::new(alice(), FakeLlm::replying("refreshed"), cache);
    let request = AnalysisRequest::new("alice").with_cache_policy(CachePolicy::ForceRefresh);
    let report = service.analyze_at(&request, now()).await.unwrap();

    assert!(!report.from_cache);
    assert_eq!(report.record.analysis, "refreshed");
    assert_eq!(service.llm().prompts().len(), 1);

    let entry = service
        .cache()
        .get_at::<AnalysisRecord>(Namespace::AnalysisResults, &key, now())
        .unwrap();
    assert_eq!(entry.timestamp, now());
    assert_eq!(entry.value.analysis, "refreshed");
}

#[tokio::test]
async fn test_cache_days_sets_entry_ttl() {
    let dir = TempDir::new().unwrap();
    let service = AnalysisService::new(alice(), FakeLlm::replying("text"), enabled_cache(&dir));
    let request = AnalysisRequest::new("alice").with_cache_days(1);
    service.analyze_at(&request, now()).await.unwrap();

    let key = CacheKey::analysis("alice", &AnalysisOptions::default());
    let later = now() + Duration::days(1) + Duration::seconds(1);
    assert!(service
        .cache()
        .get_at::<AnalysisRecord>(Namespace::AnalysisResults, &key, later)
        .is_none());
}

#[tokio::test]
async fn test_llm_failure_caches_nothing() {
    let dir = TempDir::new().unwrap();
    let service = AnalysisService::new(alice(), FakeLlm::failing(), enabled_cache(&dir));

    let result = service.analyze_at(&AnalysisRequest::new("alice"), now()).await;

    assert!(matches!(
        result,
        Err(CoreError::Llm(LlmError::ServiceUnavailable { .. }))
    ));
    let key = CacheKey::analysis("alice", &AnalysisOptions::default());
    assert!(service
        .cache()
        .get_at::<AnalysisRecord>(Namespace::AnalysisResults, &key, now())
        .is_none());
}

#[tokio::test]
async fn test_missing_user_aborts_before_llm() {
    let dir = TempDir::new().unwrap();
    let mut reddit = alice();
    reddit.missing_user = true;
    let service = AnalysisService::new(reddit, FakeLlm::replying("unused"), enabled_cache(&dir));

    let result = service.analyze_at(&AnalysisRequest::new("ghost"), now()).await;

    assert!(matches!(
        result,
        Err(CoreError::RedditApi(RedditApiError::UserNotFound { .. }))
    ));
    assert!(service.llm().prompts().is_empty());
}

#[tokio::test]
async fn test_user_without_activity_is_not_found() {
    let dir = TempDir::new().unwrap();
    let service = AnalysisService::new(
        FakeReddit::new(Vec::new(), Vec::new()),
        FakeLlm::replying("unused"),
        enabled_cache(&dir),
    );

    let result = service.analyze_at(&AnalysisRequest::new("lurker"), now()).await;

    assert!(matches!(result, Err(CoreError::NotFound { .. })));
    assert!(service.llm().prompts().is_empty());
}

#[tokio::test]
async fn test_descriptions_are_cached_between_runs() {
    let dir = TempDir::new().unwrap();
    let service = AnalysisService::new(alice(), FakeLlm::replying("text"), enabled_cache(&dir));

    service
        .analyze_at(&AnalysisRequest::new("alice"), now())
        .await
        .unwrap();
    assert_eq!(service.reddit().description_requests().len(), 3);

    // A different option set misses the analysis cache but not the descriptions
    let options = AnalysisOptions {
        max_comment_length: 100,
        ..AnalysisOptions::default()
    };
    service
        .analyze_at(&AnalysisRequest::new("alice").with_options(options), now())
        .await
        .unwrap();
    assert_eq!(service.reddit().description_requests().len(), 3);
    assert_eq!(service.llm().prompts().len(), 2);
    assert!(service.llm().prompts()[1].contains("Computer programming"));

    let entry = service
        .cache()
        .get_at::<String>(Namespace::SubredditDescriptions, &CacheKey::subreddit("rust"), now())
        .unwrap();
    assert_eq!(entry.ttl_days, 30);
}

#[tokio::test]
async fn test_force_refresh_refetches_descriptions() {
    let dir = TempDir::new().unwrap();
    let service = AnalysisService::new(alice(), FakeLlm::replying("text"), enabled_cache(&dir));

    service
        .analyze_at(&AnalysisRequest::new("alice"), now())
        .await
        .unwrap();
    let request = AnalysisRequest::new("alice").with_cache_policy(CachePolicy::ForceRefresh);
    service.analyze_at(&request, now()).await.unwrap();

    assert_eq!(service.reddit().description_requests().len(), 6);
}

#[tokio::test]
async fn test_failed_description_gets_placeholder_and_is_not_cached() {
    let dir = TempDir::new().unwrap();
    let reddit = FakeReddit::new(
        vec![
            comment("c1", "rust", 1_700_000_300),
            comment("c2", "secretclub", 1_700_000_200),
        ],
        Vec::new(),
    )
    .with_description("rust", "");
    let service = AnalysisService::new(reddit, FakeLlm::replying("text"), enabled_cache(&dir));

    service
        .analyze_at(&AnalysisRequest::new("alice"), now())
        .await
        .unwrap();

    let prompt = &service.llm().prompts()[0];
    assert!(prompt.contains(&format!(
        "<Subreddit name=\"secretclub\">{}</Subreddit>",
        DESCRIPTION_UNAVAILABLE
    )));
    assert!(prompt.contains("<Subreddit name=\"rust\">(No description available)</Subreddit>"));

    let cache = service.cache();
    assert!(cache
        .get_at::<String>(
            Namespace::SubredditDescriptions,
            &CacheKey::subreddit("secretclub"),
            now()
        )
        .is_none());
    assert!(cache
        .get_at::<String>(Namespace::SubredditDescriptions, &CacheKey::subreddit("rust"), now())
        .is_some());
}

#[tokio::test]
async fn test_tts_failure_leaves_analysis_intact() {
    let dir = TempDir::new().unwrap();
    let service = AnalysisService::new(alice(), FakeLlm::replying("The analysis."), enabled_cache(&dir));
    let report = service
        .analyze_at(&AnalysisRequest::new("alice"), now())
        .await
        .unwrap();

    let tts = FakeTts {
        available: false,
        spoken: Mutex::new(Vec::new()),
    };
    let output = AudioOutput::file_only(None, dir.path().to_path_buf());
    let result = speak_summary(service.llm(), &tts, &output, &report.record, 350).await;

    assert!(matches!(result, Err(TtsError::ServiceUnavailable { .. })));
    assert_eq!(report.record.analysis, "The analysis.");
    assert!(!dir.path().join("speech").exists());

    let key = CacheKey::analysis("alice", &AnalysisOptions::default());
    let entry = service
        .cache()
        .get_at::<AnalysisRecord>(Namespace::AnalysisResults, &key, now())
        .unwrap();
    assert_eq!(entry.value.analysis, "The analysis.");
}

#[tokio::test]
async fn test_speak_summary_writes_audio() {
    let dir = TempDir::new().unwrap();
    let llm = FakeLlm::replying("Alice is a friendly Rust programmer.");
    let tts = FakeTts {
        available: true,
        spoken: Mutex::new(Vec::new()),
    };
    let output = AudioOutput::file_only(None, dir.path().to_path_buf());

    let delivery = speak_summary(&llm, &tts, &output, &cached_record("## Long analysis"), 350)
        .await
        .unwrap();

    assert_eq!(
        tts.spoken.lock().unwrap().as_slice(),
        ["Alice is a friendly Rust programmer.".to_string()]
    );
    assert!(llm.prompts()[0].starts_with("<RedditSummaryRequest>"));
    assert_eq!(
        delivery.saved_to,
        Some(dir.path().join("speech").join("alice.wav"))
    );
}

#[tokio::test]
async fn test_speak_summary_falls_back_when_llm_fails() {
    let dir = TempDir::new().unwrap();
    let tts = FakeTts {
        available: true,
        spoken: Mutex::new(Vec::new()),
    };
    let output = AudioOutput::file_only(None, dir.path().to_path_buf());
    let record = cached_record("## Summary\nAlice writes about Rust. She is helpful.");

    speak_summary(&FakeLlm::failing(), &tts, &output, &record, 350)
        .await
        .unwrap();

    assert_eq!(
        tts.spoken.lock().unwrap().as_slice(),
        ["Summary Alice writes about Rust. She is helpful.".to_string()]
    );
}
