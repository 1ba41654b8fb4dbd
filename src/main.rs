use analysis_service::{speak_summary, AnalysisReport, AnalysisRequest, AnalysisService};
use clap::{ArgAction, Parser};
use disk_cache::{CacheMode, DiskCache, Namespace};
use llm_interface::GeminiProvider;
use reddit_client::{RedditClient, RedditOAuth2Config};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tts_client::{AudioOutput, OpenAiSpeechClient};
use whodis_core::{
    AnalysisOptions, CachePolicy, CoreError, Credentials, ErrorExt, ErrorReporter, Settings,
    DEFAULT_ANALYSIS_TTL_DAYS,
};

/// Analyze a Reddit user's public comments and posts with an LLM.
#[derive(Debug, Parser)]
#[command(name = "whodis", version, about)]
struct Args {
    /// Reddit username to analyze (a leading "u/" is ignored)
    username: String,

    /// Maximum number of comments to fetch
    #[arg(long, default_value_t = 100)]
    comments_limit: usize,

    /// Maximum number of posts to fetch
    #[arg(long, default_value_t = 50)]
    posts_limit: usize,

    /// Include post bodies, not just titles
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    include_post_bodies: bool,

    /// Maximum number of combined activities sent to the LLM
    #[arg(long, default_value_t = 200)]
    llm_activities_limit: usize,

    /// Truncate post bodies to this many characters
    #[arg(long, default_value_t = 500)]
    max_post_body_length: usize,

    /// Attach the text each comment replied to
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    include_parent_context: bool,

    /// Truncate parent context to this many characters
    #[arg(long, default_value_t = 500)]
    max_parent_context_length: usize,

    /// Truncate comment bodies to this many characters
    #[arg(long, default_value_t = 500)]
    max_comment_length: usize,

    /// Truncate thread and post titles to this many characters
    #[arg(long, default_value_t = 300)]
    max_title_length: usize,

    /// Days an analysis stays cached
    #[arg(long, default_value_t = DEFAULT_ANALYSIS_TTL_DAYS)]
    cache_days: u32,

    /// Ignore cached results but store the new one
    #[arg(long)]
    force_refresh: bool,

    /// Neither read nor write the cache
    #[arg(long)]
    no_cache: bool,

    /// Skip the spoken summary
    #[arg(long)]
    no_tts: bool,

    /// Also write the synthesized audio to this file
    #[arg(long, value_name = "PATH")]
    save_audio: Option<PathBuf>,

    /// Cache directory (overrides the settings file)
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Settings file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Remove expired cache entries before running
    #[arg(long)]
    prune_cache: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn username(&self) -> &str {
        let name = self.username.trim();
        name.strip_prefix("u/")
            .or_else(|| name.strip_prefix("/u/"))
            .unwrap_or(name)
    }

    fn options(&self) -> AnalysisOptions {
        AnalysisOptions {
            comments_limit: self.comments_limit,
            posts_limit: self.posts_limit,
            include_post_bodies: self.include_post_bodies,
            llm_activities_limit: self.llm_activities_limit,
            max_post_body_length: self.max_post_body_length,
            include_parent_context: self.include_parent_context,
            max_parent_context_length: self.max_parent_context_length,
            max_comment_length: self.max_comment_length,
            max_title_length: self.max_title_length,
        }
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::from_flags(self.force_refresh, self.no_cache)
    }

    fn cache_mode(&self) -> CacheMode {
        if self.no_cache {
            CacheMode::Disabled
        } else {
            CacheMode::Enabled
        }
    }
}

/// Removes expired entries from every namespace. A disabled cache is left
/// untouched.
fn prune_cache(cache: &DiskCache) -> Result<usize, CoreError> {
    let mut total = 0;
    for ns in Namespace::all() {
        let removed = cache.prune_expired(ns)?;
        tracing::info!("Pruned {} expired entries from {}", removed, ns.dir_name());
        total += removed;
    }
    Ok(total)
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn render_report(report: &AnalysisReport) -> String {
    let record = &report.record;
    let info = &record.user_info;
    let mut out = String::new();

    out.push_str(&format!("# Reddit User Analysis: u/{}\n\n", record.username));
    out.push_str("## General Information\n\n");
    out.push_str(&format!(
        "- Account Creation Date: {}\n",
        info.created_utc.format("%Y-%m-%d")
    ));
    out.push_str(&format!("- Comment Karma: {}\n", info.comment_karma));
    out.push_str(&format!("- Post Karma: {}\n", info.link_karma));
    if let (true, Some(at)) = (report.from_cache, report.cached_at) {
        out.push_str(&format!("- Cached analysis from {}\n", at.format("%Y-%m-%d %H:%M UTC")));
    }
    out.push_str("\n## Analysis of User's Personality and History\n\n");
    out.push_str(record.analysis.trim_end());
    out.push('\n');
    out
}

async fn run(args: Args) -> Result<(), CoreError> {
    let settings = Settings::load(args.config.as_deref())?;
    let cache_dir = args
        .cache_dir
        .clone()
        .unwrap_or_else(|| settings.cache.dir.clone());
    let cache = DiskCache::new(&cache_dir, args.cache_mode());

    if args.prune_cache {
        prune_cache(&cache)?;
    }

    let credentials = Credentials::from_env()?;
    let username = args.username();
    if username.is_empty() {
        return Err(CoreError::InvalidInput {
            message: "username must not be empty".to_string(),
        });
    }

    let reddit = RedditClient::new(RedditOAuth2Config::new(
        credentials.reddit_client_id.clone(),
        credentials.reddit_client_secret.clone(),
        settings.user_agent(&credentials),
    ))?;
    let llm = GeminiProvider::new(
        credentials.google_api_key.clone(),
        settings.llm.model.clone(),
        settings.llm.api_base.clone(),
        Duration::from_secs(settings.llm.timeout_secs),
    )?;

    let service = AnalysisService::new(reddit, llm, cache);
    let request = AnalysisRequest::new(username)
        .with_options(args.options())
        .with_cache_policy(args.cache_policy())
        .with_cache_days(args.cache_days);

    let result = service.analyze(&request).await;
    service.reddit().log_request_stats().await;
    let report = result?;
    println!("{}", render_report(&report));

    if args.no_tts {
        return Ok(());
    }

    let tts = OpenAiSpeechClient::new(&settings.tts.base_url, &settings.tts.model, &settings.tts.voice)?;
    let output = AudioOutput::new(args.save_audio.clone(), cache_dir);
    match speak_summary(
        service.llm(),
        &tts,
        &output,
        &report.record,
        settings.tts.summary_words,
    )
    .await
    {
        Ok(delivery) => {
            if let Some(path) = delivery.saved_to {
                tracing::info!("Spoken summary saved to {}", path.display());
            }
        }
        Err(e) => ErrorReporter::new().report_warning(&CoreError::from(e)),
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        ErrorReporter::new().report_error(&e);
        eprintln!("Error: {}", e.user_friendly_message());
        std::process::exit(1);
    }
}
