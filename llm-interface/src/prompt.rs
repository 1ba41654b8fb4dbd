//! XML prompt documents.
//!
//! All dynamic text goes through `quick-xml`'s writer, which escapes text
//! nodes and attribute values. Characters XML 1.0 cannot carry at all are
//! stripped first, so the output always parses.

use chrono::SecondsFormat;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::borrow::Cow;
use whodis_core::{Activity, AnalysisOptions, Comment, CoreError, Post, SubredditContexts};

pub const ANALYSIS_INSTRUCTIONS: &str = "The following data is provided in XML format, with subreddit contexts, instructions, and user activities clearly separated into distinct tags. \
Each <Activity> element has attributes for type, subreddit, and creation time. Comments contain <Thread>, <Content> and optionally <ParentContext> elements; posts contain <Title> and optionally <Content>. \
The <SubredditContexts> tag describes the relevant subreddits in <Subreddit> elements. \
Use the information in <SubredditContexts>, <Instructions>, and <Activities> to infer the following:\n\
1. The user's likely personality traits.\n\
2. Their general interests.\n\
3. Any recurring themes or patterns in their discussions.\n\
4. How to best engage with this user in future interactions.\n\
Be concise and insightful in your analysis. Break down the user activities and their implications into distinct sections. \
The output must be in a professional tone, suitable for a report, and formatted as markdown.";

/// Per-field limits, in characters, applied before escaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptLimits {
    pub include_post_bodies: bool,
    pub include_parent_context: bool,
    pub max_comment_length: usize,
    pub max_post_body_length: usize,
    pub max_parent_context_length: usize,
    pub max_title_length: usize,
}

impl From<&AnalysisOptions> for PromptLimits {
    fn from(options: &AnalysisOptions) -> Self {
        Self {
            include_post_bodies: options.include_post_bodies,
            include_parent_context: options.include_parent_context,
            max_comment_length: options.max_comment_length,
            max_post_body_length: options.max_post_body_length,
            max_parent_context_length: options.max_parent_context_length,
            max_title_length: options.max_title_length,
        }
    }
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self::from(&AnalysisOptions::default())
    }
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Removes characters that are illegal in XML 1.0 even when escaped.
pub fn sanitize_xml_text(text: &str) -> Cow<'_, str> {
    if text.chars().all(is_xml_char) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|&c| is_xml_char(c)).collect())
    }
}

/// The first `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn clean(text: &str, max_chars: usize) -> String {
    truncate_chars(&sanitize_xml_text(text), max_chars).to_string()
}

fn xml_error(e: impl std::fmt::Display) -> CoreError {
    CoreError::Xml {
        message: e.to_string(),
    }
}

type XmlWriter = Writer<Vec<u8>>;

fn write_start(w: &mut XmlWriter, tag: &str, attrs: &[(&str, &str)]) -> Result<(), CoreError> {
    let mut el = BytesStart::new(tag);
    for (key, value) in attrs {
        let value = sanitize_xml_text(value);
        el.push_attribute((*key, &*value));
    }
    w.write_event(Event::Start(el)).map_err(xml_error)
}

fn write_end(w: &mut XmlWriter, tag: &str) -> Result<(), CoreError> {
    w.write_event(Event::End(BytesEnd::new(tag))).map_err(xml_error)
}

/// Writes `text` as-is; callers sanitize and truncate first.
fn write_text(w: &mut XmlWriter, text: &str) -> Result<(), CoreError> {
    w.write_event(Event::Text(BytesText::new(text))).map_err(xml_error)
}

fn write_text_elem(w: &mut XmlWriter, tag: &str, text: &str) -> Result<(), CoreError> {
    write_start(w, tag, &[])?;
    write_text(w, text)?;
    write_end(w, tag)
}

fn finish(w: XmlWriter) -> Result<String, CoreError> {
    String::from_utf8(w.into_inner()).map_err(xml_error)
}

fn write_comment(w: &mut XmlWriter, comment: &Comment, limits: &PromptLimits) -> Result<(), CoreError> {
    let created = comment.created_utc.to_rfc3339_opts(SecondsFormat::Secs, true);
    write_start(
        w,
        "Activity",
        &[("type", "comment"), ("subreddit", comment.subreddit.as_str()), ("created", created.as_str())],
    )?;
    write_text_elem(w, "Thread", &clean(&comment.link_title, limits.max_title_length))?;
    write_text_elem(w, "Content", &clean(&comment.body, limits.max_comment_length))?;

    if limits.include_parent_context {
        if let Some(parent) = comment.parent_context.as_deref().filter(|p| !p.trim().is_empty()) {
            write_text_elem(w, "ParentContext", &clean(parent, limits.max_parent_context_length))?;
        }
    }
    write_end(w, "Activity")
}

fn write_post(w: &mut XmlWriter, post: &Post, limits: &PromptLimits) -> Result<(), CoreError> {
    let created = post.created_utc.to_rfc3339_opts(SecondsFormat::Secs, true);
    write_start(
        w,
        "Activity",
        &[("type", "post"), ("subreddit", post.subreddit.as_str()), ("created", created.as_str())],
    )?;
    write_text_elem(w, "Title", &clean(&post.title, limits.max_title_length))?;

    if limits.include_post_bodies && !post.selftext.trim().is_empty() {
        write_text_elem(w, "Content", &clean(&post.selftext, limits.max_post_body_length))?;
    }
    write_end(w, "Activity")
}

/// Builds the `RedditAnalysisRequest` document. Activities are written in
/// the order given; the caller has already sorted and bounded them.
pub fn build_analysis_prompt(
    activities: &[Activity],
    contexts: &SubredditContexts,
    instructions: &str,
    limits: &PromptLimits,
) -> Result<String, CoreError> {
    if let Some(bad) = activities.iter().find(|a| a.subreddit().trim().is_empty()) {
        return Err(CoreError::malformed(bad.id(), "missing subreddit"));
    }

    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_start(&mut w, "RedditAnalysisRequest", &[])?;

    write_start(&mut w, "SubredditContexts", &[])?;
    for context in contexts.values() {
        write_start(&mut w, "Subreddit", &[("name", context.name.as_str())])?;
        write_text(&mut w, &sanitize_xml_text(&context.description))?;
        write_end(&mut w, "Subreddit")?;
    }
    write_end(&mut w, "SubredditContexts")?;

    write_text_elem(&mut w, "Instructions", &sanitize_xml_text(instructions))?;

    write_start(&mut w, "Activities", &[])?;
    for activity in activities {
        match activity {
            Activity::Comment(comment) => write_comment(&mut w, comment, limits)?,
            Activity::Post(post) => write_post(&mut w, post, limits)?,
        }
    }
    write_end(&mut w, "Activities")?;

    write_end(&mut w, "RedditAnalysisRequest")?;
    finish(w)
}

pub fn summary_instructions(max_words: usize) -> String {
    format!(
        "Summarize the following Reddit user analysis in a conversational, professional tone. \
Avoid section headers, markdown, or lists. Make it sound like you're giving a quick spoken overview to a professional colleague. \
Limit the summary to about {} words or less.",
        max_words
    )
}

/// Builds the `RedditSummaryRequest` document used before speech synthesis.
pub fn build_summary_prompt(analysis: &str, max_words: usize) -> Result<String, CoreError> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_start(&mut w, "RedditSummaryRequest", &[])?;
    write_text_elem(&mut w, "Instructions", &summary_instructions(max_words))?;
    write_text_elem(&mut w, "Analysis", &sanitize_xml_text(analysis))?;
    write_end(&mut w, "RedditSummaryRequest")?;
    finish(w)
}
