use llm_interface::{build_summary_prompt, LlmProvider};
use tracing::{info, warn};
use tts_client::{AudioDelivery, AudioOutput, SpeechSynthesizer};
use whodis_core::{AnalysisRecord, CoreError, TtsError};

fn into_tts_error(error: CoreError) -> TtsError {
    match error {
        CoreError::Tts(e) => e,
        other => TtsError::SynthesisFailed {
            reason: other.to_string(),
        },
    }
}

/// Plain-text opening of an analysis for when the LLM cannot summarize it:
/// markdown markers are dropped and whole sentences are kept until
/// `max_words` is reached. Always returns at least one sentence.
pub fn fallback_summary(analysis: &str, max_words: usize) -> String {
    let plain: String = analysis
        .lines()
        .map(|line| line.trim_start_matches(|c: char| c == '#' || c == '-' || c == '>' || c.is_whitespace()))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '`'))
        .collect();

    let mut summary = String::new();
    let mut words = 0;
    for sentence in plain.split_inclusive(|c: char| matches!(c, '.' | '!' | '?')) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let count = sentence.split_whitespace().count();
        if words > 0 && words + count > max_words {
            break;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(sentence);
        words += count;
    }
    summary
}

/// Asks the LLM for a short spoken overview of `record`, then synthesizes
/// and outputs it. Every failure surfaces as a [`TtsError`]; the analysis
/// itself is never affected.
pub async fn speak_summary<L, S>(
    llm: &L,
    tts: &S,
    output: &AudioOutput,
    record: &AnalysisRecord,
    max_words: usize,
) -> Result<AudioDelivery, TtsError>
where
    L: LlmProvider,
    S: SpeechSynthesizer,
{
    let summary = match build_summary_prompt(&record.analysis, max_words) {
        Ok(prompt) => llm.complete(&prompt).await,
        Err(e) => Err(e),
    };

    let text = match summary {
        Ok(text) => text,
        Err(e) => {
            warn!("Summary generation failed, speaking the start of the analysis: {}", e);
            fallback_summary(&record.analysis, max_words)
        }
    };

    if text.trim().is_empty() {
        return Err(TtsError::SynthesisFailed {
            reason: "nothing to say".to_string(),
        });
    }

    info!("Generating speech for u/{}", record.username);
    let audio = tts.synthesize(&text).await.map_err(into_tts_error)?;
    output
        .deliver(audio, &record.username)
        .await
        .map_err(into_tts_error)
}
