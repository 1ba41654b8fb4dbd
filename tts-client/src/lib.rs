use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use whodis_core::{CoreError, TtsError};

pub const DEFAULT_TTS_BASE_URL: &str = "http://localhost:8880/v1";
pub const DEFAULT_TTS_MODEL: &str = "kokoro";
pub const DEFAULT_TTS_VOICE: &str = "af_sky+af_bella";

const RESPONSE_FORMAT: &str = "wav";

/// Turns text into encoded audio bytes.
pub trait SpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CoreError>;
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

/// Client for any server exposing the OpenAI `/audio/speech` route,
/// e.g. a local Kokoro instance.
pub struct OpenAiSpeechClient {
    http_client: Client,
    base_url: String,
    model: String,
    voice: String,
}

impl OpenAiSpeechClient {
    pub fn new(base_url: &str, model: &str, voice: &str) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            voice: voice.to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/audio/speech", self.base_url)
    }
}

impl SpeechSynthesizer for OpenAiSpeechClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CoreError> {
        let endpoint = self.endpoint();
        let request = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: text,
            response_format: RESPONSE_FORMAT,
        };

        info!("Synthesizing {} chars of speech with voice {}", text.chars().count(), self.voice);

        let response = self
            .http_client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Speech request to {} failed: {}", endpoint, e);
                if e.is_connect() || e.is_timeout() {
                    TtsError::ServiceUnavailable {
                        endpoint: endpoint.clone(),
                    }
                } else {
                    TtsError::SynthesisFailed {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Speech service returned {}: {}", status, body);
            return Err(TtsError::SynthesisFailed {
                reason: format!("status {}: {}", status, body.chars().take(200).collect::<String>()),
            }
            .into());
        }

        let audio = response.bytes().await.map_err(|e| TtsError::SynthesisFailed {
            reason: e.to_string(),
        })?;

        if audio.is_empty() {
            return Err(TtsError::EmptyAudio.into());
        }

        debug!("Received {} bytes of audio", audio.len());
        Ok(audio.to_vec())
    }
}

/// What happened to a synthesized clip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioDelivery {
    pub played: bool,
    pub saved_to: Option<PathBuf>,
}

/// Plays audio on the default output device when built with `playback`,
/// and writes it to disk when asked to or when it cannot be played.
pub struct AudioOutput {
    save_path: Option<PathBuf>,
    fallback_dir: PathBuf,
    play: bool,
}

impl AudioOutput {
    pub fn new(save_path: Option<PathBuf>, fallback_dir: PathBuf) -> Self {
        Self {
            save_path,
            fallback_dir,
            play: cfg!(feature = "playback"),
        }
    }

    /// Never touches the audio device.
    pub fn file_only(save_path: Option<PathBuf>, fallback_dir: PathBuf) -> Self {
        Self {
            save_path,
            fallback_dir,
            play: false,
        }
    }

    pub fn plays(&self) -> bool {
        self.play
    }

    /// Where a clip for `username` lands when no explicit path was given.
    pub fn fallback_path(&self, username: &str) -> PathBuf {
        self.fallback_dir
            .join("speech")
            .join(format!("{}.{}", username.to_lowercase(), RESPONSE_FORMAT))
    }

    fn target_path(&self, username: &str) -> Option<PathBuf> {
        match (&self.save_path, self.play) {
            (Some(path), _) => Some(path.clone()),
            (None, false) => Some(self.fallback_path(username)),
            (None, true) => None,
        }
    }

    pub async fn deliver(&self, audio: Vec<u8>, username: &str) -> Result<AudioDelivery, CoreError> {
        let mut delivery = AudioDelivery::default();

        if let Some(path) = self.target_path(username) {
            write_audio(&path, &audio).await?;
            info!("Saved speech to {}", path.display());
            delivery.saved_to = Some(path);
        }

        if self.play {
            play_audio(audio).await?;
            delivery.played = true;
        }

        Ok(delivery)
    }
}

async fn write_audio(path: &Path, audio: &[u8]) -> Result<(), TtsError> {
    let output_failed = |e: std::io::Error| TtsError::OutputFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(output_failed)?;
    }
    tokio::fs::write(path, audio).await.map_err(output_failed)
}

#[cfg(feature = "playback")]
async fn play_audio(audio: Vec<u8>) -> Result<(), TtsError> {
    use rodio::{Decoder, OutputStreamBuilder, Sink};
    use std::io::Cursor;

    let playback_failed = |reason: String| TtsError::PlaybackFailed { reason };

    // The output stream is not Send, so it lives and dies on the blocking thread
    tokio::task::spawn_blocking(move || {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| playback_failed(format!("no output device: {}", e)))?;
        let sink = Sink::connect_new(stream.mixer());
        let source = Decoder::new(Cursor::new(audio))
            .map_err(|e| playback_failed(format!("could not decode audio: {}", e)))?;

        sink.append(source);
        sink.sleep_until_end();
        debug!("Playback finished");
        Ok(())
    })
    .await
    .map_err(|e| playback_failed(e.to_string()))?
}

#[cfg(not(feature = "playback"))]
async fn play_audio(_audio: Vec<u8>) -> Result<(), TtsError> {
    Err(TtsError::PlaybackFailed {
        reason: "built without the playback feature".to_string(),
    })
}
