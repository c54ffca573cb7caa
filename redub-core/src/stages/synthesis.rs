use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use tokio::fs;
use tracing::{error, info};

use crate::config::SynthesisSection;
use crate::store::{staging_path, ArtifactKind, ArtifactStore, ItemName};

use super::error::{StageError, StageResult};
use super::retry::RetryPolicy;
use super::transcoder::discard;

const MAX_ERROR_BODY: usize = 512;

/// Turns text into encoded speech audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> StageResult<Vec<u8>>;
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// ElevenLabs text-to-speech over HTTPS.
pub struct ElevenLabsClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model_id: String,
    settings: VoiceSettings,
}

impl ElevenLabsClient {
    pub fn new(section: &SynthesisSection) -> StageResult<Self> {
        if section.api_key.trim().is_empty() {
            return Err(StageError::Config(
                "synthesis api key is not configured".into(),
            ));
        }
        let client = Client::builder()
            .user_agent("redub/0.1")
            .timeout(section.retry.timeout().max(Duration::from_secs(1)))
            .build()
            .map_err(|err| StageError::Network(err.to_string()))?;
        let endpoint = format!(
            "{}/v1/text-to-speech/{}",
            section.base_url.trim_end_matches('/'),
            section.voice_id
        );
        Ok(Self {
            client,
            endpoint,
            api_key: section.api_key.clone(),
            model_id: section.model_id.clone(),
            settings: VoiceSettings {
                stability: section.stability,
                similarity_boost: section.similarity_boost,
            },
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    async fn synthesize(&self, text: &str) -> StageResult<Vec<u8>> {
        let request = SynthesisRequest {
            text,
            model_id: &self.model_id,
            voice_settings: self.settings,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "audio/mpeg")
            .header(CONTENT_TYPE, "application/json")
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(StageError::Synthesis {
                status: status.as_u16(),
                body,
            });
        }
        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(StageError::EmptyAudio);
        }
        Ok(audio.to_vec())
    }
}

/// Synthesizes a transcript and stores it as `<synthesized>/<item>_tts.<ext>`.
#[derive(Clone)]
pub struct SynthesisStage {
    store: ArtifactStore,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    retry: RetryPolicy,
}

impl SynthesisStage {
    pub fn new(
        store: ArtifactStore,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            synthesizer,
            retry,
        }
    }

    pub async fn run(&self, item: &ItemName, text: &str) -> StageResult<PathBuf> {
        if text.trim().is_empty() {
            return Err(StageError::EmptyTranscript(item.to_string()));
        }
        let target = self.store.artifact_path(ArtifactKind::SynthesizedAudio, item);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StageError::io(parent, source))?;
        }

        let audio = match self
            .retry
            .run("synthesize", |_| self.synthesizer.synthesize(text))
            .await
        {
            Ok(audio) => audio,
            Err(err) => {
                error!(item = %item, error = %err, "speech synthesis failed");
                return Err(err);
            }
        };

        let staged = staging_path(&target);
        if let Err(source) = fs::write(&staged, &audio).await {
            discard(&staged).await;
            return Err(StageError::io(&staged, source));
        }
        fs::rename(&staged, &target)
            .await
            .map_err(|source| StageError::io(&target, source))?;
        info!(item = %item, bytes = audio.len(), path = %target.display(), "synthesized audio saved");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySection;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn section(base_url: String, api_key: &str) -> SynthesisSection {
        SynthesisSection {
            base_url,
            api_key: api_key.into(),
            voice_id: "voice-1".into(),
            model_id: "eleven_monolingual_v1".into(),
            stability: 0.5,
            similarity_boost: 0.5,
            retry: RetrySection {
                max_attempts: 1,
                timeout_seconds: 5,
                backoff_initial_ms: 0,
                backoff_max_ms: 0,
            },
        }
    }

    /// Serves one request with the canned `response` and returns the raw request.
    async fn serve_once(response: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let read = socket.read(&mut buf).await.unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= split + 4 + length {
                        break;
                    }
                }
            }
            socket.write_all(response).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let err = ElevenLabsClient::new(&section("http://localhost".into(), " ")).err();
        assert!(matches!(err, Some(StageError::Config(_))));
    }

    #[tokio::test]
    async fn posts_transcript_and_returns_audio() {
        let (base, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nContent-Length: 4\r\nConnection: close\r\n\r\nID3!",
        )
        .await;
        let client = ElevenLabsClient::new(&section(base, "secret")).unwrap();
        let audio = client.synthesize("hello there").await.unwrap();
        assert_eq!(audio, b"ID3!");

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /v1/text-to-speech/voice-1 "));
        assert!(lower.contains("xi-api-key: secret"));
        assert!(lower.contains("accept: audio/mpeg"));
        assert!(request.contains("\"text\":\"hello there\""));
        assert!(request.contains("\"model_id\":\"eleven_monolingual_v1\""));
        assert!(request.contains("\"stability\":0.5"));
    }

    #[tokio::test]
    async fn error_status_carries_body() {
        let (base, _server) = serve_once(
            b"HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\nContent-Length: 22\r\nConnection: close\r\n\r\n{\"detail\":\"bad key\"}\r\n",
        )
        .await;
        let client = ElevenLabsClient::new(&section(base, "wrong")).unwrap();
        let err = client.synthesize("hello").await.unwrap_err();
        match err {
            StageError::Synthesis { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("bad key"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
