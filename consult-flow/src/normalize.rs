use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::session::{InputType, SymptomInput};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

const IMAGE_FINDINGS_INSTRUCTION: &str = "Describe only the objective visual findings in this \
image that could be clinically relevant (color, shape, size, location, texture, swelling, \
discharge). Do not speculate about diagnoses and do not give advice. Return plain text.";

/// Converts recorded audio into a transcript. May fail; the normalizer degrades.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> anyhow::Result<String>;
}

/// Extracts objective findings from an image under a given instruction.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn extract(&self, image_url: &str, instruction: &str) -> anyhow::Result<String>;
}

/// Maps a `(input_type, content)` submission to plain text for the reasoner.
///
/// Never fails: every external-call failure is converted into a sentinel text
/// payload describing the degraded state, so the pipeline can keep going and
/// the user gets a retry prompt instead of a stuck session.
pub struct Normalizer {
    transcription: Arc<dyn TranscriptionClient>,
    vision: Arc<dyn VisionClient>,
    http: reqwest::Client,
}

impl Normalizer {
    pub fn new(transcription: Arc<dyn TranscriptionClient>, vision: Arc<dyn VisionClient>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            transcription,
            vision,
            http,
        }
    }

    pub async fn normalize(&self, input: &SymptomInput) -> String {
        match input.input_type {
            InputType::Text => input.content.clone(),
            InputType::Voice => self.normalize_voice(&input.content).await,
            InputType::Image => self.normalize_image(&input.content).await,
        }
    }

    async fn normalize_voice(&self, audio_url: &str) -> String {
        let audio = match self.download(audio_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to download audio {}: {}", audio_url, e);
                return "(The patient submitted a voice recording, but it could not be \
                        retrieved. Ask them to describe their symptoms in text.)"
                    .to_string();
            }
        };

        match self.transcription.transcribe(&audio).await {
            Ok(transcript) => {
                info!(
                    "Transcribed {} bytes of audio into {} characters",
                    audio.len(),
                    transcript.len()
                );
                format!("Patient's spoken account (transcribed): {transcript}")
            }
            Err(e) => {
                warn!("Transcription failed for {}: {}", audio_url, e);
                "(The patient submitted a voice recording, but transcription failed. Ask \
                 them to describe their symptoms in text.)"
                    .to_string()
            }
        }
    }

    async fn normalize_image(&self, image_url: &str) -> String {
        match self
            .vision
            .extract(image_url, IMAGE_FINDINGS_INSTRUCTION)
            .await
        {
            Ok(findings) => format!("Objective findings from the patient's image: {findings}"),
            Err(e) => {
                warn!("Vision extraction failed for {}: {}", image_url, e);
                "(The patient submitted an image, but it could not be analyzed. Ask them \
                 to describe what the image shows.)"
                    .to_string()
            }
        }
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTranscription(anyhow::Result<String>);

    #[async_trait]
    impl TranscriptionClient for FixedTranscription {
        async fn transcribe(&self, _audio: &[u8]) -> anyhow::Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }

    struct FixedVision(anyhow::Result<String>);

    #[async_trait]
    impl VisionClient for FixedVision {
        async fn extract(&self, _url: &str, _instruction: &str) -> anyhow::Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }

    fn normalizer(
        transcription: anyhow::Result<String>,
        vision: anyhow::Result<String>,
    ) -> Normalizer {
        Normalizer::new(
            Arc::new(FixedTranscription(transcription)),
            Arc::new(FixedVision(vision)),
        )
    }

    #[tokio::test]
    async fn text_passes_through_unchanged() {
        let n = normalizer(Ok(String::new()), Ok(String::new()));
        let input = SymptomInput {
            session_id: None,
            input_type: InputType::Text,
            content: "fever and cough for 3 days".to_string(),
        };
        assert_eq!(n.normalize(&input).await, "fever and cough for 3 days");
    }

    #[tokio::test]
    async fn image_findings_are_provenance_tagged() {
        let n = normalizer(
            Ok(String::new()),
            Ok("red circular rash, ~3cm, on forearm".to_string()),
        );
        let input = SymptomInput {
            session_id: None,
            input_type: InputType::Image,
            content: "https://example.com/rash.jpg".to_string(),
        };
        let text = n.normalize(&input).await;
        assert!(text.starts_with("Objective findings"));
        assert!(text.contains("red circular rash"));
    }

    #[tokio::test]
    async fn vision_failure_degrades_to_sentinel_text() {
        let n = normalizer(Ok(String::new()), Err(anyhow::anyhow!("vision api down")));
        let input = SymptomInput {
            session_id: None,
            input_type: InputType::Image,
            content: "https://example.com/rash.jpg".to_string(),
        };
        let text = n.normalize(&input).await;
        assert!(text.contains("could not be analyzed"));
    }

    #[tokio::test]
    async fn unreachable_audio_url_degrades_to_sentinel_text() {
        // No server behind this address; the download fails fast and the
        // transcription client is never reached.
        let n = normalizer(Ok("should not appear".to_string()), Ok(String::new()));
        let input = SymptomInput {
            session_id: None,
            input_type: InputType::Voice,
            content: "http://127.0.0.1:1/audio.mp3".to_string(),
        };
        let text = n.normalize(&input).await;
        assert!(text.contains("could not be retrieved"));
        assert!(!text.contains("should not appear"));
    }
}
