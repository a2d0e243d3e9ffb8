//! Subprocess-backed providers.
//!
//! A [`CommandProvider`] runs an external program once per call, writes a JSON
//! request to its stdin and reads a JSON response from stdout. Any script that
//! speaks this protocol can back the text, speech or image capability, which
//! keeps vendor API clients out of this crate.
//!
//! Request: `{"capability": "...", ...capability fields}`.
//! Responses:
//! - llm: the generated JSON value
//! - tts: `{"audio_base64", "format", "alignment": {characters, character_start_times_seconds, character_end_times_seconds}}`
//! - image: `{"image_base64"}`

use std::process::Stdio;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{ImageProvider, LlmProvider, Synthesis, TtsProvider};
use crate::domain::{CharacterTimingTable, Orientation};
use crate::error::PipelineError;

/// Which trait a configured command backs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Llm,
    Tts,
    Image,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Llm => "llm",
            Capability::Tts => "tts",
            Capability::Image => "image",
        }
    }
}

/// Provider that delegates each call to a subprocess
#[derive(Debug, Clone)]
pub struct CommandProvider {
    name: String,
    program: String,
    args: Vec<String>,
}

#[derive(Deserialize)]
struct TtsResponse {
    audio_base64: String,
    #[serde(default = "default_audio_format")]
    format: String,
    alignment: CharacterTimingTable,
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

#[derive(Deserialize)]
struct ImageResponse {
    image_base64: String,
}

impl CommandProvider {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Spawn the program, send `request`, and return its stdout.
    ///
    /// The child is killed if this future is dropped, so the governor's call
    /// timeout also stops the process.
    async fn exchange(&self, request: &Value) -> Result<Vec<u8>, PipelineError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PipelineError::provider(&self.name, format!("failed to spawn '{}': {}", self.program, e))
            })?;

        let body = serde_json::to_vec(request)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&body).await?;
            // Drop stdin to signal EOF
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(PipelineError::provider(
                &self.name,
                format!("exit code {}: {}", exit_code, stderr.trim()),
            ));
        }

        debug!(provider = %self.name, bytes = output.stdout.len(), "Command response received");
        Ok(output.stdout)
    }

    fn decode(&self, field: &str, encoded: &str) -> Result<Vec<u8>, PipelineError> {
        STANDARD
            .decode(encoded.trim())
            .map_err(|e| PipelineError::provider(&self.name, format!("invalid base64 in '{}': {}", field, e)))
    }

    fn parse<T: for<'de> Deserialize<'de>>(&self, stdout: &[u8]) -> Result<T, PipelineError> {
        serde_json::from_slice(stdout)
            .map_err(|e| PipelineError::provider(&self.name, format!("malformed response: {}", e)))
    }
}

#[async_trait]
impl LlmProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        instructions: &str,
        payload: &Value,
        output_schema: &Value,
    ) -> Result<Value, PipelineError> {
        let request = json!({
            "capability": Capability::Llm.as_str(),
            "instructions": instructions,
            "payload": payload,
            "output_schema": output_schema,
        });
        let stdout = self.exchange(&request).await?;
        self.parse(&stdout)
    }
}

#[async_trait]
impl TtsProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        model_version: &str,
    ) -> Result<Synthesis, PipelineError> {
        let request = json!({
            "capability": Capability::Tts.as_str(),
            "text": text,
            "voice_id": voice_id,
            "model_version": model_version,
        });
        let stdout = self.exchange(&request).await?;
        let response: TtsResponse = self.parse(&stdout)?;

        Ok(Synthesis {
            audio: self.decode("audio_base64", &response.audio_base64)?,
            format: response.format,
            timing: response.alignment,
        })
    }
}

#[async_trait]
impl ImageProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, orientation: Orientation) -> Result<Vec<u8>, PipelineError> {
        let (width, height) = orientation.frame_size();
        let request = json!({
            "capability": Capability::Image.as_str(),
            "prompt": prompt,
            "orientation": orientation.as_str(),
            "width": width,
            "height": height,
        });
        let stdout = self.exchange(&request).await?;
        let response: ImageResponse = self.parse(&stdout)?;
        self.decode("image_base64", &response.image_base64)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(name: &str, script: &str) -> CommandProvider {
        CommandProvider::new(name, "sh").with_args(vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_llm_round_trip() {
        let provider = shell("echo-llm", r#"cat > /dev/null; printf '{"goal":"teach"}'"#);
        let value = provider
            .invoke("Write a goal", &json!({"topic": "octopus"}), &json!({}))
            .await
            .unwrap();
        assert_eq!(value["goal"], "teach");
    }

    #[tokio::test]
    async fn test_tts_response_decoded() {
        // "aGk=" is base64 for "hi"
        let provider = shell(
            "echo-tts",
            r#"cat > /dev/null; printf '{"audio_base64":"aGk=","alignment":{"characters":["H","i"],"character_start_times_seconds":[0.0,0.1],"character_end_times_seconds":[0.1,0.2]}}'"#,
        );
        let synthesis = provider.synthesize("Hi", "voice", "eleven_v3").await.unwrap();

        assert_eq!(synthesis.audio, b"hi");
        assert_eq!(synthesis.format, "mp3");
        assert_eq!(synthesis.timing.len(), 2);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_provider_error() {
        let provider = shell("broken", "cat > /dev/null; echo 'quota exceeded' >&2; exit 3");
        let err = provider
            .generate("a lighthouse", Orientation::Portrait)
            .await
            .unwrap_err();

        match err {
            PipelineError::Provider { provider, message } => {
                assert_eq!(provider, "broken");
                assert!(message.contains("exit code 3"));
                assert!(message.contains("quota exceeded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let provider = shell("garbled", "cat > /dev/null; echo not-json");
        let err = provider.invoke("x", &json!({}), &json!({})).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
