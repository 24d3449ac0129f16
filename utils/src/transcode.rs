//! Conversion of uploaded compressed audio into the raw pcm16 the realtime API accepts.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::audio::REALTIME_API_PCM16_SAMPLE_RATE;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transcoder failed ({status}): {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("transcoder timed out after {0:?}")]
    Timeout(Duration),
    #[error("transcoder i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    /// What the tool itself reported, when it got far enough to report anything.
    pub fn diagnostic(&self) -> String {
        match self {
            TranscodeError::Failed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }
}

/// Turns a compressed audio blob into mono 24 kHz signed 16-bit little-endian PCM.
#[async_trait]
pub trait Transcode: Send + Sync {
    async fn transcode(&self, input: Vec<u8>) -> Result<Vec<u8>, TranscodeError>;
}

/// Runs an ffmpeg-compatible binary, piping the whole input through stdin and
/// collecting the whole output from stdout.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    timeout: Duration,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    fn args() -> Vec<String> {
        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            "pipe:0",
            "-ar",
            &REALTIME_API_PCM16_SAMPLE_RATE.to_string(),
            "-ac",
            "1",
            "-f",
            "s16le",
            "pipe:1",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
    }
}

#[async_trait]
impl Transcode for FfmpegTranscoder {
    async fn transcode(&self, input: Vec<u8>) -> Result<Vec<u8>, TranscodeError> {
        let start = Instant::now();
        let input_len = input.len();

        let mut child = tokio::process::Command::new(&self.program)
            .args(Self::args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("transcoder stdin was not captured"))?;

        // Feed stdin concurrently so a full stdout pipe cannot stall the child.
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                writer.abort();
                warn!(timeout = ?self.timeout, input_len, "transcoder timed out");
                return Err(TranscodeError::Timeout(self.timeout));
            }
        };

        match writer.await {
            Ok(Err(e)) => debug!(error = %e, "transcoder closed stdin early"),
            Err(e) => debug!(error = %e, "stdin writer did not finish"),
            Ok(Ok(())) => {}
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(status = %output.status, %stderr, "transcoder failed");
            return Err(TranscodeError::Failed {
                status: output.status,
                stderr,
            });
        }

        debug!(
            input_len,
            output_len = output.stdout.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "transcoded audio"
        );
        Ok(output.stdout)
    }
}
