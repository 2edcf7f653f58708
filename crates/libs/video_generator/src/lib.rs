#![allow(clippy::missing_errors_doc)]

//! Boundary to the external video synthesis model.
//!
//! The model runs as a child process addressed over a line-delimited JSON
//! protocol (see [`protocol`]). This crate owns spawning the child, streaming
//! its progress into a [`ProgressSink`], relaying cooperative cancellation,
//! and classifying how a run ended. It knows nothing about jobs or the store.

pub mod protocol;

use crate::protocol::{parse_line, GeneratorRequest, StreamLine, CANCEL_LINE};
use app_state::GeneratorSettings;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Receives progress checkpoints from a running generation.
///
/// `report` is called for every progress line the generator emits;
/// `is_cancelled` is consulted right after, so a cancellation requested
/// through the store takes effect at the next checkpoint.
pub trait ProgressSink: Send {
    fn report(&mut self, fraction: f64) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
    fn is_cancelled(&self) -> bool;
}

#[derive(Debug)]
pub enum GenerationOutcome {
    Completed { path: PathBuf },
    Cancelled,
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator ran out of GPU memory: {0}")]
    Oom(String),

    #[error("generator failed: {0}")]
    Failed(String),

    #[error("generator protocol violation: {0}")]
    Protocol(String),

    #[error("generator io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct VideoGenerator {
    program: String,
    args: Vec<String>,
}

impl VideoGenerator {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &GeneratorSettings) -> Self {
        let mut parts = settings.command.split_whitespace().map(str::to_owned);
        let program = parts.next().unwrap_or_else(|| "python3".to_owned());
        Self {
            program,
            args: parts.collect(),
        }
    }

    /// Runs one generation to its end.
    ///
    /// When the sink reports cancellation at a checkpoint, the child is asked
    /// to stop; if it keeps going past `cancel_grace` it is killed. A success
    /// line that arrives before the grace runs out still wins over the
    /// cancellation.
    pub async fn generate<S: ProgressSink>(
        &self,
        request: &GeneratorRequest,
        sink: &mut S,
        cancel_grace: Duration,
    ) -> Result<GenerationOutcome, GeneratorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| GeneratorError::Protocol("child stdin unavailable".to_owned()))?;
        let request_line = serde_json::to_string(request)
            .map_err(|e| GeneratorError::Protocol(e.to_string()))?;
        stdin.write_all(request_line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GeneratorError::Protocol("child stdout unavailable".to_owned()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut grace_deadline: Option<Instant> = None;

        loop {
            let line = if let Some(deadline) = grace_deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match timeout(remaining, lines.next_line()).await {
                    Ok(result) => result?,
                    Err(_) => {
                        warn!("Generator did not stop within {cancel_grace:?}, killing it.");
                        child.start_kill()?;
                        let _ = child.wait().await;
                        return Ok(GenerationOutcome::Cancelled);
                    }
                }
            } else {
                lines.next_line().await?
            };

            let Some(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }

            match parse_line(&line) {
                Ok(StreamLine::Progress { progress }) => {
                    sink.report(progress).await;
                    if sink.is_cancelled() && grace_deadline.is_none() {
                        debug!("Cancellation observed at checkpoint, asking the generator to stop.");
                        stdin.write_all(CANCEL_LINE.as_bytes()).await?;
                        stdin.flush().await?;
                        grace_deadline = Some(Instant::now() + cancel_grace);
                    }
                }
                Ok(StreamLine::Done { ok: true, path, .. }) => {
                    let _ = child.wait().await;
                    let path = path.ok_or_else(|| {
                        GeneratorError::Protocol("success line without a path".to_owned())
                    })?;
                    return Ok(GenerationOutcome::Completed { path });
                }
                Ok(StreamLine::Done {
                    ok: false,
                    kind,
                    detail,
                    ..
                }) => {
                    let _ = child.wait().await;
                    let detail = detail.unwrap_or_else(|| "no detail reported".to_owned());
                    return Err(match kind.as_deref() {
                        Some("oom") => GeneratorError::Oom(detail),
                        _ => GeneratorError::Failed(detail),
                    });
                }
                // Model chatter on stdout is not a protocol violation.
                Err(_) => debug!("Ignoring generator output: {line}"),
            }
        }

        // EOF without a final status line.
        let status = child.wait().await?;
        if grace_deadline.is_some() {
            return Ok(GenerationOutcome::Cancelled);
        }
        Err(GeneratorError::Protocol(format!(
            "generator exited ({status}) before reporting a result"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestSink {
        values: Vec<f64>,
        cancel_after: Option<usize>,
    }

    impl TestSink {
        fn new() -> Self {
            Self {
                values: Vec::new(),
                cancel_after: None,
            }
        }

        fn cancelling_after(reports: usize) -> Self {
            Self {
                values: Vec::new(),
                cancel_after: Some(reports),
            }
        }
    }

    impl ProgressSink for TestSink {
        async fn report(&mut self, fraction: f64) {
            self.values.push(fraction);
        }

        fn is_cancelled(&self) -> bool {
            self.cancel_after
                .is_some_and(|after| self.values.len() >= after)
        }
    }

    fn script_generator(script: &str) -> VideoGenerator {
        VideoGenerator::new("sh", vec!["-c".to_owned(), script.to_owned()])
    }

    fn request() -> GeneratorRequest {
        GeneratorRequest {
            prompt: "a cat walks".to_owned(),
            num_frames: 84,
            num_inference_steps: 50,
            guidance_scale: 7.5,
            fps: 30,
            width: 848,
            height: 480,
            seed: 42,
            gpu_index: 0,
            output_path: "/tmp/out.mp4".into(),
            model_cache_dir: "/tmp/cache".into(),
        }
    }

    #[tokio::test]
    async fn streams_progress_and_completes() {
        let generator = script_generator(
            r#"echo '{"progress": 0.25}'; echo '{"progress": 0.75}'; echo '{"ok": true, "path": "/tmp/out.mp4"}'"#,
        );
        let mut sink = TestSink::new();
        let outcome = generator
            .generate(&request(), &mut sink, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            GenerationOutcome::Completed { path } if path == PathBuf::from("/tmp/out.mp4")
        ));
        assert_eq!(sink.values, vec![0.25, 0.75]);
    }

    #[tokio::test]
    async fn classifies_oom_failures() {
        let generator = script_generator(
            r#"echo '{"ok": false, "kind": "oom", "detail": "CUDA out of memory"}'"#,
        );
        let mut sink = TestSink::new();
        let error = generator
            .generate(&request(), &mut sink, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(error, GeneratorError::Oom(detail) if detail.contains("CUDA")));
    }

    #[tokio::test]
    async fn tolerates_stdout_chatter() {
        let generator = script_generator(
            r#"echo 'loading model weights...'; echo '{"ok": true, "path": "/tmp/out.mp4"}'"#,
        );
        let mut sink = TestSink::new();
        let outcome = generator
            .generate(&request(), &mut sink, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(outcome, GenerationOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn missing_final_line_is_a_protocol_error() {
        let generator = script_generator(r#"echo '{"progress": 0.1}'"#);
        let mut sink = TestSink::new();
        let error = generator
            .generate(&request(), &mut sink, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(error, GeneratorError::Protocol(_)));
    }

    #[tokio::test]
    async fn kills_a_generator_that_ignores_cancellation() {
        // Prints progress forever and never reads stdin.
        let generator = script_generator(
            r#"i=0; while [ $i -lt 200 ]; do echo '{"progress": 0.1}'; sleep 0.05; i=$((i+1)); done"#,
        );
        let mut sink = TestSink::cancelling_after(1);
        let outcome = generator
            .generate(&request(), &mut sink, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(matches!(outcome, GenerationOutcome::Cancelled));
    }

    #[tokio::test]
    async fn spawn_failure_is_an_io_error() {
        let generator = VideoGenerator::new("/nonexistent-generator-binary", vec![]);
        let mut sink = TestSink::new();
        let error = generator
            .generate(&request(), &mut sink, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(error, GeneratorError::Io(_)));
    }
}
