//! Line-delimited JSON protocol spoken with the generator child process.
//!
//! The parent writes one request line on stdin. The child streams
//! `{"progress": 0.42}` lines on stdout and finishes with either
//! `{"ok": true, "path": "..."}` or `{"ok": false, "kind": "...",
//! "detail": "..."}`. A `{"cancel": true}` line on stdin asks the child to
//! stop at its next checkpoint.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorRequest {
    pub prompt: String,
    pub num_frames: i32,
    pub num_inference_steps: i32,
    pub guidance_scale: f64,
    pub fps: i32,
    pub width: i32,
    pub height: i32,
    pub seed: i64,
    pub gpu_index: u32,
    pub output_path: PathBuf,
    pub model_cache_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StreamLine {
    Progress {
        progress: f64,
    },
    Done {
        ok: bool,
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        detail: Option<String>,
    },
}

pub fn parse_line(line: &str) -> Result<StreamLine, serde_json::Error> {
    serde_json::from_str(line)
}

pub const CANCEL_LINE: &str = "{\"cancel\": true}\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_lines() {
        assert_eq!(
            parse_line(r#"{"progress": 0.42}"#).unwrap(),
            StreamLine::Progress { progress: 0.42 }
        );
    }

    #[test]
    fn parses_success_line() {
        let line = parse_line(r#"{"ok": true, "path": "/outputs/x.mp4"}"#).unwrap();
        let StreamLine::Done { ok, path, .. } = line else {
            panic!("expected final line");
        };
        assert!(ok);
        assert_eq!(path.unwrap(), PathBuf::from("/outputs/x.mp4"));
    }

    #[test]
    fn parses_failure_line() {
        let line = parse_line(r#"{"ok": false, "kind": "oom", "detail": "CUDA out of memory"}"#)
            .unwrap();
        let StreamLine::Done {
            ok, kind, detail, ..
        } = line
        else {
            panic!("expected final line");
        };
        assert!(!ok);
        assert_eq!(kind.as_deref(), Some("oom"));
        assert_eq!(detail.as_deref(), Some("CUDA out of memory"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_line("loading model weights...").is_err());
        assert!(parse_line("").is_err());
    }
}
