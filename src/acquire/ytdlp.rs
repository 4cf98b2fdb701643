use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use super::{ExtractError, VideoExtractor, VideoMetadata};
use crate::config;

/// Drives a local `yt-dlp` binary.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, ExtractError> {
        debug!("running {} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ExtractError::Spawn {
                tool: self.binary.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ExtractError::ToolFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output.stdout)
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(config::DEFAULT_YT_DLP)
    }
}

#[async_trait]
impl VideoExtractor for YtDlp {
    async fn extract(&self, url: &str) -> Result<VideoMetadata, ExtractError> {
        let stdout = self
            .run(&["--dump-json", "--no-playlist", "--no-warnings", "--", url])
            .await?;
        let line = String::from_utf8_lossy(&stdout);
        let line = line
            .lines()
            .find(|l| l.trim_start().starts_with('{'))
            .ok_or_else(|| ExtractError::Parse("no JSON object in output".into()))?;
        serde_json::from_str(line).map_err(|e| ExtractError::Parse(e.to_string()))
    }

    async fn download(
        &self,
        url: &str,
        quality: &str,
        output_template: &Path,
    ) -> Result<Option<PathBuf>, ExtractError> {
        let template = output_template.to_string_lossy();
        let stdout = self
            .run(&[
                "--no-playlist",
                "--no-warnings",
                "--no-progress",
                "-f",
                quality,
                "-o",
                &template,
                "--print",
                "after_move:filepath",
                "--no-simulate",
                "--",
                url,
            ])
            .await?;
        Ok(last_path(&stdout))
    }
}

/// The last non-empty stdout line, which `--print after_move:filepath` emits.
fn last_path(stdout: &[u8]) -> Option<PathBuf> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .map(PathBuf::from)
}
