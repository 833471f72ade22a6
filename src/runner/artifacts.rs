use super::state::{ItemRef, LogLevel};
use crate::client::{now_millis, Attachment, LogEntry};
use crate::error::ReporterError;
use crate::utils::config::ReporterConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use uuid::Uuid;

/// Screenshot and video source used when a test fails
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Whether screenshots can be taken at all
    fn supports_screenshots(&self) -> bool {
        true
    }

    /// PNG bytes of the current screen
    async fn capture_screenshot(&self, full_page: bool) -> Result<Vec<u8>>;

    /// MP4 bytes of the test's recording
    async fn capture_video(&self) -> Result<Vec<u8>>;
}

/// Captures through an external shell command and a recorder output file
pub struct CommandCapture {
    screenshot_command: Option<String>,
    output_dir: PathBuf,
    video_file: Option<PathBuf>,
}

impl CommandCapture {
    pub fn from_config(config: &ReporterConfig) -> Self {
        Self {
            screenshot_command: config.screenshot_command.clone(),
            output_dir: config.output_dir.clone(),
            video_file: config
                .video_name
                .as_ref()
                .map(|name| config.video_path.join(name)),
        }
    }

    fn shell(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        }
    }
}

#[async_trait]
impl CaptureProvider for CommandCapture {
    fn supports_screenshots(&self) -> bool {
        self.screenshot_command.is_some()
    }

    async fn capture_screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        let template = self
            .screenshot_command
            .as_deref()
            .context("No screenshot command configured")?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self
            .output_dir
            .join(format!("{}_{}.png", now_millis(), &Uuid::new_v4().to_string()[..8]));
        let command = template
            .replace("{file}", &path.to_string_lossy())
            .replace("{full_page}", if full_page { "true" } else { "false" });

        let output = Self::shell(&command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to execute screenshot command")?;

        if !output.status.success() {
            return Err(ReporterError::Capture(format!(
                "screenshot command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }

        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Screenshot not written to {}", path.display()))?;
        tokio::fs::remove_file(&path).await.ok();
        Ok(content)
    }

    async fn capture_video(&self) -> Result<Vec<u8>> {
        let path = self
            .video_file
            .as_ref()
            .context("No video name configured")?;
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read video {}", path.display()))?;
        tokio::fs::remove_file(path).await.ok();
        Ok(content)
    }
}

/// A log entry waiting to be queued against a specific item
#[derive(Debug, Clone)]
pub struct PendingLog {
    pub target: ItemRef,
    pub entry: LogEntry,
    pub attachment: Option<Attachment>,
}

/// Picks where failure evidence goes and gathers it
pub struct ArtifactBinder {
    capture: Option<Arc<dyn CaptureProvider>>,
    full_page: bool,
    upload_video: bool,
}

impl ArtifactBinder {
    pub fn new(
        capture: Option<Arc<dyn CaptureProvider>>,
        full_page: bool,
        upload_video: bool,
    ) -> Self {
        Self {
            capture,
            full_page,
            upload_video,
        }
    }

    pub fn from_config(config: &ReporterConfig) -> Self {
        let capture = CommandCapture::from_config(config);
        let capture: Option<Arc<dyn CaptureProvider>> =
            if capture.supports_screenshots() || config.video_upload {
                Some(Arc::new(capture))
            } else {
                None
            };
        Self::new(capture, config.full_page_screenshots, config.video_upload)
    }

    /// The failed step when one is recorded, otherwise the test itself
    pub fn target<'a>(failed_step: Option<&'a ItemRef>, test: &'a ItemRef) -> &'a ItemRef {
        failed_step.unwrap_or(test)
    }

    /// Logs to send for a failing test: the error with its screenshot on the
    /// target, then the recording on the test. Capture problems only drop
    /// the attachment.
    pub async fn bind_failure(
        &self,
        failed_step: Option<&ItemRef>,
        test: &ItemRef,
        message: &str,
    ) -> Vec<PendingLog> {
        let target = Self::target(failed_step, test);
        log::debug!(
            "attaching screenshot & error to {} '{}'",
            if failed_step.is_some() { "failed step" } else { "test" },
            target.title()
        );

        let mut logs = vec![PendingLog {
            target: target.clone(),
            entry: LogEntry {
                level: LogLevel::Error,
                message: message.to_string(),
                time: now_millis(),
            },
            attachment: self.screenshot().await,
        }];

        if self.upload_video {
            if let Some(video) = self.video().await {
                logs.push(PendingLog {
                    target: test.clone(),
                    entry: LogEntry {
                        level: LogLevel::Error,
                        message: "Add Video for failed test".to_string(),
                        time: now_millis(),
                    },
                    attachment: Some(video),
                });
            }
        }

        logs
    }

    async fn screenshot(&self) -> Option<Attachment> {
        let capture = self.capture.as_ref().filter(|c| c.supports_screenshots())?;
        match capture.capture_screenshot(self.full_page).await {
            Ok(content) => Some(Attachment::screenshot(content)),
            Err(e) => {
                log::warn!("Couldn't save screenshot: {:#}", e);
                None
            }
        }
    }

    async fn video(&self) -> Option<Attachment> {
        let capture = self.capture.as_ref()?;
        match capture.capture_video().await {
            Ok(content) => Some(Attachment::video(content)),
            Err(e) => {
                log::warn!("Couldn't attach video: {:#}", e);
                None
            }
        }
    }
}
