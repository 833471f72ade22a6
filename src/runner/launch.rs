//! Shared launch ownership across cooperating processes
//!
//! The first process to start (the worker pool controller, or a standalone
//! run) creates the launch. A pool controller writes the launch id to the
//! `LAUNCH_ID` hand-off file so worker processes attach to the same launch
//! instead of creating their own. Only the creator ever closes the launch or
//! removes the hand-off file.

use super::state::{ItemStatus, RemoteId, StatusLatch};
use crate::client::{now_millis, LaunchMode, LaunchRequest, LaunchSummary, ReportService};
use crate::error::ReporterError;
use crate::utils::config::ReporterConfig;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const LAUNCH_ID_FILE: &str = "LAUNCH_ID";
pub const LAUNCH_URL_FILE: &str = "LAUNCH_URL";

/// Environment variable carrying the active launch id to child tools
pub const LAUNCH_ENV: &str = "REPORTPORTAL_LAUNCH_UUID";

const DEFAULT_LAUNCH_NAME: &str = "Automated tests";

/// Files used to hand the launch between processes
#[derive(Debug, Clone)]
pub struct HandoffStore {
    dir: PathBuf,
}

impl HandoffStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn token_path(&self) -> PathBuf {
        self.dir.join(LAUNCH_ID_FILE)
    }

    pub fn report_url_path(&self) -> PathBuf {
        self.dir.join(LAUNCH_URL_FILE)
    }

    /// Launch id left by a controller, if any
    pub fn read_token(&self) -> Result<Option<RemoteId>> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let id = content.trim();
        Ok((!id.is_empty()).then(|| id.to_string()))
    }

    pub fn write_token(&self, id: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.token_path(), id)
            .with_context(|| format!("Failed to write {}", self.token_path().display()))
    }

    pub fn remove_token(&self) -> Result<()> {
        match std::fs::remove_file(self.token_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_report_url(&self, url: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.report_url_path(), url)
            .with_context(|| format!("Failed to write {}", self.report_url_path().display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Unstarted,
    Starting,
    Active,
    Finishing,
    Closed,
}

/// How this process relates to the launch it reports into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchRole {
    /// Created the launch for a worker pool and published its id
    PoolController,
    /// Created the launch for its own single-process run
    Standalone,
    /// Attached to a launch published by a controller
    Participant,
}

impl LaunchRole {
    pub fn owns_launch(self) -> bool {
        !matches!(self, LaunchRole::Participant)
    }
}

#[derive(Debug, Clone)]
pub struct LaunchHandle {
    pub id: RemoteId,
    pub status: StatusLatch,
}

pub struct LaunchCoordinator {
    service: Arc<dyn ReportService>,
    handoff: HandoffStore,
    /// Hand-off token as read at construction
    token: Option<RemoteId>,
    config: ReporterConfig,
    state: LaunchState,
    role: Option<LaunchRole>,
    handle: Option<LaunchHandle>,
}

impl LaunchCoordinator {
    pub fn new(service: Arc<dyn ReportService>, config: &ReporterConfig) -> Result<Self> {
        let handoff = HandoffStore::new(&config.handoff_dir);
        let token = handoff.read_token()?;
        if let Some(id) = &token {
            log::debug!("found launch hand-off token {}", id);
        }

        Ok(Self {
            service,
            handoff,
            token,
            config: config.clone(),
            state: LaunchState::Unstarted,
            role: None,
            handle: None,
        })
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    pub fn role(&self) -> Option<LaunchRole> {
        self.role
    }

    /// Id of the launch while it accepts items
    pub fn launch_id(&self) -> Option<&RemoteId> {
        match self.state {
            LaunchState::Active => self.handle.as_ref().map(|h| &h.id),
            _ => None,
        }
    }

    pub fn status(&self) -> ItemStatus {
        self.handle
            .as_ref()
            .map(|h| h.status.status())
            .unwrap_or(ItemStatus::Passed)
    }

    /// Downgrade the launch to FAILED for the rest of its life
    pub fn record_failure(&mut self) {
        if let Some(handle) = &mut self.handle {
            if !handle.status.is_failed() {
                log::debug!("launch {} marked FAILED", handle.id);
            }
            handle.status.fail();
        }
    }

    /// Worker pool start: become the controller or attach to a published launch
    pub async fn start_pool(&mut self) -> Result<(), ReporterError> {
        if self.state != LaunchState::Unstarted {
            log::debug!("pool start ignored, launch is {:?}", self.state);
            return Ok(());
        }

        if let Some(id) = self.token.clone() {
            self.attach(id);
            return Ok(());
        }

        let id = self.create().await?;
        self.handoff
            .write_token(&id)
            .map_err(|e| ReporterError::Launch(format!("{:#}", e)))?;
        log::debug!("writing launch id {} to {}", id, LAUNCH_ID_FILE);
        println!(
            "{} Starting ReportPortal aggregate launch: {}",
            "📋".to_string().blue(),
            id.cyan()
        );
        self.activate(id, LaunchRole::PoolController);
        Ok(())
    }

    /// Test run start. A process that already started the pool keeps its launch.
    pub async fn start_run(&mut self) -> Result<(), ReporterError> {
        if self.state == LaunchState::Unstarted {
            match self.token.clone() {
                Some(id) => self.attach(id),
                None => {
                    let id = self.create().await?;
                    self.activate(id, LaunchRole::Standalone);
                }
            }
        }

        if let Some(id) = self.launch_id() {
            std::env::set_var(LAUNCH_ENV, id);
        }
        println!(
            "{} Writing results to ReportPortal: {} > {}",
            "📋".to_string().blue(),
            self.config.project_name.cyan(),
            self.config.endpoint
        );
        Ok(())
    }

    fn attach(&mut self, id: RemoteId) {
        log::debug!("attaching to launch {}", id);
        self.activate(id, LaunchRole::Participant);
    }

    fn activate(&mut self, id: RemoteId, role: LaunchRole) {
        self.handle = Some(LaunchHandle {
            id,
            status: StatusLatch::default(),
        });
        self.role = Some(role);
        self.state = LaunchState::Active;
    }

    async fn create(&mut self) -> Result<RemoteId, ReporterError> {
        self.state = LaunchState::Starting;
        let request = self.launch_request();
        match self.service.create_launch(&request).await {
            Ok(id) => Ok(id),
            Err(e) => {
                self.state = LaunchState::Unstarted;
                Err(ReporterError::Launch(format!("{:#}", e)))
            }
        }
    }

    fn launch_request(&self) -> LaunchRequest {
        LaunchRequest {
            name: self.config.launch_name_or(DEFAULT_LAUNCH_NAME).to_string(),
            description: self.config.launch_description.clone(),
            attributes: self.config.launch_attributes.clone(),
            mode: if self.config.debug_mode {
                LaunchMode::Debug
            } else {
                LaunchMode::Default
            },
            rerun: self.config.rerun,
            rerun_of: self.config.rerun_of.clone(),
            start_time: now_millis(),
        }
    }

    /// Close the launch if this process owns it. Runs at most once; later
    /// calls and participants get `None`.
    pub async fn finalize(&mut self) -> Result<Option<LaunchSummary>> {
        if self.state != LaunchState::Active {
            log::debug!("finalize ignored, launch is {:?}", self.state);
            return Ok(None);
        }
        let Some(role) = self.role else {
            return Ok(None);
        };
        if !role.owns_launch() {
            return Ok(None);
        }
        let Some(handle) = self.handle.as_ref() else {
            return Ok(None);
        };

        self.state = LaunchState::Finishing;
        let status = handle.status.status();
        log::debug!("{} finishing launch: {}", handle.id, status);

        let result = self
            .service
            .finish_launch(&handle.id, status, now_millis())
            .await;
        self.state = LaunchState::Closed;
        let summary = result.context("Failed to finish launch")?;

        println!(
            " {} Report #{} saved ➡ {}",
            "📋".to_string().blue(),
            summary.number,
            summary.link.green()
        );

        match self.handoff.write_report_url(&summary.link) {
            Ok(()) => println!("Output Launch Url to file: {}", LAUNCH_URL_FILE),
            Err(e) => log::warn!("{:#}", e),
        }

        if role == LaunchRole::PoolController {
            self.handoff.remove_token()?;
        }

        Ok(Some(summary))
    }
}
