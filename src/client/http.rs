//! ReportPortal HTTP client
//!
//! Thin wrapper over the v1 REST API: launches, test items and logs.
//! Every request carries the project's bearer token.

use super::{
    Attachment, FinishItem, LaunchRequest, LaunchSummary, LogEntry, ReportService, StartItem,
};
use crate::error::ReporterError;
use crate::runner::state::{ItemKind, ItemStatus, LogLevel, RemoteId};
use crate::utils::config::{LaunchAttribute, ReporterConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request timeout for a single API call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct PortalClient {
    /// `{endpoint}/{project}`
    base_url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartLaunchBody<'a> {
    name: &'a str,
    description: &'a str,
    attributes: &'a [LaunchAttribute],
    mode: super::LaunchMode,
    start_time: i64,
    rerun: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rerun_of: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinishLaunchBody {
    end_time: i64,
    status: ItemStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartItemBody<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: ItemKind,
    launch_uuid: &'a str,
    start_time: i64,
    has_stats: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinishItemBody<'a> {
    launch_uuid: &'a str,
    end_time: i64,
    status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct LogFile<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogBody<'a> {
    launch_uuid: &'a str,
    item_uuid: &'a str,
    time: i64,
    level: LogLevel,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<LogFile<'a>>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

impl PortalClient {
    pub fn new(endpoint: &str, project: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: format!("{}/{}", endpoint.trim_end_matches('/'), project),
            token: token.to_string(),
            client,
        })
    }

    pub fn from_config(config: &ReporterConfig) -> Result<Self> {
        Self::new(&config.endpoint, &config.project_name, &config.token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Turn a non-success response into a `ReporterError::Remote`
    async fn check(resp: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ReporterError::Remote {
            operation: operation.to_string(),
            status: status.as_u16(),
            body,
        }
        .into())
    }
}

#[async_trait]
impl ReportService for PortalClient {
    async fn create_launch(&self, request: &LaunchRequest) -> Result<RemoteId> {
        let body = StartLaunchBody {
            name: &request.name,
            description: &request.description,
            attributes: &request.attributes,
            mode: request.mode,
            start_time: request.start_time,
            rerun: request.rerun,
            rerun_of: request.rerun_of.as_deref(),
        };

        let resp = self
            .client
            .post(self.url("launch"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("Failed to send start launch request")?;

        let launch: IdResponse = Self::check(resp, "start launch")
            .await?
            .json()
            .await
            .context("Failed to parse start launch response")?;
        Ok(launch.id)
    }

    async fn finish_launch(
        &self,
        launch_id: &RemoteId,
        status: ItemStatus,
        end_time: i64,
    ) -> Result<LaunchSummary> {
        let resp = self
            .client
            .put(self.url(&format!("launch/{}/finish", launch_id)))
            .bearer_auth(&self.token)
            .json(&FinishLaunchBody { end_time, status })
            .send()
            .await
            .context("Failed to send finish launch request")?;

        let summary = Self::check(resp, "finish launch")
            .await?
            .json()
            .await
            .context("Failed to parse finish launch response")?;
        Ok(summary)
    }

    async fn start_item(&self, item: &StartItem) -> Result<RemoteId> {
        let path = match &item.parent_id {
            Some(parent) => format!("item/{}", parent),
            None => "item".to_string(),
        };
        let body = StartItemBody {
            name: &item.name,
            kind: item.kind,
            launch_uuid: &item.launch_id,
            start_time: item.start_time,
            has_stats: item.has_stats,
        };

        let resp = self
            .client
            .post(self.url(&path))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("Failed to send start item request")?;

        let created: IdResponse = Self::check(resp, "start item")
            .await?
            .json()
            .await
            .context("Failed to parse start item response")?;
        Ok(created.id)
    }

    async fn finish_item(&self, item_id: &RemoteId, finish: &FinishItem) -> Result<()> {
        let body = FinishItemBody {
            launch_uuid: &finish.launch_id,
            end_time: finish.end_time,
            status: finish.status,
            description: finish.message.as_deref(),
        };

        let resp = self
            .client
            .put(self.url(&format!("item/{}", item_id)))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("Failed to send finish item request")?;

        Self::check(resp, "finish item").await?;
        Ok(())
    }

    async fn send_log(
        &self,
        launch_id: &RemoteId,
        item_id: &RemoteId,
        entry: &LogEntry,
        attachment: Option<&Attachment>,
    ) -> Result<()> {
        let body = LogBody {
            launch_uuid: launch_id,
            item_uuid: item_id,
            time: entry.time,
            level: entry.level,
            message: &entry.message,
            file: attachment.map(|a| LogFile { name: &a.name }),
        };

        let request = self.client.post(self.url("log")).bearer_auth(&self.token);

        let request = match attachment {
            None => request.json(&body),
            Some(file) => {
                // Multipart logs take an array of entries in `json_request_part`
                let json_part = reqwest::multipart::Part::text(serde_json::to_string(&[&body])?)
                    .mime_str("application/json")?;
                let file_part = reqwest::multipart::Part::bytes(file.content.clone())
                    .file_name(file.name.clone())
                    .mime_str(&file.mime)?;
                let form = reqwest::multipart::Form::new()
                    .part("json_request_part", json_part)
                    .part("file", file_part);
                request.multipart(form)
            }
        };

        let resp = request
            .send()
            .await
            .context("Failed to send log request")?;
        Self::check(resp, "send log").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trims_trailing_slash() {
        let client = PortalClient::new("http://localhost:8080/api/v1/", "demo", "t").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/api/v1/demo");
        assert_eq!(client.url("launch"), "http://localhost:8080/api/v1/demo/launch");
    }

    #[test]
    fn test_start_item_body_shape() {
        let body = StartItemBody {
            name: "valid login",
            kind: ItemKind::Test,
            launch_uuid: "L1",
            start_time: 10,
            has_stats: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "TEST");
        assert_eq!(json["launchUuid"], "L1");
        assert_eq!(json["hasStats"], true);
    }

    #[test]
    fn test_log_body_with_file() {
        let body = LogBody {
            launch_uuid: "L1",
            item_uuid: "I1",
            time: 5,
            level: LogLevel::Error,
            message: "boom",
            file: Some(LogFile { name: "failed.png" }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["level"], "error");
        assert_eq!(json["file"]["name"], "failed.png");
    }

    #[test]
    fn test_rerun_of_omitted_when_absent() {
        let body = StartLaunchBody {
            name: "nightly",
            description: "",
            attributes: &[],
            mode: super::super::LaunchMode::Debug,
            start_time: 1,
            rerun: false,
            rerun_of: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["mode"], "DEBUG");
        assert!(json.get("rerunOf").is_none());
    }
}
