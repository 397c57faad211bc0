//! Snapshot retrieval over the backend's request/response endpoints.
//!
//! No retry and no caching here; callers decide what a failed fetch means.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use misso_protocol::{ConfigResponse, RawSurgeryRecord, Session};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::normalize::normalize_record;

/// Source of full session snapshots for one operator.
pub trait SnapshotFetcher: Send + Sync + 'static {
    /// Fetch and normalize every session of `operator_name`, in store order.
    fn fetch_history(
        &self,
        operator_name: &str,
    ) -> impl Future<Output = Result<Vec<Session>>> + Send;
}

/// HTTP client for the procedure backend
#[derive(Clone)]
pub struct HttpSnapshotFetcher {
    client: Client,
    base_url: Url,
}

impl HttpSnapshotFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: parse_base_url(base_url)?,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(&config.base_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `GET /config`: the operator this deployment tracks.
    pub async fn fetch_config(&self) -> Result<ConfigResponse> {
        let url = self.endpoint("config")?;
        let response = self.client.get(url.clone()).send().await?;
        let response = check_status(response, &url)?;
        Ok(response.json().await?)
    }

    /// `GET /surgeries?surgeon=…`: raw rows, newest record first.
    pub async fn fetch_records(&self, operator_name: &str) -> Result<Vec<RawSurgeryRecord>> {
        let mut url = self.endpoint("surgeries")?;
        url.query_pairs_mut().append_pair("surgeon", operator_name);

        let response = self.client.get(url.clone()).send().await?;
        let response = check_status(response, &url)?;
        let records: Vec<RawSurgeryRecord> = response.json().await?;

        debug!(
            component = "fetcher",
            event = "fetch.records.ok",
            operator = %operator_name,
            count = records.len(),
            "Fetched snapshot records"
        );
        Ok(records)
    }

    /// `POST /upload/json` as multipart field `file`.
    pub async fn upload_json(&self, path: &Path) -> Result<()> {
        let url = self.endpoint("upload/json")?;
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("upload.json")
            .to_string();

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("application/json")?;
        let form = Form::new().part("file", part);

        let response = self.client.post(url.clone()).multipart(form).send().await?;
        check_status(response, &url)?;

        info!(
            component = "fetcher",
            event = "upload.accepted",
            file = %file_name,
            "Upload accepted"
        );
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                reason: e.to_string(),
            })
    }
}

impl SnapshotFetcher for HttpSnapshotFetcher {
    async fn fetch_history(&self, operator_name: &str) -> Result<Vec<Session>> {
        let records = self.fetch_records(operator_name).await?;
        Ok(records.iter().map(normalize_record).collect())
    }
}

/// Parse a base URL so relative joins append rather than replace the last segment.
pub(crate) fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim()).map_err(|e| SyncError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn check_status(response: reqwest::Response, url: &Url) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SyncError::Status {
            status,
            url: url.to_string(),
        })
    }
}
