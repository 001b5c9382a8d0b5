// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared coordinator client used by workers and submitters.
//!
//! Every request carries a 5 s connect timeout and a 30 s read
//! timeout. Idempotent calls retry with exponential backoff and
//! return `None` after exhaustion; heartbeats and status updates are
//! fire-and-tolerate, since the next tick re-pushes state anyway.

pub mod retry;

use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::api::models::{HeartbeatRequest, MineResponse, ResultsResponse, WorkerErrorRequest};
use crate::jobs::{JobPatch, RenderJob};

pub use retry::{with_retry, RetryPolicy};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level or non-2xx response failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// HTTP client for the coordinator API
#[derive(Clone)]
pub struct FarmClient {
    http: reqwest::Client,
    api_base: String,
    retry: RetryPolicy,
}

impl FarmClient {
    /// Build a client for the coordinator at `server_url`
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_base: format!("{}/api", server_url.trim_end_matches('/')),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy (tests shrink the backoff)
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The base URL of the coordinator API
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Every job on the coordinator; retried, `None` on failure
    pub async fn jobs(&self) -> Option<Vec<RenderJob>> {
        let http = self.http.clone();
        let url = format!("{}/get", self.api_base);
        with_retry(self.retry, "get jobs", || {
            let (http, url) = (http.clone(), url.clone());
            async move {
                let resp: ResultsResponse = http
                    .get(url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                Ok::<_, ClientError>(resp.results)
            }
        })
        .await
    }

    /// Jobs assigned to `worker_name`; retried, `None` on failure
    pub async fn my_jobs(&self, worker_name: &str) -> Option<Vec<RenderJob>> {
        let http = self.http.clone();
        let url = format!("{}/jobs/mine/{worker_name}", self.api_base);
        with_retry(self.retry, "get my jobs", || {
            let (http, url) = (http.clone(), url.clone());
            async move {
                let resp: MineResponse = http
                    .get(url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                Ok::<_, ClientError>(resp.jobs)
            }
        })
        .await
    }

    /// One job by uid; retried, `None` on failure
    pub async fn job(&self, uid: &str) -> Option<RenderJob> {
        let http = self.http.clone();
        let url = format!("{}/get/{uid}", self.api_base);
        with_retry(self.retry, "get job", || {
            let (http, url) = (http.clone(), url.clone());
            async move {
                let job: RenderJob = http
                    .get(url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                Ok::<_, ClientError>(job)
            }
        })
        .await
    }

    /// Create a job; retried, returns the stored job
    pub async fn post_job(&self, patch: &JobPatch) -> Option<RenderJob> {
        let http = self.http.clone();
        let url = format!("{}/post", self.api_base);
        let patch = patch.clone();
        with_retry(self.retry, "post job", || {
            let (http, url, patch) = (http.clone(), url.clone(), patch.clone());
            async move {
                let job: RenderJob = http
                    .post(url)
                    .json(&patch)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                Ok::<_, ClientError>(job)
            }
        })
        .await
    }

    /// Delete a job; retried
    pub async fn delete_job(&self, uid: &str) -> Option<()> {
        let http = self.http.clone();
        let url = format!("{}/delete/{uid}", self.api_base);
        with_retry(self.retry, "delete job", || {
            let (http, url) = (http.clone(), url.clone());
            async move {
                http.delete(url).send().await?.error_for_status()?;
                Ok::<_, ClientError>(())
            }
        })
        .await
    }

    /// Update a job. Not retried: the worker re-pushes state on its
    /// next tick, and a duplicate late update is worse than a lost
    /// one. Failures are logged and swallowed.
    pub async fn update_job(&self, uid: &str, patch: &JobPatch) -> Option<RenderJob> {
        let result = async {
            let job: RenderJob = self
                .http
                .put(format!("{}/put/{uid}", self.api_base))
                .json(patch)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok::<_, ClientError>(job)
        }
        .await;

        match result {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("failed to update job {uid}: {e}");
                None
            }
        }
    }

    /// Send a heartbeat. Not retried; failures are logged and dropped.
    pub async fn heartbeat(&self, heartbeat: &HeartbeatRequest) {
        let result = self
            .http
            .post(format!("{}/worker/heartbeat", self.api_base))
            .json(heartbeat)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = result {
            warn!("failed to send heartbeat: {e}");
        }
    }

    /// Report a worker error. Not retried; failures are logged and
    /// dropped.
    pub async fn report_error(&self, worker: &str, message: &str, job_uid: Option<&str>) {
        let body = WorkerErrorRequest {
            worker: Some(worker.to_string()),
            message: Some(message.to_string()),
            job_uid: job_uid.map(str::to_string),
        };
        let result = self
            .http
            .post(format!("{}/worker/error", self.api_base))
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = result {
            warn!("failed to report error to server: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base_normalisation() {
        let client = FarmClient::new("http://127.0.0.1:5000/").unwrap();
        assert_eq!(client.api_base(), "http://127.0.0.1:5000/api");

        let client = FarmClient::new("http://127.0.0.1:5000").unwrap();
        assert_eq!(client.api_base(), "http://127.0.0.1:5000/api");
    }
}
