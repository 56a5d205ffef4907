use std::{future::Future, path::Path};

use anyhow::Context;
use futures_util::StreamExt;
use reqwest::{StatusCode, header::CONTENT_LENGTH};
use tokio_util::io::ReaderStream;

use crate::{config::TransferConfig, error::TransferError};

pub const AUTH_HEADER: &str = "X-Auth-Token";
pub const FILENAME_HEADER: &str = "X-Filename";

/// What counts as a delivered archive when deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Any HTTP response ends the retry loop, whatever its status.
    AnyResponse,
    /// Only a 2xx response ends the retry loop.
    SuccessStatus,
}

pub fn counts_as_delivered(outcome: &anyhow::Result<StatusCode>, policy: DeliveryPolicy) -> bool {
    match (outcome, policy) {
        (Err(_), _) => false,
        (Ok(_), DeliveryPolicy::AnyResponse) => true,
        (Ok(status), DeliveryPolicy::SuccessStatus) => status.is_success(),
    }
}

/// Runs `attempt` until it reports success, at most `max_attempts` times. Returns
/// the number of the successful attempt.
pub async fn retry<F, Fut>(max_attempts: u32, mut attempt: F) -> Option<u32>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = bool>,
{
    for n in 1..=max_attempts {
        if attempt(n).await {
            return Some(n);
        }
    }
    None
}

/// Streams archives to the remote receiver.
#[derive(Debug, Clone)]
pub struct TransferClient {
    client: reqwest::Client,
    url: String,
    token: String,
    retries: u32,
    policy: DeliveryPolicy,
}

impl TransferClient {
    pub fn new(cfg: &TransferConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("warden-agent/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.timeout())
            .build()
            .context("build transfer http client")?;
        let policy = if cfg.require_success_status {
            DeliveryPolicy::SuccessStatus
        } else {
            DeliveryPolicy::AnyResponse
        };
        Ok(Self {
            client,
            url: cfg.url(),
            token: cfg.token.clone(),
            retries: cfg.attempts,
            policy,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// One upload attempt. Errors are logged; the return value says whether the
    /// archive counts as delivered.
    pub async fn send(&self, path: &Path) -> bool {
        let outcome = self.post_file(path).await;
        if let Err(err) = &outcome {
            tracing::error!(
                file = %path.display(),
                error = %crate::error::format_error_chain(err),
                "archive upload failed"
            );
        }
        counts_as_delivered(&outcome, self.policy)
    }

    /// Retries [`send`](Self::send) up to `attempts + 1` times. The archive is never
    /// removed here, whatever the outcome.
    pub async fn send_with_retry(&self, path: &Path) -> Result<u32, TransferError> {
        tracing::info!(file = %path.display(), url = %self.url, "sending backup archive");
        let max = self.max_attempts();
        match retry(max, |n| {
            tracing::info!(attempt = n, max, "upload attempt");
            self.send(path)
        })
        .await
        {
            Some(n) => {
                tracing::info!(file = %path.display(), attempt = n, "backup archive sent");
                Ok(n)
            }
            None => {
                tracing::warn!(
                    file = %path.display(),
                    attempts = max,
                    "could not send backup archive; keeping local copy"
                );
                Err(TransferError::Exhausted {
                    archive: path.to_path_buf(),
                    attempts: max,
                })
            }
        }
    }

    async fn post_file(&self, path: &Path) -> anyhow::Result<StatusCode> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        let size = file
            .metadata()
            .await
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "backup.zip".to_string());

        let step = (size / 10).max(1);
        let mut sent = 0u64;
        let mut next_report = step;
        let label = name.clone();
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent = sent.saturating_add(bytes.len() as u64);
                if sent >= next_report || sent == size {
                    tracing::info!(file = %label, sent, total = size, "upload progress");
                    next_report = sent.saturating_add(step);
                }
            }
            chunk
        });

        let resp = self
            .client
            .post(&self.url)
            .header(AUTH_HEADER, &self.token)
            .header(FILENAME_HEADER, &name)
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        tracing::info!(status = %status, body = %text.trim(), "receiver responded");
        Ok(status)
    }
}
