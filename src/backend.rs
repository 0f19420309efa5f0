//! REST backend client: one batch upload POST and the retrieval POST.
//!
//! Transient conditions (timeouts, connection errors, 5xx) retry with
//! exponential backoff; 4xx and undecodable bodies fail immediately. The
//! caller owns batching and concurrency; each call here is one request
//! cycle.

use crate::{config::Config, error::BridgeError, indexer::Blob};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};

pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Retrieval tolerates a slower backend; its backoff never starts below this.
const SEARCH_MIN_BASE_DELAY_SECS: f64 = 2.0;

const ERROR_BODY_PREVIEW_CHARS: usize = 200;

pub const EMPTY_RESULT_MESSAGE: &str = "No relevant code context found for your query.";

#[derive(Debug, Serialize)]
struct BatchUploadPayload<'a> {
    blobs: &'a [Blob],
}

#[derive(Debug, Deserialize)]
struct BatchUploadResp {
    #[serde(default)]
    blob_names: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RetrievalBlobs<'a> {
    checkpoint_id: Option<String>,
    added_blobs: &'a [String],
    deleted_blobs: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RetrievalPayload<'a> {
    information_request: &'a str,
    blobs: RetrievalBlobs<'a>,
    dialog: Vec<serde_json::Value>,
    max_output_length: u32,
    disable_codebase_retrieval: bool,
    enable_commit_retrieval: bool,
}

#[derive(Debug, Deserialize)]
struct RetrievalResp {
    #[serde(default)]
    formatted_retrieval: String,
}

/// Shared client: one pool serves uploads and searches alike.
pub fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(concat!("ctxmcp/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("reqwest client")
}

enum Failure {
    Transient(String),
    Permanent(String),
}

fn classify_net(e: reqwest::Error) -> Failure {
    if e.is_decode() {
        Failure::Permanent(format!("invalid response body: {e}"))
    } else {
        // timeouts, connect failures, interrupted body reads
        Failure::Transient(e.to_string())
    }
}

async fn status_failure(r: reqwest::Response) -> Failure {
    let status = r.status();
    let body: String = r
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(ERROR_BODY_PREVIEW_CHARS)
        .collect();
    if status.is_server_error() {
        Failure::Transient(format!("HTTP {status}: {body}"))
    } else {
        Failure::Permanent(format!("HTTP {status}: {body}"))
    }
}

/// Run `attempt_fn` up to `max_retries` times, sleeping
/// `base_delay * 2^(attempt-1)` seconds between transient failures.
/// Permanent failures short-circuit. Returns the attempt count alongside the
/// final failure.
async fn retry_transient<T, F, Fut>(
    mut attempt_fn: F,
    max_retries: usize,
    base_delay: f64,
) -> Result<T, (usize, Failure)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let max_retries = max_retries.max(1);
    let mut last = String::new();
    for attempt in 1..=max_retries {
        match attempt_fn().await {
            Ok(v) => return Ok(v),
            Err(Failure::Permanent(msg)) => return Err((attempt, Failure::Permanent(msg))),
            Err(Failure::Transient(msg)) => {
                tracing::warn!(attempt, max_retries, error = %msg, "transient request failure");
                last = msg;
                if attempt < max_retries {
                    let delay = base_delay * 2f64.powi(attempt as i32 - 1);
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
            }
        }
    }
    Err((max_retries, Failure::Transient(last)))
}

/// POST one batch of blobs. Returns the server's acknowledgement list, in
/// request order, unchanged; correlating identities is the caller's job.
pub async fn upload_batch(
    cfg: &Config,
    client: &Client,
    blobs: &[Blob],
) -> Result<Vec<String>, BridgeError> {
    if blobs.is_empty() {
        return Ok(Vec::new());
    }
    let url = format!(
        "{}/batch-upload",
        cfg.settings.base_url.trim_end_matches('/')
    );
    let payload = BatchUploadPayload { blobs };
    let result = retry_transient(
        || async {
            let r = client
                .post(&url)
                .bearer_auth(&cfg.settings.token)
                .json(&payload)
                .send()
                .await
                .map_err(classify_net)?;
            if !r.status().is_success() {
                return Err(status_failure(r).await);
            }
            let resp = r.json::<BatchUploadResp>().await.map_err(classify_net)?;
            Ok(resp.blob_names)
        },
        cfg.settings.max_retries,
        cfg.settings.retry_base_delay,
    )
    .await;

    result.map_err(|(attempts, failure)| match failure {
        Failure::Transient(message) => BridgeError::UploadTransient { attempts, message },
        Failure::Permanent(message) => BridgeError::UploadPermanent { message },
    })
}

/// POST the retrieval request with the project's full identity set.
pub async fn retrieve_formatted(
    cfg: &Config,
    client: &Client,
    all_blob_names: &[String],
    query: &str,
) -> Result<String, BridgeError> {
    let url = format!(
        "{}/agents/codebase-retrieval",
        cfg.settings.base_url.trim_end_matches('/')
    );
    let payload = RetrievalPayload {
        information_request: query,
        blobs: RetrievalBlobs {
            checkpoint_id: None,
            added_blobs: all_blob_names,
            deleted_blobs: vec![],
        },
        dialog: vec![],
        max_output_length: 0,
        disable_codebase_retrieval: false,
        enable_commit_retrieval: false,
    };

    let result = retry_transient(
        || async {
            let r = client
                .post(&url)
                .bearer_auth(&cfg.settings.token)
                .json(&payload)
                .send()
                .await
                .map_err(classify_net)?;
            if !r.status().is_success() {
                return Err(status_failure(r).await);
            }
            let resp = r.json::<RetrievalResp>().await.map_err(classify_net)?;
            Ok(resp.formatted_retrieval)
        },
        cfg.settings.max_retries,
        cfg.settings.retry_base_delay.max(SEARCH_MIN_BASE_DELAY_SECS),
    )
    .await;

    match result {
        Ok(text) if text.trim().is_empty() => Ok(EMPTY_RESULT_MESSAGE.to_string()),
        Ok(text) => Ok(text),
        Err((_, Failure::Transient(msg))) | Err((_, Failure::Permanent(msg))) => {
            Err(BridgeError::Search(msg))
        }
    }
}
