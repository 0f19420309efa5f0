//! Indexing pass orchestration and the `search_context` facade.
//!
//! One pass: walk the project on a blocking task, stream blobs through a
//! bounded channel, diff identities against the registry snapshot, upload
//! new blobs in semaphore-gated batches, then merge everything the backend
//! acknowledged into the registry. The merge happens before the search
//! request is composed.

use crate::{
    backend,
    config::Config,
    error::BridgeError,
    indexer::{self, Blob, IgnoreMatcher},
    registry::ProjectsIndex,
    tasks::TaskManager,
};
use anyhow::{Result, anyhow};
use reqwest::Client;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinSet,
};

const MAX_PROJECT_ROOT_LEN: usize = 4096;
const MAX_QUERY_CHARS: usize = 10_000;

type BatchOutcome = Result<(Vec<String>, usize, usize), BridgeError>;

/// Canonicalize and vet a project root. Returns the registry key (canonical
/// forward-slash path) and the filesystem path to walk.
pub fn validate_project_root(raw: &str) -> Result<(String, PathBuf), BridgeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_PROJECT_ROOT_LEN {
        return Err(BridgeError::invalid_input("invalid project_root_path"));
    }
    let slashed = trimmed.replace('\\', "/");
    if slashed.split('/').any(|component| component == "..") {
        return Err(BridgeError::invalid_input("invalid project_root_path"));
    }
    if !Path::new(trimmed).is_absolute() {
        return Err(BridgeError::invalid_input("invalid project_root_path"));
    }
    let canonical = dunce::canonicalize(trimmed)
        .map_err(|_| BridgeError::invalid_input("invalid project_root_path"))?;
    if !canonical.is_dir() {
        return Err(BridgeError::invalid_input("invalid project_root_path"));
    }
    let key = canonical.to_string_lossy().replace('\\', "/");
    Ok((key, canonical))
}

/// Run one incremental indexing pass and return the post-merge identity set
/// for the project. Per-batch upload failures are logged and skipped; only
/// walk and registry failures fail the pass.
pub async fn index_project(
    cfg: &Config,
    client: &Client,
    tasks: &TaskManager,
    project_key: &str,
    root: &Path,
) -> Result<Vec<String>> {
    let batch_size = cfg.settings.batch_size.max(1);
    let max_concurrent = cfg.settings.max_concurrent_uploads.max(1);

    let existing = ProjectsIndex::load(&cfg.projects_file())?.get(project_key);

    // The channel caps how far the walker runs ahead of the uploads.
    let (tx, mut rx) = mpsc::channel::<Blob>(batch_size * max_concurrent * 2);
    let matcher = IgnoreMatcher::new(root, &cfg.settings.exclude_patterns)?;
    let walk_root = root.to_path_buf();
    let text_exts = cfg.text_extensions_set();
    let max_lines = cfg.settings.max_lines_per_blob;
    let walker = tokio::task::spawn_blocking(move || {
        indexer::walk_blobs(&walk_root, &text_exts, max_lines, &matcher, |blob| {
            tx.blocking_send(blob).is_ok()
        })
    });

    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut uploads: JoinSet<BatchOutcome> = JoinSet::new();

    let mut all_names: Vec<String> = Vec::new();
    let mut new_total = 0usize;
    let mut dispatched = 0usize;
    let mut batch: Vec<Blob> = Vec::with_capacity(batch_size);
    let mut batch_names: Vec<String> = Vec::with_capacity(batch_size);

    while let Some(blob) = rx.recv().await {
        let name = indexer::blob_name(&blob.path, &blob.content);
        let is_new = !existing.contains(&name);
        all_names.push(name.clone());
        if !is_new {
            continue;
        }
        new_total += 1;
        batch.push(blob);
        batch_names.push(name);
        if batch.len() == batch_size {
            dispatch_batch(
                &mut uploads,
                cfg,
                client,
                &semaphore,
                std::mem::take(&mut batch),
                std::mem::take(&mut batch_names),
            )
            .await?;
            dispatched += 1;
        }
    }
    if !batch.is_empty() {
        dispatch_batch(&mut uploads, cfg, client, &semaphore, batch, batch_names).await?;
        dispatched += 1;
    }

    let walk_result = match walker.await {
        Ok(r) => r,
        Err(e) => Err(anyhow!("walk task failed: {e}")),
    };

    tasks.set_upload_totals(project_key, all_names.len(), new_total, dispatched);

    let mut confirmed: Vec<String> = Vec::new();
    let mut failed_batches = 0usize;
    while let Some(joined) = uploads.join_next().await {
        match joined {
            Ok(Ok((names, blob_count, bytes))) => {
                tasks.on_batch(project_key, blob_count, bytes);
                confirmed.extend(names);
            }
            Ok(Err(e)) => {
                failed_batches += 1;
                tracing::warn!(error = %e, "batch upload failed, skipping");
            }
            Err(e) => {
                failed_batches += 1;
                tracing::warn!(error = %e, "batch upload task aborted");
            }
        }
    }
    if failed_batches > 0 {
        tracing::warn!(failed_batches, dispatched, "pass finished with skipped batches");
    }

    let merged = ProjectsIndex::merge_and_save(&cfg.projects_file(), project_key, &confirmed)?;

    walk_result?;
    if all_names.is_empty() {
        return Err(anyhow!("no text files found in project"));
    }

    tracing::info!(
        total = all_names.len(),
        new = new_total,
        existing = all_names.len() - new_total,
        confirmed = confirmed.len(),
        "indexing pass complete"
    );
    Ok(merged)
}

async fn dispatch_batch(
    uploads: &mut JoinSet<BatchOutcome>,
    cfg: &Config,
    client: &Client,
    semaphore: &Arc<Semaphore>,
    blobs: Vec<Blob>,
    names: Vec<String>,
) -> Result<()> {
    // Acquire before spawning: this is the backpressure on the remote API.
    let permit = semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| anyhow!("upload semaphore closed"))?;
    let cfg = cfg.clone();
    let client = client.clone();
    uploads.spawn(async move {
        let _permit = permit;
        let bytes: usize = blobs.iter().map(|b| b.content.len()).sum();
        let acked = backend::upload_batch(&cfg, &client, &blobs).await?;
        if acked.len() != names.len() {
            tracing::warn!(
                expected = names.len(),
                acked = acked.len(),
                "server acknowledged a different blob count"
            );
        }
        let blob_count = blobs.len();
        Ok((names, blob_count, bytes))
    });
    Ok(())
}

/// Index the project, then query the retrieval endpoint with the post-merge
/// identity set. All failures are surfaced to the caller, which renders
/// them as `Error: ...` text at the tool boundary.
pub async fn search_context(
    cfg: &Config,
    client: &Client,
    tasks: &TaskManager,
    project_root: &str,
    query: &str,
) -> Result<String> {
    let query = query.trim();
    if query.is_empty() {
        return Err(BridgeError::invalid_input("query must not be empty").into());
    }
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(BridgeError::invalid_input("query too long (max 10000 characters)").into());
    }
    if !cfg.settings.token_configured() {
        return Err(BridgeError::TokenNotConfigured.into());
    }
    let (project_key, root) = validate_project_root(project_root)?;
    tracing::info!(path = %project_key, "search_context invoked");

    tasks.begin(&project_key);
    let outcome: Result<String> = async {
        let all_names = index_project(cfg, client, tasks, &project_key, &root).await?;
        let formatted = backend::retrieve_formatted(cfg, client, &all_names, query).await?;
        Ok(formatted)
    }
    .await;
    match &outcome {
        Ok(_) => tasks.finish(&project_key),
        Err(e) => tasks.fail(&project_key, e.to_string()),
    }
    outcome
}
