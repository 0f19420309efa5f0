//! Indexer: ignore-aware walk, line-bounded blob splitting, content identity.
//!
//! A blob is one uploadable fragment of one file. Its identity is the
//! SHA-256 of its fragment label (relative path, `#n` suffix when split)
//! concatenated with its content bytes, so identical (path, content) pairs
//! hash identically across runs and platforms.

use crate::decode;
use anyhow::{Context, Result, anyhow};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Blob {
    pub path: String,
    pub content: String,
}

/// Compiled `.gitignore` per project root. Read-mostly; a root's gitignore
/// is parsed once per process.
static GITIGNORE_CACHE: LazyLock<Mutex<HashMap<PathBuf, Option<Arc<Gitignore>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Decides whether a relative path is excluded from indexing.
///
/// Configured patterns match case-sensitively against forward-slash paths:
/// a bare name or glob matches any single path segment or the full path, and
/// a trailing `/` restricts the pattern to directories. The project root's
/// `.gitignore` contributes standard wildmatch semantics on top.
#[derive(Clone)]
pub struct IgnoreMatcher {
    any: GlobSet,
    dir_when_dir: GlobSet,
    gitignore: Option<Arc<Gitignore>>,
}

impl IgnoreMatcher {
    pub fn new(project_root: &Path, exclude_patterns: &[String]) -> Result<Self> {
        let mut any = GlobSetBuilder::new();
        let mut dir_when_dir = GlobSetBuilder::new();
        for raw in exclude_patterns {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let (pat, dir_only) = match raw.strip_suffix('/') {
                Some(stripped) => (stripped, true),
                None => (raw, false),
            };
            // contents under a matching directory, at any depth
            any.add(segment_glob(&format!("{pat}/**"), raw)?);
            any.add(segment_glob(&format!("**/{pat}/**"), raw)?);
            if dir_only {
                dir_when_dir.add(segment_glob(pat, raw)?);
                dir_when_dir.add(segment_glob(&format!("**/{pat}"), raw)?);
            } else {
                any.add(segment_glob(pat, raw)?);
                any.add(segment_glob(&format!("**/{pat}"), raw)?);
            }
        }
        Ok(Self {
            any: any.build()?,
            dir_when_dir: dir_when_dir.build()?,
            gitignore: load_gitignore(project_root),
        })
    }

    pub fn is_excluded(&self, rel: &str, is_dir: bool) -> bool {
        if self.any.is_match(rel) {
            return true;
        }
        if is_dir && self.dir_when_dir.is_match(rel) {
            return true;
        }
        if let Some(gi) = &self.gitignore
            && gi
                .matched_path_or_any_parents(Path::new(rel), is_dir)
                .is_ignore()
        {
            return true;
        }
        false
    }
}

/// `*` and `?` stay within one segment; `**` spans segments.
fn segment_glob(text: &str, origin: &str) -> Result<Glob> {
    GlobBuilder::new(text)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid exclude pattern: {origin}"))
}

fn load_gitignore(project_root: &Path) -> Option<Arc<Gitignore>> {
    let mut cache = GITIGNORE_CACHE.lock();
    if let Some(cached) = cache.get(project_root) {
        return cached.clone();
    }
    let gi_path = project_root.join(".gitignore");
    let loaded = if gi_path.is_file() {
        let mut builder = GitignoreBuilder::new(project_root);
        if let Some(err) = builder.add(&gi_path) {
            tracing::warn!(path = %gi_path.display(), error = %err, "failed to read .gitignore");
        }
        match builder.build() {
            Ok(gi) => Some(Arc::new(gi)),
            Err(err) => {
                tracing::warn!(path = %gi_path.display(), error = %err, "failed to parse .gitignore");
                None
            }
        }
    } else {
        None
    };
    cache.insert(project_root.to_path_buf(), loaded.clone());
    loaded
}

fn is_text_ext(path: &Path, text_exts: &HashSet<String>) -> bool {
    if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
        let dot = format!(".{}", ext.to_lowercase());
        return text_exts.contains(&dot);
    }
    false
}

/// Split decoded text into line-bounded fragments.
///
/// At most `max_lines` lines per fragment; a file that fits yields a single
/// blob with no suffix, otherwise fragments are labelled `path#0`, `path#1`,
/// ... and concatenate back to the original text.
pub fn split_blobs(rel: &str, text: &str, max_lines: usize) -> Vec<Blob> {
    let max_lines = max_lines.max(1);
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    if lines.len() <= max_lines {
        return vec![Blob {
            path: rel.to_string(),
            content: text.to_string(),
        }];
    }
    lines
        .chunks(max_lines)
        .enumerate()
        .map(|(i, chunk)| Blob {
            path: format!("{rel}#{i}"),
            content: chunk.concat(),
        })
        .collect()
}

/// Hex SHA-256 over fragment label + content bytes.
pub fn blob_name(fragment_label: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fragment_label.as_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Walk the project depth-first and feed blobs to `emit` in discovery order.
/// Excluded directories are pruned, never descended into. Returning `false`
/// from `emit` stops the walk early.
///
/// Files that cannot be opened are logged and skipped.
pub fn walk_blobs<F>(
    project_root: &Path,
    text_exts: &HashSet<String>,
    max_lines: usize,
    matcher: &IgnoreMatcher,
    mut emit: F,
) -> Result<()>
where
    F: FnMut(Blob) -> bool,
{
    if !project_root.is_dir() {
        return Err(anyhow!(
            "project root not found: {}",
            project_root.display()
        ));
    }
    let root = project_root.to_path_buf();

    let filter_root = root.clone();
    let filter_matcher = matcher.clone();
    let mut wb = WalkBuilder::new(&root);
    wb.git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .hidden(false)
        .follow_links(false);
    wb.filter_entry(move |entry| {
        let rel = match pathdiff::diff_paths(entry.path(), &filter_root) {
            Some(r) => r,
            None => return true,
        };
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if rel_str.is_empty() {
            return true;
        }
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        !filter_matcher.is_excluded(&rel_str, is_dir)
    });

    for dent in wb.build() {
        let dent = match dent {
            Ok(d) => d,
            Err(err) => {
                tracing::debug!(error = %err, "walk entry error");
                continue;
            }
        };
        if dent.file_type().map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        let p = dent.path();
        if !is_text_ext(p, text_exts) {
            continue;
        }
        let rel = pathdiff::diff_paths(p, &root).unwrap_or_default();
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if rel_str.is_empty() {
            continue;
        }
        let content = match decode::read_text(p) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(path = %p.display(), error = %err, "skipping unreadable file");
                continue;
            }
        };
        for blob in split_blobs(&rel_str, &content, max_lines) {
            if !emit(blob) {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Collect every blob of a project into memory. The indexing pass streams
/// through `walk_blobs` instead; this is the convenience form.
pub fn collect_blobs(
    project_root: &Path,
    text_exts: &HashSet<String>,
    max_lines: usize,
    exclude_patterns: &[String],
) -> Result<Vec<Blob>> {
    let matcher = IgnoreMatcher::new(project_root, exclude_patterns)?;
    let mut blobs = Vec::new();
    walk_blobs(project_root, text_exts, max_lines, &matcher, |b| {
        blobs.push(b);
        true
    })?;
    Ok(blobs)
}
