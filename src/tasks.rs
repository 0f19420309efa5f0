//! Per-project progress of running indexing passes, for the admin status
//! endpoint.

use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

#[derive(Clone, Debug, Serialize, Default)]
pub struct PassProgress {
    pub phase: String,
    pub total_blobs: usize,
    pub new_blobs: usize,
    pub batches_total: usize,
    pub batches_done: usize,
    pub uploaded_blobs: usize,
    pub uploaded_bytes: usize,
    pub percent: f32,
    pub started_at: u64,
    pub updated_at: u64,
    pub message: Option<String>,
}

impl PassProgress {
    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn start() -> Self {
        Self {
            phase: "collecting".into(),
            started_at: Self::now(),
            updated_at: Self::now(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Default)]
pub struct TaskManager {
    statuses: Arc<Mutex<HashMap<String, PassProgress>>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, key: &str) {
        self.statuses
            .lock()
            .insert(key.to_string(), PassProgress::start());
    }

    pub fn set_upload_totals(&self, key: &str, total_blobs: usize, new_blobs: usize, batches: usize) {
        if let Some(st) = self.statuses.lock().get_mut(key) {
            st.phase = "uploading".into();
            st.total_blobs = total_blobs;
            st.new_blobs = new_blobs;
            st.batches_total = batches;
            st.updated_at = PassProgress::now();
        }
    }

    pub fn on_batch(&self, key: &str, batch_blobs: usize, batch_bytes: usize) {
        if let Some(st) = self.statuses.lock().get_mut(key) {
            st.batches_done += 1;
            st.uploaded_blobs += batch_blobs;
            st.uploaded_bytes += batch_bytes;
            st.percent = if st.batches_total == 0 {
                100.0
            } else {
                (st.batches_done as f32) * 100.0 / (st.batches_total as f32)
            };
            st.updated_at = PassProgress::now();
        }
    }

    pub fn finish(&self, key: &str) {
        if let Some(st) = self.statuses.lock().get_mut(key) {
            st.phase = "done".into();
            st.percent = 100.0;
            st.updated_at = PassProgress::now();
        }
    }

    pub fn fail(&self, key: &str, msg: String) {
        if let Some(st) = self.statuses.lock().get_mut(key) {
            st.phase = "failed".into();
            st.message = Some(msg);
            st.updated_at = PassProgress::now();
        }
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.statuses
            .lock()
            .get(key)
            .map(|st| st.phase != "done" && st.phase != "failed")
            .unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<PassProgress> {
        self.statuses.lock().get(key).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, PassProgress> {
        self.statuses.lock().clone()
    }
}
