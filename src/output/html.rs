//! HTML streamer
//!
//! Writes the `html` field of each document to `root/<dir>/<n>.html`, with at
//! most `max_directory_size` files per directory.

use super::traits::{OutputResult, Streamer};
use crate::download::PipeMetadata;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub struct HtmlStreamer {
    root: PathBuf,
    max_directory_size: usize,
    dir_index: usize,
    file_index: usize,
}

impl HtmlStreamer {
    pub fn new(root: impl AsRef<Path>, max_directory_size: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_directory_size: max_directory_size.max(1),
            dir_index: 0,
            file_index: 0,
        }
    }

    fn slot_path(&self) -> PathBuf {
        self.root
            .join(self.dir_index.to_string())
            .join(format!("{}.html", self.file_index))
    }

    fn advance_slot(&mut self) {
        self.file_index += 1;
        if self.file_index >= self.max_directory_size {
            self.dir_index += 1;
            self.file_index = 0;
        }
    }
}

impl Streamer for HtmlStreamer {
    fn stream(&mut self, data: &Map<String, Value>, metadata: &PipeMetadata) -> OutputResult<Option<String>> {
        let Some(html) = data.get("html").and_then(Value::as_str) else {
            tracing::debug!(url = ?metadata.url(), "Document has no html field, not written");
            return Ok(None);
        };

        let mut path = self.slot_path();
        while path.exists() {
            self.advance_slot();
            path = self.slot_path();
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, html)?;
        self.advance_slot();

        Ok(Some(path.display().to_string()))
    }

    fn clean_up(&mut self) -> OutputResult<()> {
        Ok(())
    }
}
