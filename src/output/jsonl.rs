//! JSON-lines streamer
//!
//! Documents are written one JSON object per line to `root/<dir>/<file>.jsonl`.
//! Each file holds at most `max_file_size` documents and each directory at
//! most `max_directory_size` files. Existing files are never overwritten; a new
//! run continues at the first free slot.

use super::traits::{OutputResult, Streamer};
use crate::download::PipeMetadata;
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct JsonLinesStreamer {
    root: PathBuf,
    max_directory_size: usize,
    max_file_size: usize,
    dir_index: usize,
    file_index: usize,
    lines_in_file: usize,
    writer: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
}

impl JsonLinesStreamer {
    pub fn new(root: impl AsRef<Path>, max_directory_size: usize, max_file_size: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_directory_size: max_directory_size.max(1),
            max_file_size: max_file_size.max(1),
            dir_index: 0,
            file_index: 0,
            lines_in_file: 0,
            writer: None,
            current_path: None,
        }
    }

    fn slot_path(&self) -> PathBuf {
        self.root
            .join(self.dir_index.to_string())
            .join(format!("{}.jsonl", self.file_index))
    }

    fn advance_slot(&mut self) {
        self.file_index += 1;
        if self.file_index >= self.max_directory_size {
            self.dir_index += 1;
            self.file_index = 0;
        }
    }

    /// Closes the current file and opens the next free one
    fn rotate(&mut self) -> OutputResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            self.advance_slot();
        }

        let mut path = self.slot_path();
        while path.exists() {
            self.advance_slot();
            path = self.slot_path();
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        tracing::debug!(path = %path.display(), "Opened output file");

        self.writer = Some(BufWriter::new(file));
        self.current_path = Some(path);
        self.lines_in_file = 0;
        Ok(())
    }
}

impl Streamer for JsonLinesStreamer {
    fn stream(&mut self, data: &Map<String, Value>, _metadata: &PipeMetadata) -> OutputResult<Option<String>> {
        if self.writer.is_none() || self.lines_in_file >= self.max_file_size {
            self.rotate()?;
        }

        let (Some(writer), Some(path)) = (self.writer.as_mut(), self.current_path.as_ref()) else {
            return Ok(None);
        };

        serde_json::to_writer(&mut *writer, data)?;
        writer.write_all(b"\n")?;
        self.lines_in_file += 1;

        Ok(Some(format!("{}:{}", path.display(), self.lines_in_file)))
    }

    fn clean_up(&mut self) -> OutputResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for JsonLinesStreamer {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}
