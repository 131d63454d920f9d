//! Bounded rolling history consumed by the rendering side.

use std::collections::VecDeque;

use crate::protocol::{HEATMAP_ROWS, LOG_LINES};
use crate::types::{HeatmapRow, Sample};

/// Sliding windows of recent heatmap rows and log lines.
///
/// * heatmap: chronological (oldest first), at most [`HEATMAP_ROWS`] rows
/// * log: most recent first, at most [`LOG_LINES`] lines
///
/// Both windows are preallocated and never grow past their cap, however many
/// notifications arrive.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    rows: VecDeque<HeatmapRow>,
    log: VecDeque<String>,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self {
            rows: VecDeque::with_capacity(HEATMAP_ROWS + 1),
            log: VecDeque::with_capacity(LOG_LINES + 1),
        }
    }

    /// Append the sample's row, dropping the oldest row once over capacity.
    pub fn push_sample(&mut self, sample: &Sample) {
        self.rows.push_back(sample.row);
        while self.rows.len() > HEATMAP_ROWS {
            self.rows.pop_front();
        }
    }

    /// Prepend a log line, dropping the oldest (last) line once over capacity.
    pub fn push_log(&mut self, line: impl Into<String>) {
        self.log.push_front(line.into());
        while self.log.len() > LOG_LINES {
            self.log.pop_back();
        }
    }

    /// Empty the heatmap window. Log history is kept.
    pub fn clear_heatmap(&mut self) {
        self.rows.clear();
    }

    pub fn heatmap(&self) -> impl Iterator<Item = &HeatmapRow> {
        self.rows.iter()
    }

    pub fn log(&self) -> impl Iterator<Item = &str> {
        self.log.iter().map(String::as_str)
    }

    pub fn heatmap_len(&self) -> usize {
        self.rows.len()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }
}
