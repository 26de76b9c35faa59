//! Frame-by-frame replay recording.
//!
//! Frames are buffered in memory and spilled to an NDJSON file every
//! `flush_every` frames, so memory stays bounded for arbitrarily long
//! matches. Sealing streams the spill into the final JSON artifact
//! (`<match_id>.json` under the replay directory) without reloading the
//! frame sequence.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::info;

use crate::error::ReplayError;

/// Frames buffered before an incremental flush when no explicit size is
/// configured.
pub const DEFAULT_FLUSH_EVERY: usize = 256;

/// One recorded step of the match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub step: u64,
    /// Observation per agent id.
    pub observations: HashMap<String, Value>,
    /// Action per agent id.
    pub actions: HashMap<String, Value>,
    /// Reward per agent id.
    pub rewards: HashMap<String, f64>,
    pub done: bool,
}

impl Frame {
    /// Builds a frame from per-player slices, keyed by agent id.
    pub fn capture(
        step: u64,
        agent_ids: &[String],
        observations: &[Value],
        actions: &[Value],
        rewards: &[f64],
        done: bool,
    ) -> Self {
        let zip_values = |values: &[Value]| {
            agent_ids
                .iter()
                .zip(values.iter())
                .map(|(id, v)| (id.clone(), v.clone()))
                .collect()
        };
        Self {
            step,
            observations: zip_values(observations),
            actions: zip_values(actions),
            rewards: agent_ids
                .iter()
                .zip(rewards.iter())
                .map(|(id, r)| (id.clone(), *r))
                .collect(),
            done,
        }
    }
}

/// Summary block sealed into the replay artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub total_steps: u64,
    pub duration_sec: f64,
}

/// Records frames in arrival order and seals them into one artifact.
pub struct ReplayRecorder {
    match_id: String,
    environment: String,
    dir: PathBuf,
    spill_path: PathBuf,
    spill: File,
    buffer: Vec<Frame>,
    flush_every: usize,
    total: u64,
    started: Instant,
}

impl ReplayRecorder {
    /// Opens a recorder writing under `dir`.
    pub async fn create(
        match_id: impl Into<String>,
        environment: impl Into<String>,
        dir: impl Into<PathBuf>,
        flush_every: usize,
    ) -> Result<Self, ReplayError> {
        let match_id = match_id.into();
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let spill_path = dir.join(format!("{match_id}.frames.ndjson"));
        let spill = File::create(&spill_path).await?;

        Ok(Self {
            match_id,
            environment: environment.into(),
            dir,
            spill_path,
            spill,
            buffer: Vec::new(),
            flush_every: flush_every.max(1),
            total: 0,
            started: Instant::now(),
        })
    }

    /// Appends one frame, spilling the buffer when it fills.
    pub async fn record(&mut self, frame: Frame) -> Result<(), ReplayError> {
        self.buffer.push(frame);
        self.total += 1;
        if self.buffer.len() >= self.flush_every {
            self.flush_buffer().await?;
        }
        Ok(())
    }

    /// Frames recorded so far.
    pub fn total_frames(&self) -> u64 {
        self.total
    }

    async fn flush_buffer(&mut self) -> Result<(), ReplayError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut chunk = String::new();
        for frame in self.buffer.drain(..) {
            chunk.push_str(&serde_json::to_string(&frame)?);
            chunk.push('\n');
        }
        self.spill.write_all(chunk.as_bytes()).await?;
        Ok(())
    }

    /// Seals the recording: flushes remaining frames, streams the spill
    /// into the final artifact, and returns the replay reference.
    pub async fn seal(mut self) -> Result<String, ReplayError> {
        self.flush_buffer().await?;
        self.spill.flush().await?;

        let summary = ReplaySummary {
            total_steps: self.total,
            duration_sec: self.started.elapsed().as_secs_f64(),
        };

        let final_path = self.dir.join(format!("{}.json", self.match_id));
        let mut out = BufWriter::new(File::create(&final_path).await?);

        out.write_all(b"{\"match_id\":").await?;
        out.write_all(serde_json::to_string(&self.match_id)?.as_bytes())
            .await?;
        out.write_all(b",\"environment\":").await?;
        out.write_all(serde_json::to_string(&self.environment)?.as_bytes())
            .await?;
        out.write_all(b",\"frames\":[").await?;

        let spill = BufReader::new(File::open(&self.spill_path).await?);
        let mut lines = spill.lines();
        let mut first = true;
        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                continue;
            }
            if !first {
                out.write_all(b",").await?;
            }
            out.write_all(line.as_bytes()).await?;
            first = false;
        }

        out.write_all(b"],\"summary\":").await?;
        out.write_all(serde_json::to_string(&summary)?.as_bytes())
            .await?;
        out.write_all(b"}").await?;
        out.flush().await?;

        let _ = tokio::fs::remove_file(&self.spill_path).await;

        info!(
            match_id = %self.match_id,
            frames = self.total,
            path = %final_path.display(),
            "Sealed replay"
        );
        Ok(format!("replays/{}.json", self.match_id))
    }
}
