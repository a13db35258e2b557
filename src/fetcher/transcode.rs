//! Audio transcoding behind a trait seam.
//!
//! The production implementation shells out to ffmpeg. Encoder parameters
//! are fixed per tier (bitrate, sample rate, channel count) so the same
//! source at the same tier always encodes with the same configuration.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::ledger::QualityTier;

/// Fixed encoder configuration for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeProfile {
    pub bitrate_kbps: u32,
    pub sample_rate_hz: u32,
    pub channels: u32,
}

impl EncodeProfile {
    pub fn for_tier(tier: QualityTier) -> Self {
        Self {
            bitrate_kbps: tier.bitrate_kbps(),
            sample_rate_hz: 44_100,
            channels: 2,
        }
    }
}

/// Transcoding boundary.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Re-encode `src` into `dest` with the given profile.
    async fn transcode(&self, src: &Path, dest: &Path, profile: &EncodeProfile) -> Result<()>;
}

/// ffmpeg subprocess transcoder.
pub struct FfmpegTranscoder {
    ffmpeg_bin: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_bin: PathBuf) -> Self {
        Self { ffmpeg_bin }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, src: &Path, dest: &Path, profile: &EncodeProfile) -> Result<()> {
        debug!(
            "Transcoding {:?} -> {:?} at {} kbps",
            src, dest, profile.bitrate_kbps
        );

        let output = Command::new(&self.ffmpeg_bin)
            .arg("-nostdin")
            .arg("-y")
            .arg("-i")
            .arg(src)
            .arg("-vn")
            .arg("-codec:a")
            .arg("libmp3lame")
            .arg("-b:a")
            .arg(format!("{}k", profile.bitrate_kbps))
            .arg("-ar")
            .arg(profile.sample_rate_hz.to_string())
            .arg("-ac")
            .arg(profile.channels.to_string())
            .arg(dest)
            .output()
            .await
            .with_context(|| format!("Failed to launch {:?}", self.ffmpeg_bin))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // ffmpeg is chatty; keep the tail, which carries the actual error.
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join(" | ");
            bail!("ffmpeg exited with {}: {}", output.status, tail);
        }

        Ok(())
    }
}
