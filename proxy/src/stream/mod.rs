//! Per-stream proxies. A stream owns its PCM or compress handle and keeps
//! the framework's requested configuration apart from what the hardware
//! actually runs.

pub mod capture;
pub mod convert;
pub mod mmap;
pub mod playback;
pub mod resample;

pub use capture::CaptureStream;
pub use mmap::{MmapBufferInfo, MmapPosition};
pub use playback::PlaybackStream;

use serde::Serialize;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// What the framework asked for when it created the stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channel_mask: u32,
    pub format: u32,
    /// Compressed offload only.
    pub offload_format: u32,
    pub bit_rate: u32,
}

impl AudioConfig {
    pub fn pcm(sample_rate: u32, channel_mask: u32, format: u32) -> Self {
        Self {
            sample_rate,
            channel_mask,
            format,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    pub frames: u64,
    pub time: Duration,
}

/// Monotonic clock shared by every stream's timestamps.
pub fn monotonic_now() -> Duration {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}

/// Sleeps for as long as `frames` take to play at `rate`.
pub(crate) fn pace(frames: u64, rate: u32) {
    if frames == 0 || rate == 0 {
        return;
    }
    std::thread::sleep(Duration::from_micros(frames * 1_000_000 / rate as u64));
}

/// Bytes per sample for a framework format; compressed and unknown formats count as 2.
pub(crate) fn audio_bytes_per_sample(format: u32) -> usize {
    crate::types::PcmFormat::from_audio_format(format)
        .map_or(2, |f| f.bytes_per_sample() as usize)
}
