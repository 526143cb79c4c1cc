use crate::types::PcmFormat;
use serde::Serialize;

pub const DEFAULT_MEDIA_RATE: u32 = 48000;
pub const DEFAULT_MEDIA_CHANNELS: u32 = 2;
pub const DEFAULT_MEDIA_FORMAT: PcmFormat = PcmFormat::S16Le;
pub const UHQA_MEDIA_RATE: u32 = 192000;
pub const SUHQA_MEDIA_RATE: u32 = 384000;
pub const MMAP_PERIOD_SIZE: u32 = DEFAULT_MEDIA_RATE / 1000;
pub const MMAP_PERIOD_COUNT_MIN: u32 = 32;
pub const MMAP_PERIOD_COUNT_MAX: u32 = 512;
pub const ABOX_UNSUPPORTED_CHANNELS: u32 = 6;
pub const ABOX_SUPPORTED_MAX_CHANNELS: u32 = 8;
pub const DP_PLAYBACK_DURATION_MS: u32 = 20;
pub const MMAP_CAPTURE_DURATION_MS: u32 = 1;
pub const OFFLOAD_FRAGMENT_SIZE: u32 = 64 * 1024;
pub const OFFLOAD_FRAGMENTS: u32 = 5;
pub const OFFLOAD_LATENCY_MS: u32 = 50;

const NO_STOP: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PcmConfig {
    pub channels: u32,
    pub rate: u32,
    pub period_size: u32,
    pub period_count: u32,
    pub format: PcmFormat,
    pub start_threshold: u32,
    pub stop_threshold: u32,
}

impl PcmConfig {
    const fn new(
        channels: u32,
        rate: u32,
        period_size: u32,
        period_count: u32,
        format: PcmFormat,
        start_threshold: u32,
        stop_threshold: u32,
    ) -> Self {
        Self {
            channels,
            rate,
            period_size,
            period_count,
            format,
            start_threshold,
            stop_threshold,
        }
    }

    pub fn frame_bytes(&self) -> u32 {
        self.channels * self.format.bytes_per_sample()
    }

    pub fn buffer_frames(&self) -> u32 {
        self.period_size * self.period_count
    }

    pub fn period_bytes(&self) -> u32 {
        self.period_size * self.frame_bytes()
    }

    pub fn frames_to_bytes(&self, frames: u32) -> u32 {
        frames * self.frame_bytes()
    }

    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.frame_bytes().max(1) as usize
    }
}

/// Period length for `duration_ms` at `rate`, rounded down to a multiple of 4 frames.
pub fn period_for_duration(rate: u32, duration_ms: u32) -> u32 {
    (rate * duration_ms / 1000) & !3
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PcmEndpoint {
    pub card: u32,
    pub device: u32,
}

impl PcmEndpoint {
    pub const fn new(card: u32, device: u32) -> Self {
        Self { card, device }
    }
}

impl std::fmt::Display for PcmEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pcmC{}D{}", self.card, self.device)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CodecParams {
    pub id: u32,
    pub ch_in: u32,
    pub ch_out: u32,
    pub sample_rate: u32,
    pub bit_rate: u32,
    pub format: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ComprConfig {
    pub fragment_size: u32,
    pub fragments: u32,
    pub codec: CodecParams,
}

pub const OFFLOAD_COMPR: ComprConfig = ComprConfig {
    fragment_size: OFFLOAD_FRAGMENT_SIZE,
    fragments: OFFLOAD_FRAGMENTS,
    codec: CodecParams {
        id: 0,
        ch_in: 0,
        ch_out: 0,
        sample_rate: 0,
        bit_rate: 0,
        format: 0,
    },
};

pub mod endpoint {
    use super::PcmEndpoint;

    pub const PRIMARY_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 0);
    pub const FAST_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 1);
    pub const LOW_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 1);
    pub const MMAP_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 2);
    pub const DEEP_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 3);
    pub const VOICE_RX: PcmEndpoint = PcmEndpoint::new(0, 4);
    pub const OFFLOAD_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 5);
    pub const BTSCO_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 6);
    pub const BTA2DP_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 6);
    pub const SPKAMP_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 7);
    pub const FM_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 8);
    pub const DIRECT_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 9);
    pub const USB_IN_LOOPBACK: PcmEndpoint = PcmEndpoint::new(0, 10);
    pub const A2DP_MUTE_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 11);
    pub const MIXED_CAPTURE: PcmEndpoint = PcmEndpoint::new(0, 12);
    pub const PRIMARY_CAPTURE: PcmEndpoint = PcmEndpoint::new(0, 13);
    pub const LOW_CAPTURE: PcmEndpoint = PcmEndpoint::new(0, 13);
    pub const MMAP_CAPTURE: PcmEndpoint = PcmEndpoint::new(0, 13);
    pub const VOICE_TX: PcmEndpoint = PcmEndpoint::new(0, 14);
    pub const ERAP_IN: PcmEndpoint = PcmEndpoint::new(0, 15);
    pub const SPKAMP_REFERENCE: PcmEndpoint = PcmEndpoint::new(0, 16);
    pub const BTA2DP_OUT_LOOPBACK: PcmEndpoint = PcmEndpoint::new(0, 17);
    pub const USB_OUT_LOOPBACK: PcmEndpoint = PcmEndpoint::new(0, 18);
    pub const VC_FMRADIO_CAPTURE: PcmEndpoint = PcmEndpoint::new(0, 19);
    pub const AUX_PLAYBACK: PcmEndpoint = PcmEndpoint::new(0, 22);
    pub const VIRTUAL_PRIMARY_PLAYBACK: PcmEndpoint = PcmEndpoint::new(1, 0);
    pub const VIRTUAL_PRIMARY_CAPTURE: PcmEndpoint = PcmEndpoint::new(1, 20);
    pub const FM_RECORD: PcmEndpoint = PcmEndpoint::new(1, 21);
    pub const CALL_RECORD: PcmEndpoint = PcmEndpoint::new(2, 24);
    pub const TELEPHONY_RX_RECORD: PcmEndpoint = PcmEndpoint::new(2, 34);
}

use PcmFormat::{S16Le, S24Le, S32Le};

pub const PRIMARY_PLAYBACK: PcmConfig = PcmConfig::new(2, 48000, 960, 4, S16Le, 960, NO_STOP);
pub const FAST_PLAYBACK: PcmConfig = PcmConfig::new(2, 48000, 192, 2, S16Le, 384, NO_STOP);
pub const LOW_PLAYBACK: PcmConfig = PcmConfig::new(2, 48000, 96, 4, S16Le, 96, NO_STOP);
pub const MMAP_PLAYBACK: PcmConfig = PcmConfig::new(
    2,
    48000,
    MMAP_PERIOD_SIZE,
    MMAP_PERIOD_COUNT_MAX,
    S16Le,
    MMAP_PERIOD_SIZE * 8,
    NO_STOP,
);
pub const DEEP_PLAYBACK: PcmConfig = PcmConfig::new(2, 48000, 960, 4, S24Le, 960, 3840);
pub const DEEP_PLAYBACK_WIDE_RES: PcmConfig = PcmConfig::new(2, 48000, 960, 4, S24Le, 0, 0);
pub const DEEP_PLAYBACK_UHQA: PcmConfig =
    PcmConfig::new(2, UHQA_MEDIA_RATE, 960 * 4, 4, S24Le, 0, 0);
pub const DEEP_PLAYBACK_SUHQA: PcmConfig =
    PcmConfig::new(2, SUHQA_MEDIA_RATE, 960 * 8, 4, S32Le, 0, 0);
pub const VOICE_RX_PLAYBACK: PcmConfig = PcmConfig::new(2, 32000, 480, 4, S16Le, 480, NO_STOP);
pub const BTSCO_PLAYBACK: PcmConfig = PcmConfig::new(2, 48000, 480, 4, S32Le, 480, NO_STOP);
pub const BTA2DP_PLAYBACK: PcmConfig = PcmConfig::new(2, 48000, 480, 4, S16Le, 480, NO_STOP);
pub const A2DP_MUTE_PLAYBACK: PcmConfig = PcmConfig::new(2, 48000, 480, 4, S16Le, 480, NO_STOP);
pub const SPKAMP_PLAYBACK: PcmConfig = PcmConfig::new(4, 48000, 480, 4, S32Le, 480, NO_STOP);
pub const FM_PLAYBACK: PcmConfig = PcmConfig::new(2, 48000, 480, 4, S16Le, 480, NO_STOP);
pub const DIRECT_PLAYBACK: PcmConfig = PcmConfig::new(8, 48000, 480, 4, S24Le, 480, 1920);
pub const USB_OUT_LOOPBACK: PcmConfig = PcmConfig::new(2, 48000, 480, 2, S16Le, 480, NO_STOP);
pub const USB_IN_LOOPBACK: PcmConfig = PcmConfig::new(2, 48000, 480, 4, S16Le, 480, NO_STOP);
pub const AUX_PLAYBACK: PcmConfig = PcmConfig::new(2, 48000, 960, 2, S16Le, 960, NO_STOP);

pub const MIXED_CAPTURE: PcmConfig = PcmConfig::new(2, 48000, 480, 4, S16Le, 480, NO_STOP);
pub const PRIMARY_CAPTURE: PcmConfig = PcmConfig::new(2, 48000, 960, 4, S16Le, 960, NO_STOP);
pub const PRIMARY_QUAD_MIC_CAPTURE: PcmConfig =
    PcmConfig::new(4, 48000, 960, 4, S16Le, 960, NO_STOP);
pub const LOW_CAPTURE: PcmConfig = PcmConfig::new(2, 48000, 192, 2, S16Le, 192, NO_STOP);
pub const MMAP_CAPTURE: PcmConfig = PcmConfig::new(
    2,
    48000,
    MMAP_PERIOD_SIZE,
    MMAP_PERIOD_COUNT_MAX,
    S16Le,
    MMAP_PERIOD_SIZE,
    NO_STOP,
);
pub const VOICE_TX_CAPTURE: PcmConfig = PcmConfig::new(2, 32000, 480, 4, S16Le, 480, NO_STOP);
pub const QUAD_MIC_VOICE_TX_CAPTURE: PcmConfig =
    PcmConfig::new(4, 32000, 480, 4, S16Le, 480, NO_STOP);
pub const VC_FMRADIO_CAPTURE: PcmConfig = PcmConfig::new(2, 48000, 480, 4, S16Le, 480, NO_STOP);
pub const VC_QUAD_MIC_CAPTURE: PcmConfig = PcmConfig::new(4, 48000, 480, 4, S16Le, 480, NO_STOP);
pub const ERAP_IN: PcmConfig = PcmConfig::new(2, 48000, 480, 4, S32Le, 480, NO_STOP);
pub const SPKAMP_REFERENCE: PcmConfig = PcmConfig::new(4, 48000, 480, 4, S32Le, 480, NO_STOP);
pub const BTA2DP_OUT_LOOPBACK: PcmConfig = PcmConfig::new(2, 48000, 480, 4, S16Le, 480, NO_STOP);
pub const CALL_RECORD: PcmConfig = PcmConfig::new(2, 32000, 2048, 2, S16Le, 2048, NO_STOP);
pub const FM_RECORD: PcmConfig = PcmConfig::new(2, 48000, 480, 4, S16Le, 480, 1920);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_buffer_geometry() {
        assert_eq!(PRIMARY_PLAYBACK.frame_bytes(), 4);
        assert_eq!(PRIMARY_PLAYBACK.buffer_frames(), 3840);
        assert_eq!(PRIMARY_PLAYBACK.period_bytes(), 3840);
        assert_eq!(DEEP_PLAYBACK.frame_bytes(), 8);
    }

    #[test]
    fn duration_periods_are_four_frame_aligned() {
        assert_eq!(period_for_duration(48000, 20), 960);
        assert_eq!(period_for_duration(44100, 10), 440);
        assert_eq!(period_for_duration(44100, 1), 44);
    }
}
