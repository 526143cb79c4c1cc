//! Sample-level helpers shared by the playback and capture streams.

use crate::types::AudioUsage;
use byteorder::{ByteOrder, LittleEndian};

/// Weight applied to the sum of uplink and downlink when a call recording
/// asks for both directions.
pub const CALL_RECORD_MIX_WEIGHT: f32 = 0.7;

/// Re-lays `src` frames of `src_channels` samples as frames of `dst_channels`
/// samples. Extra destination channels are zero filled, surplus source
/// channels are dropped.
pub fn adjust_channels(
    src: &[u8],
    src_channels: usize,
    dst_channels: usize,
    bytes_per_sample: usize,
) -> Vec<u8> {
    if src_channels == 0 || dst_channels == 0 || bytes_per_sample == 0 {
        return Vec::new();
    }
    let src_frame = src_channels * bytes_per_sample;
    let dst_frame = dst_channels * bytes_per_sample;
    let copy = src_channels.min(dst_channels) * bytes_per_sample;
    let frames = src.len() / src_frame;
    let mut out = vec![0u8; frames * dst_frame];
    for (s, d) in src
        .chunks_exact(src_frame)
        .zip(out.chunks_exact_mut(dst_frame))
    {
        d[..copy].copy_from_slice(&s[..copy]);
    }
    out
}

pub fn clamp16(sample: f32) -> i16 {
    sample.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Call-record PCM carries downlink (Rx) on the left and uplink (Tx) on the
/// right. Every frame is rewritten so both channels hold what `usage` asks for.
pub fn select_call_channels(buf: &mut [u8], usage: AudioUsage) {
    for frame in buf.chunks_exact_mut(4) {
        let rx = LittleEndian::read_i16(&frame[0..2]);
        let tx = LittleEndian::read_i16(&frame[2..4]);
        let mono = match usage {
            AudioUsage::IncallUplink => tx,
            AudioUsage::IncallDownlink => rx,
            _ => clamp16((i32::from(rx) + i32::from(tx)) as f32 * CALL_RECORD_MIX_WEIGHT),
        };
        LittleEndian::write_i16(&mut frame[0..2], mono);
        LittleEndian::write_i16(&mut frame[2..4], mono);
    }
}

/// The DSP delivers 24-bit samples zero padded in 32-bit words; restore the
/// sign of negative samples.
pub fn sign_extend_24(buf: &mut [u8]) {
    for word in buf.chunks_exact_mut(4) {
        let v = LittleEndian::read_i32(word);
        LittleEndian::write_i32(word, (v << 8) >> 8);
    }
}

/// Normalized float view of interleaved 16-bit or 32-bit-container PCM.
pub fn to_f32(buf: &[u8], bytes_per_sample: usize) -> Vec<f32> {
    match bytes_per_sample {
        2 => buf
            .chunks_exact(2)
            .map(|s| f32::from(LittleEndian::read_i16(s)) / 32768.0)
            .collect(),
        4 => buf
            .chunks_exact(4)
            .map(|s| LittleEndian::read_i32(s) as f32 / 8_388_608.0)
            .collect(),
        _ => Vec::new(),
    }
}

/// Inverse of [`to_f32`]; 4-byte samples are written as 24-bit in 32.
pub fn from_f32(samples: &[f32], bytes_per_sample: usize) -> Vec<u8> {
    let mut out = vec![0u8; samples.len() * bytes_per_sample];
    match bytes_per_sample {
        2 => {
            for (s, d) in samples.iter().zip(out.chunks_exact_mut(2)) {
                LittleEndian::write_i16(d, clamp16(s * 32768.0));
            }
        }
        4 => {
            for (s, d) in samples.iter().zip(out.chunks_exact_mut(4)) {
                let v = (s * 8_388_608.0).clamp(-8_388_608.0, 8_388_607.0) as i32;
                LittleEndian::write_i32(d, v);
            }
        }
        _ => {}
    }
    out
}
