use super::error_fmt::{backend_open_error, backend_rw_error};
use super::ioctl::{self, Codec, ComprBuffer, ComprMetadata, ComprParams, ComprTstamp};
use super::traits::{CompressDevice, GaplessMetadata};
use crate::pcm_config::ComprConfig;
use crate::types::audio_format;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::os::fd::AsRawFd;
use tracing::debug;

const BACKEND: &str = "compress";

/// Kernel codec id for an audio framework offload format.
pub fn codec_id(format: u32) -> u32 {
    match audio_format::main_format(format) {
        audio_format::MP3 => ioctl::CODEC_MP3,
        audio_format::AAC => ioctl::CODEC_AAC,
        audio_format::FLAC => ioctl::CODEC_FLAC,
        _ => ioctl::CODEC_PCM,
    }
}

pub struct ComprDevice {
    path: String,
    file: File,
}

impl std::fmt::Debug for ComprDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComprDevice")
            .field("path", &self.path)
            .field("fd", &self.file.as_raw_fd())
            .finish()
    }
}

impl ComprDevice {
    pub fn open(card: u32, device: u32, config: &ComprConfig) -> Result<Self, String> {
        let path = format!("/dev/snd/comprC{card}D{device}");
        let file = File::options()
            .write(true)
            .open(&path)
            .map_err(|e| backend_open_error(BACKEND, "playback", &path, e))?;

        let codec = Codec {
            id: codec_id(config.codec.id),
            ch_in: config.codec.ch_in,
            ch_out: config.codec.ch_out,
            sample_rate: config.codec.sample_rate,
            bit_rate: config.codec.bit_rate,
            format: config.codec.format,
            ..Codec::default()
        };
        let params = ComprParams {
            buffer: ComprBuffer {
                fragment_size: config.fragment_size,
                fragments: config.fragments,
            },
            codec,
            no_wake_mode: 0,
        };
        unsafe { ioctl::compr_set_params(file.as_raw_fd(), &params) }
            .map_err(|e| backend_open_error(BACKEND, "playback", &path, e))?;
        debug!("opened {path} codec {}", codec.id);
        Ok(Self { path, file })
    }

    fn fd(&self) -> i32 {
        self.file.as_raw_fd()
    }

    fn command(
        &self,
        op: &str,
        call: unsafe fn(i32) -> nix::Result<i32>,
    ) -> Result<(), String> {
        unsafe { call(self.fd()) }
            .map(|_| ())
            .map_err(|e| backend_rw_error(BACKEND, "playback", op, e))
    }
}

impl CompressDevice for ComprDevice {
    fn write(&mut self, data: &[u8]) -> Result<usize, String> {
        match self.file.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(backend_rw_error(BACKEND, "playback", "write", e)),
        }
    }

    fn start(&mut self) -> Result<(), String> {
        self.command("start", ioctl::compr_start)
    }

    fn stop(&mut self) -> Result<(), String> {
        self.command("stop", ioctl::compr_stop)
    }

    fn pause(&mut self) -> Result<(), String> {
        self.command("pause", ioctl::compr_pause)
    }

    fn resume(&mut self) -> Result<(), String> {
        self.command("resume", ioctl::compr_resume)
    }

    fn drain(&mut self) -> Result<(), String> {
        self.command("drain", ioctl::compr_drain)
    }

    fn set_nonblock(&mut self, nonblock: bool) -> Result<(), String> {
        ioctl::set_nonblock(self.fd(), nonblock)
            .map_err(|e| backend_rw_error(BACKEND, "playback", "fcntl", e))
    }

    fn set_gapless_metadata(&mut self, meta: GaplessMetadata) -> Result<(), String> {
        for (key, value) in [
            (ioctl::METADATA_ENCODER_DELAY, meta.encoder_delay),
            (ioctl::METADATA_ENCODER_PADDING, meta.encoder_padding),
        ] {
            let mut md = ComprMetadata {
                key,
                ..ComprMetadata::default()
            };
            md.value[0] = value;
            unsafe { ioctl::compr_set_metadata(self.fd(), &md) }
                .map_err(|e| backend_rw_error(BACKEND, "playback", "set metadata", e))?;
        }
        Ok(())
    }

    fn tstamp(&mut self) -> Result<(u64, u32), String> {
        let mut ts = ComprTstamp::default();
        unsafe { ioctl::compr_tstamp(self.fd(), &mut ts) }
            .map_err(|e| backend_rw_error(BACKEND, "playback", "tstamp", e))?;
        Ok((ts.pcm_io_frames as u64, ts.sampling_rate))
    }
}
