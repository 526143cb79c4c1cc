use super::convert::adjust_channels;
use super::mmap::{adjust_mmap_period_count, setup_mmap};
use super::{
    AudioConfig, MmapBufferInfo, MmapPosition, Position, audio_bytes_per_sample, monotonic_now,
    pace,
};
use crate::device::{DeviceProxy, controls};
use crate::error::ProxyError;
use crate::hw::{CompressDevice, GaplessMetadata, OpenFlags, PcmDevice, PcmDirection};
use crate::params::{StrParms, keys};
use crate::pcm_config::{
    self, ABOX_SUPPORTED_MAX_CHANNELS, ABOX_UNSUPPORTED_CHANNELS, CodecParams, ComprConfig,
    DEFAULT_MEDIA_RATE, DP_PLAYBACK_DURATION_MS, OFFLOAD_COMPR, OFFLOAD_LATENCY_MS, PcmConfig,
    PcmEndpoint, endpoint, period_for_duration,
};
use crate::types::{AudioDevice, HqMode, PcmFormat, PlaybackType, audio_format, channel_mask};
use crate::usb::{USB_PLAYBACK_DURATION_MS, UsbDirection};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const DIRECT_RATES: [u32; 8] = [8000, 16000, 32000, 44100, 48000, 96000, 192000, 384000];
const DIRECT_MASKS: [u32; 3] = [
    channel_mask::OUT_5POINT1,
    channel_mask::OUT_6POINT1,
    channel_mask::OUT_7POINT1,
];
const AUX_RATES: [u32; 7] = [32000, 44100, 48000, 88200, 96000, 176400, 192000];
const OFFLOAD_FORMATS: [u32; 3] = [audio_format::MP3, audio_format::AAC, audio_format::FLAC];

fn join<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

fn template(stream_type: PlaybackType) -> (PcmConfig, PcmEndpoint) {
    match stream_type {
        PlaybackType::NoAttribute | PlaybackType::Primary => {
            (pcm_config::PRIMARY_PLAYBACK, endpoint::PRIMARY_PLAYBACK)
        }
        PlaybackType::Fast => (pcm_config::FAST_PLAYBACK, endpoint::FAST_PLAYBACK),
        PlaybackType::LowLatency => (pcm_config::LOW_PLAYBACK, endpoint::LOW_PLAYBACK),
        PlaybackType::DeepBuffer => (pcm_config::DEEP_PLAYBACK, endpoint::DEEP_PLAYBACK),
        PlaybackType::Compress => (pcm_config::PRIMARY_PLAYBACK, endpoint::OFFLOAD_PLAYBACK),
        PlaybackType::Mmap => (pcm_config::MMAP_PLAYBACK, endpoint::MMAP_PLAYBACK),
        PlaybackType::Aux => (pcm_config::AUX_PLAYBACK, endpoint::AUX_PLAYBACK),
        PlaybackType::Direct => (pcm_config::DIRECT_PLAYBACK, endpoint::DIRECT_PLAYBACK),
    }
}

/// One framework output stream. Holds the requested format next to the
/// PCM or compress configuration the DSP actually runs.
pub struct PlaybackStream {
    proxy: Arc<DeviceProxy>,
    stream_type: PlaybackType,
    requested: AudioConfig,
    endpoint: PcmEndpoint,
    pcmconfig: PcmConfig,
    compr: ComprConfig,
    pcm: Option<Box<dyn PcmDevice>>,
    /// DMA side of the primary stream; `pcm` is the virtual device on top of it.
    dma_pcm: Option<Box<dyn PcmDevice>>,
    compress: Option<Box<dyn CompressDevice>>,
    mmap: Option<MmapBufferInfo>,
    frames: u64,
    need_channelpadding: bool,
    need_update_pcm_config: bool,
    uhqa_stream_config: bool,
    nonblock: bool,
    ready_new_metadata: bool,
    offload_metadata: GaplessMetadata,
    primary_registered: bool,
}

impl PlaybackStream {
    pub fn new(
        proxy: Arc<DeviceProxy>,
        stream_type: PlaybackType,
        requested: AudioConfig,
    ) -> Result<Self, ProxyError> {
        let (pcmconfig, endpoint) = template(stream_type);
        let mut stream = Self {
            proxy,
            stream_type,
            requested,
            endpoint,
            pcmconfig,
            compr: OFFLOAD_COMPR,
            pcm: None,
            dma_pcm: None,
            compress: None,
            mmap: None,
            frames: 0,
            need_channelpadding: false,
            need_update_pcm_config: false,
            uhqa_stream_config: false,
            nonblock: false,
            ready_new_metadata: false,
            offload_metadata: GaplessMetadata::default(),
            primary_registered: false,
        };

        match stream_type {
            PlaybackType::Primary => {
                stream.primary_registered = stream.proxy.register_primary_out();
                if !stream.primary_registered {
                    error!("primary output is already registered");
                }
            }
            PlaybackType::Compress => stream.configure_offload()?,
            PlaybackType::Aux => stream.configure_aux(),
            PlaybackType::Direct => stream.configure_direct()?,
            _ => {}
        }

        info!(
            "{:?} playback created on {} with {:?}",
            stream_type, stream.endpoint, stream.pcmconfig
        );
        Ok(stream)
    }

    fn configure_offload(&mut self) -> Result<(), ProxyError> {
        let format = match self.requested.offload_format {
            audio_format::DEFAULT => self.requested.format,
            offload => offload,
        };
        let main = audio_format::main_format(format);
        if !OFFLOAD_FORMATS.contains(&main) {
            error!(
                "offload does not support {}",
                audio_format::name(self.requested.format)
            );
            return Err(ProxyError::NotSupported);
        }
        let channels = channel_mask::count(self.requested.channel_mask);
        self.compr.codec = CodecParams {
            id: main,
            ch_in: channels,
            ch_out: channels,
            sample_rate: self.requested.sample_rate,
            bit_rate: self.requested.bit_rate,
            format: self.requested.format,
        };
        self.ready_new_metadata = true;
        Ok(())
    }

    fn configure_aux(&mut self) {
        let requested = self.requested;
        if requested.sample_rate != 0 {
            self.pcmconfig.rate = requested.sample_rate;
            if requested.sample_rate > DEFAULT_MEDIA_RATE {
                self.pcmconfig.period_size =
                    requested.sample_rate * DP_PLAYBACK_DURATION_MS / 1000;
            }
        }
        if requested.channel_mask != channel_mask::NONE {
            self.pcmconfig.channels = channel_mask::count(requested.channel_mask);
        }
        if requested.format != audio_format::DEFAULT {
            if let Some(format) = PcmFormat::from_audio_format(requested.format) {
                self.pcmconfig.format = format;
            }
        }
    }

    fn configure_direct(&mut self) -> Result<(), ProxyError> {
        let usb = self.proxy.usb();
        if !usb.is_playback_connected() {
            error!("direct playback needs a connected USB output");
            return Err(ProxyError::NotSupported);
        }
        let requested = self.requested;
        let channels = channel_mask::count(requested.channel_mask);
        let highest = usb.playback_highest_supported_channels();
        if channels > highest {
            error!("USB output supports {highest} channels, {channels} requested");
            return Err(ProxyError::NotSupported);
        }

        if !DIRECT_RATES.contains(&requested.sample_rate) {
            return Err(ProxyError::Invalid(format!(
                "unsupported direct rate {}",
                requested.sample_rate
            )));
        }
        self.pcmconfig.rate = requested.sample_rate;
        self.pcmconfig.period_size =
            period_for_duration(requested.sample_rate, USB_PLAYBACK_DURATION_MS);

        if !DIRECT_MASKS.contains(&requested.channel_mask) {
            return Err(ProxyError::Invalid(format!(
                "unsupported direct channel mask {:#x}",
                requested.channel_mask
            )));
        }
        if channels != ABOX_SUPPORTED_MAX_CHANNELS {
            if channels == ABOX_UNSUPPORTED_CHANNELS {
                self.need_channelpadding = true;
                info!("direct playback pads {channels} to {} channels", self.pcmconfig.channels);
            } else {
                self.pcmconfig.channels = channels;
            }
        }

        self.pcmconfig.format = match requested.format {
            audio_format::PCM_16_BIT => PcmFormat::S16Le,
            audio_format::PCM_8_24_BIT => PcmFormat::S24Le,
            audio_format::PCM_32_BIT => PcmFormat::S32Le,
            other => {
                return Err(ProxyError::Invalid(format!(
                    "unsupported direct format {}",
                    audio_format::name(other)
                )));
            }
        };
        Ok(())
    }

    pub fn stream_type(&self) -> PlaybackType {
        self.stream_type
    }

    pub fn requested(&self) -> AudioConfig {
        self.requested
    }

    pub fn pcmconfig(&self) -> &PcmConfig {
        &self.pcmconfig
    }

    pub fn endpoint(&self) -> PcmEndpoint {
        self.endpoint
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn is_open(&self) -> bool {
        self.pcm.is_some() || self.compress.is_some()
    }

    pub fn needs_channel_padding(&self) -> bool {
        self.need_channelpadding
    }

    /// Set when the configuration changed since the device was opened.
    pub fn needs_pcm_config_update(&self) -> bool {
        self.need_update_pcm_config
    }

    pub fn mmap_buffer(&self) -> Option<MmapBufferInfo> {
        self.mmap
    }

    /// Opens the hardware side. `min_size_frames` only sizes MMAP buffers.
    pub fn open(&mut self, min_size_frames: u32) -> Result<(), ProxyError> {
        if self.is_open() {
            warn!("{} playback is already opened", self.endpoint);
            return Ok(());
        }
        if let Err(e) = self.open_device(min_size_frames) {
            error!("{:?} playback open failed: {e}", self.stream_type);
            self.close();
            return Err(ProxyError::NoDevice);
        }

        if self.proxy.support_dualspk() {
            let power = self.proxy.active_playback().device == AudioDevice::Earpiece
                || self.proxy.spk_ampl_power();
            self.proxy
                .set_mixer_value_int(controls::SPK_AMPL_POWER, i64::from(power));
        }
        self.need_update_pcm_config = false;
        Ok(())
    }

    fn open_device(&mut self, min_size_frames: u32) -> Result<(), String> {
        let backend = self.proxy.backend().clone();
        let ep = self.endpoint;
        if self.stream_type == PlaybackType::Compress {
            self.compress = Some(backend.open_compress(ep.card, ep.device, &self.compr)?);
            info!("{ep} compress opened with {:?}", self.compr.codec);
            return Ok(());
        }

        let flags = if self.stream_type == PlaybackType::Mmap {
            adjust_mmap_period_count(&mut self.pcmconfig, min_size_frames);
            OpenFlags::MMAP
        } else {
            OpenFlags::MONOTONIC
        };
        let mut dma = backend.open_pcm(ep.card, ep.device, PcmDirection::Playback, flags, &self.pcmconfig)?;
        info!("{ep} playback opened with {:?}", self.pcmconfig);

        if self.stream_type == PlaybackType::Primary {
            dma.start()?;
            let virt = endpoint::VIRTUAL_PRIMARY_PLAYBACK;
            let pcm = backend.open_pcm(
                virt.card,
                virt.device,
                PcmDirection::Playback,
                flags,
                &self.pcmconfig,
            )?;
            info!("{virt} virtual playback opened");
            self.pcm = Some(pcm);
            self.dma_pcm = Some(dma);
        } else {
            self.pcm = Some(dma);
        }

        if self.stream_type == PlaybackType::Mmap {
            if let Some(pcm) = self.pcm.as_mut() {
                let info = setup_mmap(backend.as_ref(), pcm.as_mut(), ep, PcmDirection::Playback)?;
                self.mmap = Some(info);
            }
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ProxyError> {
        match self.stream_type {
            PlaybackType::Compress => {
                let compress = self.compress.as_mut().ok_or(ProxyError::NotSupported)?;
                compress.set_nonblock(self.nonblock)?;
                compress.start()?;
                Ok(())
            }
            PlaybackType::Mmap => {
                let pcm = self.pcm.as_mut().ok_or(ProxyError::NoDevice)?;
                pcm.start()?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Consumes `buffer`, returning how many bytes were taken. PCM streams
    /// always take the whole buffer; a failed device write is paced instead.
    pub fn write(&mut self, buffer: &[u8]) -> Result<usize, ProxyError> {
        if self.stream_type != PlaybackType::Aux
            && self.proxy.active_playback().device == AudioDevice::AuxDigital
        {
            let frames = self.pcmconfig.bytes_to_frames(buffer.len()) as u64;
            debug!("{:?} skipped while DP owns the output", self.stream_type);
            pace(frames, self.pcmconfig.rate);
            self.frames += frames;
            return Ok(buffer.len());
        }

        if self.stream_type == PlaybackType::Compress {
            let compress = self.compress.as_mut().ok_or(ProxyError::NoDevice)?;
            if self.ready_new_metadata {
                compress.set_gapless_metadata(self.offload_metadata)?;
                self.ready_new_metadata = false;
            }
            return Ok(compress.write(buffer)?);
        }

        let pcm = self.pcm.as_mut().ok_or(ProxyError::NoDevice)?;
        let padded;
        let (data, frames) = if self.need_channelpadding {
            let src_channels = channel_mask::count(self.requested.channel_mask) as usize;
            let bps = audio_bytes_per_sample(self.requested.format);
            padded = adjust_channels(buffer, src_channels, self.pcmconfig.channels as usize, bps);
            (&padded[..], (buffer.len() / (src_channels * bps).max(1)) as u64)
        } else {
            (buffer, self.pcmconfig.bytes_to_frames(buffer.len()) as u64)
        };
        if let Err(e) = pcm.write(data) {
            error!("{} write failed: {e}", self.endpoint);
            pace(frames, self.pcmconfig.rate);
        }
        self.frames += frames;
        Ok(buffer.len())
    }

    pub fn stop(&mut self) -> Result<(), ProxyError> {
        match self.stream_type {
            PlaybackType::Compress => {
                if let Some(compress) = self.compress.as_mut() {
                    compress.stop()?;
                }
                self.ready_new_metadata = true;
                Ok(())
            }
            PlaybackType::Mmap => {
                if let Some(pcm) = self.pcm.as_mut() {
                    pcm.stop()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn close(&mut self) {
        if self.pcm.take().is_some() {
            info!("{} playback closed", self.endpoint);
        }
        self.dma_pcm = None;
        if self.compress.take().is_some() {
            info!("{} compress closed", self.endpoint);
        }
        self.mmap = None;
    }

    /// Moves the stream to another type and request. Takes effect at the next open.
    pub fn reconfig(&mut self, stream_type: PlaybackType, requested: AudioConfig) {
        self.stream_type = stream_type;
        self.requested = requested;
    }

    /// Bookkeeping for data the framework hands over while the output is
    /// not rendered by this stream. Returns the bytes accounted for.
    pub fn update_playback_buffer(&mut self, bytes: usize) -> usize {
        if self.proxy.is_a2dp_out_enabled() || self.stream_type == PlaybackType::Compress {
            return 0;
        }
        let frames = self.pcmconfig.bytes_to_frames(bytes) as u64;
        pace(frames, self.pcmconfig.rate);
        self.frames += frames;
        bytes
    }

    pub fn estimate_position(&mut self) -> Result<Position, ProxyError> {
        if self.proxy.is_a2dp_out_enabled() {
            return self.presentation_position();
        }
        Ok(Position {
            frames: self.frames,
            time: monotonic_now(),
        })
    }

    fn a2dp_latency_frames(&self, rate: u32) -> u64 {
        self.proxy
            .a2dp_latency_ms()
            .map_or(0, |ms| u64::from(ms) * u64::from(rate) / 1000)
    }

    fn minus_a2dp_latency(&self, frames: u64, rate: u32) -> Result<u64, ProxyError> {
        let latency = self.a2dp_latency_frames(rate);
        if latency == 0 {
            return Ok(frames);
        }
        if frames <= latency {
            return Err(ProxyError::NoData);
        }
        Ok(frames - latency)
    }

    /// Frames the DSP has decoded from the offload stream.
    pub fn render_position(&mut self) -> Result<u64, ProxyError> {
        if self.stream_type != PlaybackType::Compress {
            return Err(ProxyError::NoData);
        }
        let compress = self.compress.as_mut().ok_or(ProxyError::NoData)?;
        let (frames, tstamp_rate) = compress.tstamp()?;
        self.minus_a2dp_latency(frames, self.offload_rate(tstamp_rate))
    }

    /// Offload positions count at the codec rate; the timestamp's rate only
    /// stands in when the stream was created without one.
    fn offload_rate(&self, tstamp_rate: u32) -> u32 {
        match self.compr.codec.sample_rate {
            0 => tstamp_rate,
            rate => rate,
        }
    }

    pub fn presentation_position(&mut self) -> Result<Position, ProxyError> {
        if self.stream_type == PlaybackType::Compress {
            let compress = self.compress.as_mut().ok_or(ProxyError::NoData)?;
            let (frames, tstamp_rate) = compress.tstamp()?;
            let rate = self.offload_rate(tstamp_rate);
            return Ok(Position {
                frames: self.minus_a2dp_latency(frames, rate)?,
                time: monotonic_now(),
            });
        }

        let pcm = self.pcm.as_mut().ok_or(ProxyError::NoData)?;
        let (avail, time) = pcm.htimestamp()?;
        let pending = i64::from(self.pcmconfig.buffer_frames()) - i64::from(avail);
        let signed = self.frames as i64 - pending;
        if signed < 0 {
            return Err(ProxyError::NoData);
        }
        Ok(Position {
            frames: self.minus_a2dp_latency(signed as u64, self.pcmconfig.rate)?,
            time,
        })
    }

    /// Output latency in milliseconds.
    pub fn latency(&self) -> u32 {
        if self.stream_type == PlaybackType::Compress {
            return OFFLOAD_LATENCY_MS;
        }
        self.pcmconfig.buffer_frames() * 1000 / self.pcmconfig.rate.max(1)
    }

    pub fn getparam(&self, query: &StrParms) -> StrParms {
        let mut reply = StrParms::new();
        if self.stream_type == PlaybackType::NoAttribute && self.proxy.usb().is_playback_connected()
        {
            self.proxy
                .get_usb_parameters(UsbDirection::Out, query, &mut reply);
            return reply;
        }

        if query.has_key(keys::STREAM_SUP_FORMATS) {
            let formats: Vec<&str> = self
                .supported_formats()
                .into_iter()
                .map(audio_format::name)
                .collect();
            reply.add_str(keys::STREAM_SUP_FORMATS, &formats.join("|"));
        }
        if query.has_key(keys::STREAM_SUP_CHANNELS) {
            let masks: Vec<&str> = self
                .supported_channel_masks()
                .into_iter()
                .map(channel_mask::out_name)
                .collect();
            reply.add_str(keys::STREAM_SUP_CHANNELS, &masks.join("|"));
        }
        if query.has_key(keys::STREAM_SUP_SAMPLING_RATES) {
            reply.add_str(
                keys::STREAM_SUP_SAMPLING_RATES,
                &join(&self.supported_rates()),
            );
        }
        reply
    }

    fn supported_formats(&self) -> Vec<u32> {
        match self.stream_type {
            PlaybackType::Compress => OFFLOAD_FORMATS.to_vec(),
            PlaybackType::Direct => vec![
                audio_format::PCM_16_BIT,
                audio_format::PCM_8_24_BIT,
                audio_format::PCM_32_BIT,
            ],
            PlaybackType::Aux => vec![audio_format::PCM_16_BIT, audio_format::PCM_8_24_BIT],
            _ => vec![self.pcmconfig.format.to_audio_format()],
        }
    }

    fn supported_channel_masks(&self) -> Vec<u32> {
        match self.stream_type {
            PlaybackType::Direct => DIRECT_MASKS.to_vec(),
            PlaybackType::Aux => vec![
                channel_mask::OUT_STEREO,
                channel_mask::OUT_5POINT1,
                channel_mask::OUT_7POINT1,
            ],
            _ => vec![channel_mask::OUT_STEREO],
        }
    }

    fn supported_rates(&self) -> Vec<u32> {
        match self.stream_type {
            PlaybackType::Direct => DIRECT_RATES.to_vec(),
            PlaybackType::Aux => AUX_RATES.to_vec(),
            PlaybackType::Compress => vec![44100, 48000],
            _ => vec![self.pcmconfig.rate],
        }
    }

    /// Offload streams take the encoder delay and padding for gapless playback.
    pub fn setparam(&mut self, parms: &StrParms) -> Result<(), ProxyError> {
        if self.stream_type != PlaybackType::Compress {
            return Ok(());
        }
        let mut updated = false;
        if let Some(delay) = parms.get_int(keys::OFFLOAD_CODEC_DELAY) {
            self.offload_metadata.encoder_delay = u32::try_from(delay)
                .map_err(|_| ProxyError::Invalid(format!("encoder delay {delay}")))?;
            updated = true;
        }
        if let Some(padding) = parms.get_int(keys::OFFLOAD_CODEC_PADDING) {
            self.offload_metadata.encoder_padding = u32::try_from(padding)
                .map_err(|_| ProxyError::Invalid(format!("encoder padding {padding}")))?;
            updated = true;
        }
        if updated {
            self.ready_new_metadata = true;
            debug!("offload gapless metadata {:?}", self.offload_metadata);
        }
        Ok(())
    }

    /// Switches AUX and deep-buffer streams between normal and high
    /// resolution output. Applies on the next open.
    pub fn update_uhqa(&mut self, mode: HqMode) {
        match self.stream_type {
            PlaybackType::Aux => {
                self.pcmconfig.format = if mode == HqMode::Uhq {
                    PcmFormat::S24Le
                } else {
                    PcmFormat::S16Le
                };
                self.requested.format = self.pcmconfig.format.to_audio_format();
            }
            PlaybackType::DeepBuffer => {
                self.pcmconfig = match mode {
                    HqMode::Normal => pcm_config::DEEP_PLAYBACK,
                    HqMode::Uhq => pcm_config::DEEP_PLAYBACK_UHQA,
                    HqMode::WideRes => pcm_config::DEEP_PLAYBACK_WIDE_RES,
                    HqMode::Suhq => pcm_config::DEEP_PLAYBACK_SUHQA,
                };
                self.requested.format = self.pcmconfig.format.to_audio_format();
                self.requested.sample_rate = self.pcmconfig.rate;
            }
            _ => return,
        }
        self.need_update_pcm_config = true;
        info!("{:?} playback switched to {mode:?}: {:?}", self.stream_type, self.pcmconfig);
    }

    pub fn set_uhqa_stream_config(&mut self, enable: bool) {
        self.uhqa_stream_config = enable;
    }

    pub fn uhqa_stream_config(&self) -> bool {
        self.uhqa_stream_config
    }

    /// Reports this stream's config to the USB pick. Offload streams report a
    /// stand-in chosen from the DSP upscale factor.
    pub fn select_best_pcmconfig(&self, upscale_factor: u32) -> bool {
        let config = if self.stream_type == PlaybackType::Compress {
            match upscale_factor {
                2 => pcm_config::DEEP_PLAYBACK,
                1 => pcm_config::DEEP_PLAYBACK_UHQA,
                _ => pcm_config::PRIMARY_PLAYBACK,
            }
        } else {
            self.pcmconfig
        };
        self.proxy.select_best_playback_pcmconfig(&config)
    }

    pub fn get_mmap_position(&mut self) -> Result<MmapPosition, ProxyError> {
        if self.stream_type != PlaybackType::Mmap {
            return Err(ProxyError::NotSupported);
        }
        let pcm = self.pcm.as_mut().ok_or(ProxyError::NotSupported)?;
        let (position_frames, time) = pcm.mmap_hw_ptr()?;
        Ok(MmapPosition {
            position_frames,
            time,
        })
    }

    pub fn pause(&mut self) -> Result<(), ProxyError> {
        let compress = self.compress.as_mut().ok_or(ProxyError::NotSupported)?;
        compress.pause()?;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), ProxyError> {
        let compress = self.compress.as_mut().ok_or(ProxyError::NotSupported)?;
        compress.resume()?;
        Ok(())
    }

    pub fn drain(&mut self) -> Result<(), ProxyError> {
        let compress = self.compress.as_mut().ok_or(ProxyError::NotSupported)?;
        compress.drain()?;
        Ok(())
    }

    pub fn set_nonblock(&mut self, nonblock: bool) -> Result<(), ProxyError> {
        self.nonblock = nonblock;
        if let Some(compress) = self.compress.as_mut() {
            compress.set_nonblock(nonblock)?;
        }
        Ok(())
    }

    pub fn dump(&self) -> serde_json::Value {
        json!({
            "type": self.stream_type,
            "endpoint": self.endpoint,
            "requested": self.requested,
            "pcmconfig": self.pcmconfig,
            "open": self.is_open(),
            "frames": self.frames,
            "channel_padding": self.need_channelpadding,
            "uhqa": self.uhqa_stream_config,
            "mmap": self.mmap,
        })
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        self.close();
        if self.primary_registered {
            self.proxy.release_primary_out();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::{proxy_with, proxy_with_route};
    use crate::hw::memory::{MemoryBackend, MemoryMixer};
    use crate::hw::options::ProxyOptions;
    use crate::types::{AudioUsage, RouteModifier};

    fn stereo16() -> AudioConfig {
        AudioConfig::pcm(48000, channel_mask::OUT_STEREO, audio_format::PCM_16_BIT)
    }

    fn connect_usb(backend: &MemoryBackend, proxy: &DeviceProxy, channels: u32) {
        backend.set_file(
            "/proc/asound/card1/stream0",
            &format!(
                "Playback:\n  Altset 1\n    Format: S24_3LE\n    Channels: {channels}\n    Rates: 48000, 96000\n"
            ),
        );
        proxy
            .set_parameters(&StrParms::parse("connect=16384;card=1;device=0"))
            .unwrap();
    }

    #[test]
    fn primary_position_follows_written_frames() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        let mut stream = PlaybackStream::new(proxy, PlaybackType::Primary, stereo16()).unwrap();
        stream.open(0).unwrap();
        assert!(backend.is_open(endpoint::PRIMARY_PLAYBACK, PcmDirection::Playback));
        assert!(backend.is_open(endpoint::VIRTUAL_PRIMARY_PLAYBACK, PcmDirection::Playback));

        assert_eq!(stream.write(&[0; 960 * 4]).unwrap(), 960 * 4);
        assert_eq!(backend.written_bytes(endpoint::VIRTUAL_PRIMARY_PLAYBACK), 960 * 4);
        assert_eq!(stream.presentation_position().unwrap().frames, 960);

        // three periods still queued in the ring
        backend.set_avail(endpoint::VIRTUAL_PRIMARY_PLAYBACK, 960);
        assert_eq!(stream.presentation_position(), Err(ProxyError::NoData));
        assert_eq!(stream.latency(), 80);
    }

    #[test]
    fn primary_slot_is_released_on_drop() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        let first = PlaybackStream::new(proxy.clone(), PlaybackType::Primary, stereo16()).unwrap();
        assert!(!proxy.register_primary_out());
        drop(first);
        assert!(proxy.register_primary_out());
    }

    #[test]
    fn offload_accepts_only_compressed_formats() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        assert_eq!(
            PlaybackStream::new(proxy.clone(), PlaybackType::Compress, stereo16()).err(),
            Some(ProxyError::NotSupported)
        );

        let mp3 = AudioConfig {
            sample_rate: 44100,
            channel_mask: channel_mask::OUT_STEREO,
            format: audio_format::MP3,
            offload_format: audio_format::MP3,
            bit_rate: 128_000,
        };
        let mut stream = PlaybackStream::new(proxy, PlaybackType::Compress, mp3).unwrap();
        stream.open(0).unwrap();
        assert!(backend.compress_open());
        stream
            .setparam(&StrParms::parse("delay_samples=100;padding_samples=200"))
            .unwrap();
        stream.start().unwrap();
        assert_eq!(stream.write(&[0; 1000]).unwrap(), 1000);
        stream.write(&[0; 500]).unwrap();
        assert_eq!(backend.compress_written(), 1500);
        assert_eq!(
            backend.compress_metadata(),
            vec![GaplessMetadata {
                encoder_delay: 100,
                encoder_padding: 200,
            }]
        );
        assert_eq!(stream.latency(), OFFLOAD_LATENCY_MS);

        backend.set_compress_frames(4410);
        assert_eq!(stream.render_position().unwrap(), 4410);
        assert_eq!(stream.presentation_position().unwrap().frames, 4410);

        stream.close();
        assert!(!backend.compress_open());
    }

    #[test]
    fn offload_positions_count_at_the_codec_rate() {
        let (backend, _service, proxy) = proxy_with(MemoryMixer::default(), ProxyOptions::default());
        proxy.set_parameters(&StrParms::parse("bt_offload_enable=1")).unwrap();
        proxy.set_parameters(&StrParms::parse("A2dpDelayReport=100")).unwrap();
        proxy.set_route(
            AudioUsage::Media,
            AudioDevice::BtA2dpHeadphone,
            RouteModifier::None,
            true,
        );
        assert_eq!(proxy.a2dp_latency_ms(), Some(100));

        let mp3 = AudioConfig {
            sample_rate: 44100,
            channel_mask: channel_mask::OUT_STEREO,
            format: audio_format::MP3,
            offload_format: audio_format::MP3,
            bit_rate: 128_000,
        };
        let mut stream = PlaybackStream::new(proxy, PlaybackType::Compress, mp3).unwrap();
        stream.open(0).unwrap();
        // the memory backend stamps every timestamp at 48 kHz
        backend.set_compress_frames(10_000);
        assert_eq!(stream.render_position().unwrap(), 10_000 - 4410);
        assert_eq!(stream.presentation_position().unwrap().frames, 10_000 - 4410);
    }

    #[test]
    fn direct_needs_a_usb_output() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        let surround = AudioConfig::pcm(48000, channel_mask::OUT_5POINT1, audio_format::PCM_16_BIT);
        assert_eq!(
            PlaybackStream::new(proxy.clone(), PlaybackType::Direct, surround).err(),
            Some(ProxyError::NotSupported)
        );

        connect_usb(&backend, &proxy, 2);
        assert_eq!(
            PlaybackStream::new(proxy.clone(), PlaybackType::Direct, surround).err(),
            Some(ProxyError::NotSupported)
        );
    }

    #[test]
    fn direct_five_one_is_padded_to_eight_channels() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        connect_usb(&backend, &proxy, 8);

        let bad_rate = AudioConfig::pcm(22050, channel_mask::OUT_5POINT1, audio_format::PCM_16_BIT);
        assert!(matches!(
            PlaybackStream::new(proxy.clone(), PlaybackType::Direct, bad_rate),
            Err(ProxyError::Invalid(_))
        ));

        let surround = AudioConfig::pcm(96000, channel_mask::OUT_5POINT1, audio_format::PCM_16_BIT);
        let mut stream = PlaybackStream::new(proxy, PlaybackType::Direct, surround).unwrap();
        assert!(stream.needs_channel_padding());
        assert_eq!(stream.pcmconfig().channels, 8);
        assert_eq!(stream.pcmconfig().period_size, 960);
        assert_eq!(stream.pcmconfig().format, PcmFormat::S16Le);

        stream.open(0).unwrap();
        // 100 frames of six 16-bit samples
        assert_eq!(stream.write(&[1; 1200]).unwrap(), 1200);
        assert_eq!(backend.written_bytes(endpoint::DIRECT_PLAYBACK), 100 * 8 * 2);
        assert_eq!(stream.frames_written(), 100);
    }

    #[test]
    fn six_one_runs_seven_channels_unpadded() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        connect_usb(&backend, &proxy, 8);
        let config = AudioConfig::pcm(48000, channel_mask::OUT_6POINT1, audio_format::PCM_32_BIT);
        let stream = PlaybackStream::new(proxy, PlaybackType::Direct, config).unwrap();
        assert!(!stream.needs_channel_padding());
        assert_eq!(stream.pcmconfig().channels, 7);
        assert_eq!(stream.pcmconfig().format, PcmFormat::S32Le);
    }

    #[test]
    fn mmap_open_sizes_the_ring_and_reports_position() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        let mut stream = PlaybackStream::new(proxy, PlaybackType::Mmap, stereo16()).unwrap();
        assert_eq!(stream.get_mmap_position(), Err(ProxyError::NotSupported));

        stream.open(48 * 40).unwrap();
        let opened = backend.opens().pop().unwrap();
        assert_eq!(opened.flags, OpenFlags::MMAP);
        assert_eq!(opened.config.period_count, 64);

        let info = stream.mmap_buffer().unwrap();
        assert!(!info.exclusive);
        assert_eq!(info.buffer_size_frames, 48 * 64);
        stream.start().unwrap();
        assert_eq!(stream.get_mmap_position().unwrap().position_frames, 48);
    }

    #[test]
    fn non_aux_stream_is_paced_while_dp_is_routed() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        proxy.set_route(AudioUsage::Media, AudioDevice::AuxDigital, RouteModifier::None, true);
        let mut stream = PlaybackStream::new(proxy, PlaybackType::DeepBuffer, stereo16()).unwrap();
        stream.open(0).unwrap();

        // 96 frames of 24-bit stereo in 32-bit containers
        assert_eq!(stream.write(&[0; 96 * 8]).unwrap(), 96 * 8);
        assert_eq!(backend.written_bytes(endpoint::DEEP_PLAYBACK), 0);
        assert_eq!(stream.frames_written(), 96);
    }

    #[test]
    fn aux_takes_the_requested_rate_and_channels() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        let config = AudioConfig::pcm(96000, channel_mask::OUT_5POINT1, audio_format::PCM_8_24_BIT);
        let mut stream = PlaybackStream::new(proxy, PlaybackType::Aux, config).unwrap();
        assert_eq!(stream.pcmconfig().rate, 96000);
        assert_eq!(stream.pcmconfig().period_size, 1920);
        assert_eq!(stream.pcmconfig().channels, 6);
        assert_eq!(stream.pcmconfig().format, PcmFormat::S24Le);

        stream.update_uhqa(HqMode::Normal);
        assert_eq!(stream.pcmconfig().format, PcmFormat::S16Le);
        assert_eq!(stream.requested().format, audio_format::PCM_16_BIT);
        assert!(stream.needs_pcm_config_update());
    }

    #[test]
    fn deep_buffer_switches_to_uhqa_template() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        let mut stream = PlaybackStream::new(proxy, PlaybackType::DeepBuffer, stereo16()).unwrap();
        stream.update_uhqa(HqMode::Uhq);
        assert_eq!(*stream.pcmconfig(), pcm_config::DEEP_PLAYBACK_UHQA);
        assert_eq!(stream.requested().sample_rate, pcm_config::UHQA_MEDIA_RATE);
        stream.update_uhqa(HqMode::Normal);
        assert_eq!(*stream.pcmconfig(), pcm_config::DEEP_PLAYBACK);
    }

    #[test]
    fn a2dp_latency_holds_back_the_position() {
        let (_backend, _service, proxy) = proxy_with(MemoryMixer::default(), ProxyOptions::default());
        proxy.set_parameters(&StrParms::parse("bt_offload_enable=1")).unwrap();
        proxy.set_parameters(&StrParms::parse("A2dpDelayReport=100")).unwrap();
        proxy.set_route(
            AudioUsage::Media,
            AudioDevice::BtA2dpHeadphone,
            RouteModifier::None,
            true,
        );
        let latency_frames = u64::from(proxy.a2dp_latency_ms().unwrap()) * 48;
        assert!(latency_frames > 0);

        let mut stream = PlaybackStream::new(proxy, PlaybackType::LowLatency, stereo16()).unwrap();
        stream.open(0).unwrap();
        stream.write(&[0; 96 * 4]).unwrap();
        assert_eq!(stream.presentation_position(), Err(ProxyError::NoData));

        let frames = latency_frames + 480;
        stream.write(&vec![0; frames as usize * 4]).unwrap();
        assert_eq!(stream.presentation_position().unwrap().frames, 96 + 480);
        assert_eq!(stream.update_playback_buffer(384), 0);
    }

    #[test]
    fn getparam_lists_per_type_capabilities() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        let stream = PlaybackStream::new(proxy, PlaybackType::Fast, stereo16()).unwrap();
        let reply = stream.getparam(&StrParms::parse("sup_formats;sup_channels;sup_sampling_rates"));
        assert_eq!(reply.get_str(keys::STREAM_SUP_FORMATS), Some("AUDIO_FORMAT_PCM_16_BIT"));
        assert_eq!(reply.get_str(keys::STREAM_SUP_CHANNELS), Some("AUDIO_CHANNEL_OUT_STEREO"));
        assert_eq!(reply.get_str(keys::STREAM_SUP_SAMPLING_RATES), Some("48000"));
    }

    #[test]
    fn dual_speaker_powers_amp_for_earpiece() {
        let options = ProxyOptions {
            support_dualspk: true,
            ..ProxyOptions::default()
        };
        let (backend, _service, proxy) = proxy_with(MemoryMixer::default(), options);
        proxy.set_route(AudioUsage::Media, AudioDevice::Earpiece, RouteModifier::None, true);
        let mut stream = PlaybackStream::new(proxy, PlaybackType::LowLatency, stereo16()).unwrap();
        stream.open(0).unwrap();
        assert_eq!(backend.mixer().value(controls::SPK_AMPL_POWER), Some(1));
    }
}
