use super::convert::{adjust_channels, from_f32, select_call_channels, sign_extend_24, to_f32};
use super::mmap::{adjust_mmap_period_count, setup_mmap};
use super::resample::{FrameProvider, StreamResampler};
use super::{AudioConfig, MmapBufferInfo, MmapPosition, Position};
use crate::device::{DeviceProxy, Microphones, controls};
use crate::error::ProxyError;
use crate::hw::{OpenFlags, PcmDevice, PcmDirection};
use crate::params::{StrParms, keys};
use crate::pcm_config::{
    self, DEFAULT_MEDIA_RATE, MMAP_CAPTURE_DURATION_MS, PcmConfig, PcmEndpoint, endpoint,
    period_for_duration,
};
use crate::types::{AudioDevice, AudioUsage, CaptureType, PcmFormat, audio_format, channel_mask};
use crate::usb::UsbDirection;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const SUPPORTED_CAPTURE_RATES: [u32; 1] = [DEFAULT_MEDIA_RATE];
const MEDIA_CAPTURE_DURATION_MS: u32 = 20;
const LOW_CAPTURE_DURATION_MS: u32 = 4;

fn template(stream_type: CaptureType) -> (PcmConfig, PcmEndpoint) {
    match stream_type {
        CaptureType::NoAttribute | CaptureType::Primary => {
            (pcm_config::PRIMARY_CAPTURE, endpoint::PRIMARY_CAPTURE)
        }
        CaptureType::LowLatency => (pcm_config::LOW_CAPTURE, endpoint::LOW_CAPTURE),
        CaptureType::Mmap => (pcm_config::MMAP_CAPTURE, endpoint::MMAP_CAPTURE),
        CaptureType::Call => (pcm_config::CALL_RECORD, endpoint::CALL_RECORD),
        CaptureType::TelephonyRx => (pcm_config::CALL_RECORD, endpoint::TELEPHONY_RX_RECORD),
        CaptureType::FmRadio => (pcm_config::FM_RECORD, endpoint::FM_RECORD),
    }
}

/// Types that read straight from the DMA device without the virtual capture PCM.
fn reads_dma_directly(stream_type: CaptureType) -> bool {
    matches!(
        stream_type,
        CaptureType::LowLatency
            | CaptureType::Call
            | CaptureType::FmRadio
            | CaptureType::Mmap
            | CaptureType::TelephonyRx
    )
}

/// Call recordings carry Rx/Tx in one stereo frame; 24-bit DSP samples come
/// zero padded in 32-bit words.
fn fix_up_capture(buf: &mut [u8], stream_type: CaptureType, usage: AudioUsage, format: PcmFormat) {
    if matches!(stream_type, CaptureType::Call | CaptureType::TelephonyRx)
        && format == PcmFormat::S16Le
    {
        select_call_channels(buf, usage);
    }
    if format == PcmFormat::S24Le {
        sign_extend_24(buf);
    }
}

/// Pulls whole hardware periods for the resampler.
struct PcmFrames<'a> {
    pcm: &'a mut dyn PcmDevice,
    config: PcmConfig,
    stream_type: CaptureType,
    usage: AudioUsage,
}

impl FrameProvider for PcmFrames<'_> {
    fn next_frames(&mut self) -> Result<Vec<f32>, String> {
        let mut buf = vec![0u8; self.config.period_bytes() as usize];
        let read = self.pcm.read(&mut buf)?;
        buf.truncate(read);
        fix_up_capture(&mut buf, self.stream_type, self.usage, self.config.format);
        Ok(to_f32(&buf, self.config.format.bytes_per_sample() as usize))
    }
}

/// One framework input stream.
pub struct CaptureStream {
    proxy: Arc<DeviceProxy>,
    stream_type: CaptureType,
    usage: AudioUsage,
    requested: AudioConfig,
    endpoint: PcmEndpoint,
    pcmconfig: PcmConfig,
    pcm: Option<Box<dyn PcmDevice>>,
    dma_pcm: Option<Box<dyn PcmDevice>>,
    mmap: Option<MmapBufferInfo>,
    frames: u64,
    quad_mic: bool,
    need_channelconversion: bool,
    skip_ch_convert: bool,
    resampler: Option<StreamResampler>,
}

impl CaptureStream {
    pub fn new(
        proxy: Arc<DeviceProxy>,
        stream_type: CaptureType,
        usage: AudioUsage,
        requested: AudioConfig,
    ) -> Result<Self, ProxyError> {
        let (pcmconfig, endpoint) = template(stream_type);
        let mut stream = Self {
            proxy,
            stream_type,
            usage,
            requested,
            endpoint,
            pcmconfig,
            pcm: None,
            dma_pcm: None,
            mmap: None,
            frames: 0,
            quad_mic: false,
            need_channelconversion: false,
            skip_ch_convert: false,
            resampler: None,
        };

        match stream_type {
            CaptureType::NoAttribute => {}
            CaptureType::Primary => {
                stream.select_primary_template();
                stream.update_capture_pcmconfig();
                stream.check_conversion()?;
            }
            CaptureType::LowLatency => {
                stream.update_capture_pcmconfig();
                stream.check_conversion()?;
            }
            CaptureType::Mmap => stream.configure_mmap(),
            CaptureType::Call | CaptureType::TelephonyRx | CaptureType::FmRadio => {
                stream.check_conversion()?;
            }
        }

        info!(
            "{:?} capture created on {} with {:?}",
            stream_type, stream.endpoint, stream.pcmconfig
        );
        Ok(stream)
    }

    /// The quad-mic array serves primary capture during calls and camcorder
    /// recording when the routed mic belongs to it.
    fn quad_mic_condition(&self) -> bool {
        if !self.proxy.options().support_quad_mic {
            return false;
        }
        let capture = self.proxy.active_capture();
        if !capture.device.is_quad_mic(capture.usage) {
            return false;
        }
        let cp_call = capture.usage.is_cp_call()
            && !matches!(
                capture.usage,
                AudioUsage::CallForwardingPrimary | AudioUsage::Spectro
            );
        cp_call || capture.usage.is_ap_call() || self.usage == AudioUsage::Camcorder
    }

    fn select_primary_template(&mut self) {
        self.quad_mic = self.quad_mic_condition();
        self.pcmconfig = if self.quad_mic {
            pcm_config::PRIMARY_QUAD_MIC_CAPTURE
        } else {
            pcm_config::PRIMARY_CAPTURE
        };
        self.endpoint = endpoint::PRIMARY_CAPTURE;
    }

    fn configure_mmap(&mut self) {
        let rate = self.requested.sample_rate;
        if rate != 0 && rate != self.pcmconfig.rate {
            self.pcmconfig.rate = rate;
            self.pcmconfig.period_size = period_for_duration(rate, MMAP_CAPTURE_DURATION_MS);
        }
        if self.requested.channel_mask != channel_mask::NONE {
            self.pcmconfig.channels = channel_mask::count(self.requested.channel_mask);
        }
    }

    /// Copies the parts of the request the DSP can run natively.
    fn update_capture_pcmconfig(&mut self) {
        let rate = self.requested.sample_rate;
        if SUPPORTED_CAPTURE_RATES.contains(&rate) && rate != self.pcmconfig.rate {
            let duration = if self.stream_type == CaptureType::LowLatency {
                LOW_CAPTURE_DURATION_MS
            } else {
                MEDIA_CAPTURE_DURATION_MS
            };
            self.pcmconfig.rate = rate;
            self.pcmconfig.period_size = period_for_duration(rate, duration);
        }

        let mask = self.requested.channel_mask;
        if matches!(mask, channel_mask::IN_STEREO | channel_mask::IN_FRONT_BACK) {
            let channels = channel_mask::count(mask);
            if channels != self.pcmconfig.channels {
                if self.quad_mic {
                    debug!("quad mic keeps {} channels", self.pcmconfig.channels);
                } else {
                    self.pcmconfig.channels = channels;
                }
            }
        }

        match self.requested.format {
            audio_format::PCM_16_BIT => self.pcmconfig.format = PcmFormat::S16Le,
            audio_format::PCM_8_24_BIT => self.pcmconfig.format = PcmFormat::S24Le,
            _ => {}
        }
    }

    fn requested_channels(&self) -> u32 {
        match self.requested.channel_mask {
            channel_mask::NONE => self.pcmconfig.channels,
            mask => channel_mask::count(mask),
        }
    }

    /// Decides the downmix and builds a resampler when the request cannot
    /// be served by the hardware configuration directly.
    fn check_conversion(&mut self) -> Result<(), ProxyError> {
        let requested = self.requested_channels();
        let hw = self.pcmconfig.channels;
        self.need_channelconversion = (requested == 1 && hw == 2)
            || (self.quad_mic && matches!(requested, 1 | 2) && hw == 4);
        if self.need_channelconversion {
            info!("capture converts {hw} hw channels to {requested}");
        }

        self.resampler = None;
        let rate = self.requested.sample_rate;
        if rate != 0 && rate != self.pcmconfig.rate {
            let resampler = StreamResampler::new(
                self.pcmconfig.rate,
                rate,
                hw as usize,
                self.pcmconfig.period_size as usize,
            )
            .map_err(ProxyError::Invalid)?;
            self.resampler = Some(resampler);
        }
        Ok(())
    }

    pub fn stream_type(&self) -> CaptureType {
        self.stream_type
    }

    pub fn usage(&self) -> AudioUsage {
        self.usage
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

    pub fn frames_read(&self) -> u64 {
        self.frames
    }

    pub fn is_open(&self) -> bool {
        self.pcm.is_some()
    }

    pub fn needs_channel_conversion(&self) -> bool {
        self.need_channelconversion
    }

    pub fn has_resampler(&self) -> bool {
        self.resampler.is_some()
    }

    pub fn mmap_buffer(&self) -> Option<MmapBufferInfo> {
        self.mmap
    }

    pub fn open(&mut self, min_size_frames: u32) -> Result<(), ProxyError> {
        if self.is_open() {
            warn!("{} capture is already opened", self.endpoint);
            return Ok(());
        }

        if self.proxy.active_capture().usage.is_ap_call() && self.pcmconfig.rate != DEFAULT_MEDIA_RATE
        {
            info!("AP call runs capture at {DEFAULT_MEDIA_RATE}");
            self.pcmconfig = pcm_config::PRIMARY_CAPTURE;
            self.endpoint = endpoint::PRIMARY_CAPTURE;
            self.quad_mic = false;
            self.check_conversion()?;
        }

        if let Err(e) = self.open_device(min_size_frames) {
            error!("{:?} capture open failed: {e}", self.stream_type);
            self.close();
            return Err(ProxyError::NoDevice);
        }

        if matches!(self.stream_type, CaptureType::Mmap | CaptureType::LowLatency) {
            self.proxy
                .set_mixer_value_string(controls::CAPTURE_VPCMDAI_INSRC, "None");
        }
        Ok(())
    }

    fn open_device(&mut self, min_size_frames: u32) -> Result<(), String> {
        let backend = self.proxy.backend().clone();
        let ep = self.endpoint;
        let flags = if self.stream_type == CaptureType::Mmap {
            adjust_mmap_period_count(&mut self.pcmconfig, min_size_frames);
            OpenFlags::MMAP
        } else {
            OpenFlags::MONOTONIC
        };
        let mut dma = backend.open_pcm(ep.card, ep.device, PcmDirection::Capture, flags, &self.pcmconfig)?;
        info!("{ep} capture opened with {:?}", self.pcmconfig);

        if reads_dma_directly(self.stream_type) {
            self.pcm = Some(dma);
        } else {
            dma.start()?;
            let virt = endpoint::VIRTUAL_PRIMARY_CAPTURE;
            let pcm = backend.open_pcm(
                virt.card,
                virt.device,
                PcmDirection::Capture,
                flags,
                &self.pcmconfig,
            )?;
            info!("{virt} virtual capture opened");
            self.pcm = Some(pcm);
            self.dma_pcm = Some(dma);
        }

        if self.stream_type == CaptureType::Mmap {
            if let Some(pcm) = self.pcm.as_mut() {
                let info = setup_mmap(backend.as_ref(), pcm.as_mut(), ep, PcmDirection::Capture)?;
                self.mmap = Some(info);
            }
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ProxyError> {
        let pcm = self.pcm.as_mut().ok_or(ProxyError::NoDevice)?;
        pcm.start()?;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), ProxyError> {
        if let Some(pcm) = self.pcm.as_mut() {
            pcm.stop()?;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if self.pcm.take().is_some() {
            info!("{} capture closed", self.endpoint);
        }
        self.dma_pcm = None;
        self.mmap = None;
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// Fills `buffer` with frames in the requested layout. Samples keep the
    /// hardware sample format.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize, ProxyError> {
        let config = self.pcmconfig;
        let bps = config.format.bytes_per_sample() as usize;
        let hw_channels = config.channels as usize;
        let out_channels = if self.skip_ch_convert {
            hw_channels
        } else {
            self.requested_channels() as usize
        };
        let frames_request = buffer.len() / (out_channels * bps).max(1);

        let pcm = self.pcm.as_mut().ok_or(ProxyError::NoDevice)?;
        let captured = match self.resampler.as_mut() {
            Some(resampler) => {
                let mut provider = PcmFrames {
                    pcm: pcm.as_mut(),
                    config,
                    stream_type: self.stream_type,
                    usage: self.usage,
                };
                let samples = resampler.resample(&mut provider, frames_request)?;
                from_f32(&samples, bps)
            }
            None => {
                let mut raw = vec![0u8; frames_request * hw_channels * bps];
                let read = pcm.read(&mut raw)?;
                raw.truncate(read);
                fix_up_capture(&mut raw, self.stream_type, self.usage, config.format);
                raw
            }
        };
        let frames_read = captured.len() / (hw_channels * bps).max(1);

        let converted;
        let data = if self.need_channelconversion && hw_channels != out_channels {
            converted = adjust_channels(&captured, hw_channels, out_channels, bps);
            &converted[..]
        } else {
            &captured[..]
        };
        let len = data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&data[..len]);
        buffer[len..].fill(0);

        self.frames += frames_read as u64;
        Ok(buffer.len())
    }

    /// Moves the stream to a new usage without reopening it. Only primary
    /// and call capture can be retargeted.
    pub fn reconfig_capture_usage(
        &mut self,
        stream_type: CaptureType,
        usage: AudioUsage,
    ) -> Result<(), ProxyError> {
        if usage != AudioUsage::None {
            self.usage = usage;
        }
        match stream_type {
            CaptureType::Primary => {
                self.stream_type = stream_type;
                self.select_primary_template();
                self.update_capture_pcmconfig();
                self.need_channelconversion = false;
                self.resampler = None;
                self.check_conversion()
            }
            CaptureType::Call => {
                self.stream_type = stream_type;
                self.pcmconfig = pcm_config::CALL_RECORD;
                self.endpoint = endpoint::CALL_RECORD;
                self.quad_mic = false;
                self.check_conversion()
            }
            other => Err(ProxyError::Invalid(format!(
                "{other:?} capture cannot be reconfigured"
            ))),
        }
    }

    pub fn update_capture_usage(&mut self, usage: AudioUsage) {
        self.usage = usage;
    }

    /// Frames captured so far including what waits in the ring buffer.
    pub fn capture_position(&mut self) -> Result<Position, ProxyError> {
        let pcm = self.pcm.as_mut().ok_or(ProxyError::NoData)?;
        let (avail, time) = pcm.htimestamp()?;
        Ok(Position {
            frames: self.frames + u64::from(avail),
            time,
        })
    }

    pub fn getparam(&self, query: &StrParms) -> StrParms {
        let mut reply = StrParms::new();
        if self.proxy.usb().is_capture_connected() {
            self.proxy
                .get_usb_parameters(UsbDirection::In, query, &mut reply);
            return reply;
        }
        if query.has_key(keys::STREAM_SUP_FORMATS) {
            reply.add_str(
                keys::STREAM_SUP_FORMATS,
                &format!(
                    "{}|{}",
                    audio_format::name(audio_format::PCM_16_BIT),
                    audio_format::name(audio_format::PCM_8_24_BIT)
                ),
            );
        }
        if query.has_key(keys::STREAM_SUP_CHANNELS) {
            reply.add_str(
                keys::STREAM_SUP_CHANNELS,
                "AUDIO_CHANNEL_IN_MONO|AUDIO_CHANNEL_IN_STEREO",
            );
        }
        if query.has_key(keys::STREAM_SUP_SAMPLING_RATES) {
            reply.add_int(
                keys::STREAM_SUP_SAMPLING_RATES,
                i64::from(self.pcmconfig.rate),
            );
        }
        reply
    }

    pub fn setparam(&mut self, _parms: &StrParms) -> Result<(), ProxyError> {
        Ok(())
    }

    /// Overrides the channel count the stream delivers. With `skip` the
    /// hardware layout is passed through untouched.
    pub fn set_stream_channel(&mut self, channels: u32, skip: bool) {
        if channels > 0 {
            self.pcmconfig.channels = channels;
        }
        self.skip_ch_convert = skip;
        self.need_channelconversion = !skip;
    }

    pub fn get_active_microphones(&self, query_only: bool) -> Result<Microphones, ProxyError> {
        if !matches!(
            self.stream_type,
            CaptureType::NoAttribute | CaptureType::Primary | CaptureType::LowLatency | CaptureType::Mmap
        ) {
            return Err(ProxyError::NotSupported);
        }
        let device = self.proxy.active_capture().device;
        let indices: &[usize] = match device {
            AudioDevice::StereoMic => &[0, 1],
            AudioDevice::MainMic => &[0],
            AudioDevice::SubMic => &[1],
            _ => return Err(ProxyError::NotSupported),
        };
        if query_only {
            return Ok(Microphones::Count(indices.len()));
        }
        let available = self.proxy.microphones();
        Ok(Microphones::List(
            indices
                .iter()
                .filter_map(|i| available.get(*i).cloned())
                .collect(),
        ))
    }

    pub fn get_mmap_position(&mut self) -> Result<MmapPosition, ProxyError> {
        if self.stream_type != CaptureType::Mmap {
            return Err(ProxyError::NotSupported);
        }
        let pcm = self.pcm.as_mut().ok_or(ProxyError::NotSupported)?;
        let (position_frames, time) = pcm.mmap_hw_ptr()?;
        Ok(MmapPosition {
            position_frames,
            time,
        })
    }

    pub fn dump(&self) -> serde_json::Value {
        json!({
            "type": self.stream_type,
            "usage": self.usage,
            "endpoint": self.endpoint,
            "requested": self.requested,
            "pcmconfig": self.pcmconfig,
            "open": self.is_open(),
            "frames": self.frames,
            "quad_mic": self.quad_mic,
            "channel_conversion": self.need_channelconversion,
            "resampler": self.resampler.as_ref().map(|r| (r.from_rate(), r.to_rate())),
            "mmap": self.mmap,
        })
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::{FakeConnector, MIXER_PATHS, proxy_with, proxy_with_route};
    use crate::device::{BoardInfo, MicrophoneInfo};
    use crate::hw::memory::{MemoryBackend, MemoryMixer};
    use crate::hw::options::ProxyOptions;
    use crate::types::RouteModifier;
    use byteorder::{ByteOrder, LittleEndian};
    use std::path::Path;

    fn samples(buf: &[u8]) -> Vec<i16> {
        let mut out = vec![0i16; buf.len() / 2];
        LittleEndian::read_i16_into(buf, &mut out);
        out
    }

    fn config(rate: u32, mask: u32) -> AudioConfig {
        AudioConfig::pcm(rate, mask, audio_format::PCM_16_BIT)
    }

    #[test]
    fn mono_request_keeps_the_left_channel() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        let mut stream = CaptureStream::new(
            proxy,
            CaptureType::Primary,
            AudioUsage::Recording,
            config(48000, channel_mask::IN_MONO),
        )
        .unwrap();
        assert!(stream.needs_channel_conversion());
        assert!(!stream.has_resampler());
        assert_eq!(stream.pcmconfig().channels, 2);

        stream.open(0).unwrap();
        assert!(backend.is_open(endpoint::VIRTUAL_PRIMARY_CAPTURE, PcmDirection::Capture));
        let mut buf = vec![0u8; 240 * 2];
        assert_eq!(stream.read(&mut buf).unwrap(), 480);
        assert!(samples(&buf).iter().all(|s| *s == 100));
        assert_eq!(stream.frames_read(), 240);
    }

    #[test]
    fn stereo_request_passes_through() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        let mut stream = CaptureStream::new(
            proxy,
            CaptureType::Primary,
            AudioUsage::Recording,
            config(48000, channel_mask::IN_STEREO),
        )
        .unwrap();
        assert!(!stream.needs_channel_conversion());
        stream.open(0).unwrap();
        let mut buf = vec![0u8; 8];
        stream.read(&mut buf).unwrap();
        assert_eq!(samples(&buf), vec![100, 200, 100, 200]);
    }

    #[test]
    fn rate_mismatch_builds_a_resampler() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        let mut stream = CaptureStream::new(
            proxy,
            CaptureType::Primary,
            AudioUsage::Recording,
            config(16000, channel_mask::IN_MONO),
        )
        .unwrap();
        assert!(stream.has_resampler());
        assert_eq!(stream.pcmconfig().rate, 48000);

        stream.open(0).unwrap();
        let mut buf = vec![0u8; 160 * 2];
        assert_eq!(stream.read(&mut buf).unwrap(), 320);
        assert_eq!(stream.frames_read(), 160);
    }

    #[test]
    fn call_record_selects_uplink() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        let mut stream = CaptureStream::new(
            proxy,
            CaptureType::Call,
            AudioUsage::IncallUplink,
            config(32000, channel_mask::IN_STEREO),
        )
        .unwrap();
        assert!(!stream.has_resampler());
        stream.open(0).unwrap();
        assert!(backend.is_open(endpoint::CALL_RECORD, PcmDirection::Capture));
        assert!(!backend.is_open(endpoint::VIRTUAL_PRIMARY_CAPTURE, PcmDirection::Capture));

        let mut buf = vec![0u8; 16];
        stream.read(&mut buf).unwrap();
        assert!(samples(&buf).iter().all(|s| *s == 200));

        stream.update_capture_usage(AudioUsage::IncallUplinkDownlink);
        stream.read(&mut buf).unwrap();
        // (100 + 200) * 0.7
        assert!(samples(&buf).iter().all(|s| (209..=210).contains(s)));
    }

    #[test]
    fn low_latency_and_mmap_reset_the_vpcm_input() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        let mut low = CaptureStream::new(
            proxy.clone(),
            CaptureType::LowLatency,
            AudioUsage::Recording,
            config(48000, channel_mask::IN_STEREO),
        )
        .unwrap();
        low.open(0).unwrap();
        assert_eq!(
            backend.mixer().enum_value(controls::CAPTURE_VPCMDAI_INSRC).as_deref(),
            Some("None")
        );
        assert!(!backend.is_open(endpoint::VIRTUAL_PRIMARY_CAPTURE, PcmDirection::Capture));
        low.close();

        let mut mmap = CaptureStream::new(
            proxy,
            CaptureType::Mmap,
            AudioUsage::Recording,
            config(48000, channel_mask::IN_STEREO),
        )
        .unwrap();
        mmap.open(480).unwrap();
        assert!(mmap.mmap_buffer().is_some());
        assert_eq!(backend.opens().pop().unwrap().flags, OpenFlags::MMAP);
        assert!(mmap.get_mmap_position().is_ok());
    }

    #[test]
    fn ap_call_forces_primary_48k() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        proxy.set_route(AudioUsage::Communication, AudioDevice::MainMic, RouteModifier::None, true);
        let mut stream = CaptureStream::new(
            proxy,
            CaptureType::Mmap,
            AudioUsage::Communication,
            config(16000, channel_mask::IN_MONO),
        )
        .unwrap();
        assert_eq!(stream.pcmconfig().rate, 16000);

        stream.open(0).unwrap();
        assert_eq!(stream.pcmconfig().rate, DEFAULT_MEDIA_RATE);
        assert_eq!(stream.endpoint(), endpoint::PRIMARY_CAPTURE);
        assert!(stream.has_resampler());
        let opened = backend.opens().pop().unwrap();
        assert_eq!(opened.config.rate, DEFAULT_MEDIA_RATE);
    }

    #[test]
    fn quad_mic_primary_capture_during_call() {
        let options = ProxyOptions {
            support_quad_mic: true,
            ..ProxyOptions::default()
        };
        let (_backend, _service, proxy) = proxy_with(MemoryMixer::default(), options);
        proxy.set_route(AudioUsage::CpCallWb, AudioDevice::MainMic, RouteModifier::None, true);
        let stream = CaptureStream::new(
            proxy,
            CaptureType::Primary,
            AudioUsage::Recording,
            config(48000, channel_mask::IN_STEREO),
        )
        .unwrap();
        assert_eq!(stream.pcmconfig().channels, 4);
        assert!(stream.needs_channel_conversion());
    }

    #[test]
    fn reconfig_moves_primary_to_call_record() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        let mut stream = CaptureStream::new(
            proxy,
            CaptureType::Primary,
            AudioUsage::Recording,
            config(48000, channel_mask::IN_STEREO),
        )
        .unwrap();
        stream
            .reconfig_capture_usage(CaptureType::Call, AudioUsage::IncallDownlink)
            .unwrap();
        assert_eq!(*stream.pcmconfig(), pcm_config::CALL_RECORD);
        assert_eq!(stream.usage(), AudioUsage::IncallDownlink);
        assert!(stream.has_resampler());
        assert!(
            stream
                .reconfig_capture_usage(CaptureType::FmRadio, AudioUsage::None)
                .is_err()
        );
    }

    #[test]
    fn skip_channel_convert_passes_hardware_layout() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        let mut stream = CaptureStream::new(
            proxy,
            CaptureType::Primary,
            AudioUsage::Recording,
            config(48000, channel_mask::IN_MONO),
        )
        .unwrap();
        stream.set_stream_channel(0, true);
        assert!(!stream.needs_channel_conversion());
        stream.open(0).unwrap();
        let mut buf = vec![0u8; 8];
        stream.read(&mut buf).unwrap();
        assert_eq!(samples(&buf), vec![100, 200, 100, 200]);
    }

    #[test]
    fn capture_position_adds_ring_contents() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        let mut stream = CaptureStream::new(
            proxy,
            CaptureType::LowLatency,
            AudioUsage::Recording,
            config(48000, channel_mask::IN_STEREO),
        )
        .unwrap();
        assert_eq!(stream.capture_position(), Err(ProxyError::NoData));
        stream.open(0).unwrap();
        backend.set_avail(endpoint::LOW_CAPTURE, 32);
        let mut buf = vec![0u8; 192 * 4];
        stream.read(&mut buf).unwrap();
        assert_eq!(stream.capture_position().unwrap().frames, 192 + 32);
    }

    #[test]
    fn active_microphones_follow_the_routed_device() {
        let backend = MemoryBackend::with_mixer(MemoryMixer::default());
        let mics = vec![
            MicrophoneInfo {
                id: 1,
                ..MicrophoneInfo::default()
            },
            MicrophoneInfo {
                id: 2,
                ..MicrophoneInfo::default()
            },
        ];
        let proxy = DeviceProxy::new(
            Arc::new(backend.clone()),
            ProxyOptions::default(),
            Arc::new(FakeConnector(None)),
        )
        .with_board_info(BoardInfo {
            microphones: mics,
            ..BoardInfo::default()
        });
        proxy.init();
        assert!(proxy.init_route(Path::new(MIXER_PATHS)));
        let proxy = Arc::new(proxy);

        let stream = CaptureStream::new(
            proxy.clone(),
            CaptureType::Primary,
            AudioUsage::Recording,
            config(48000, channel_mask::IN_STEREO),
        )
        .unwrap();
        assert_eq!(stream.get_active_microphones(true), Err(ProxyError::NotSupported));

        proxy.set_route(AudioUsage::Recording, AudioDevice::StereoMic, RouteModifier::None, true);
        assert_eq!(stream.get_active_microphones(true), Ok(Microphones::Count(2)));

        proxy.set_route(AudioUsage::Recording, AudioDevice::SubMic, RouteModifier::None, true);
        match stream.get_active_microphones(false).unwrap() {
            Microphones::List(list) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].id, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
