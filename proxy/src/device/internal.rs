//! Internal PCM nodes the DSP needs next to the routed path: loopback and
//! reference captures, amplifier and BT feeds, voice call and FM radio.

use super::{DeviceProxy, RouteState, controls, lock};
use crate::hw::options::ProxyOptions;
use crate::hw::{OpenFlags, PcmDirection};
use crate::pcm_config::{
    self, ABOX_SUPPORTED_MAX_CHANNELS, ABOX_UNSUPPORTED_CHANNELS, DEFAULT_MEDIA_CHANNELS,
    DEFAULT_MEDIA_FORMAT, DEFAULT_MEDIA_RATE, PcmConfig, PcmEndpoint, endpoint,
    period_for_duration,
};
use crate::types::{AudioDevice, AudioUsage, PcmFormat};
use crate::usb::best_match::UsbConfig;
use serde::Serialize;
use tracing::{error, info};

const USB_LOOPBACK_DURATION_MS: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum InternalNode {
    ErapIn,
    VoiceTxDirect,
    UsbOutLoopback,
    UsbInLoopback,
    SpkampReference,
    SpkampPlayback,
    BtscoPlayback,
    Bta2dpOutLoopback,
    Bta2dpPlayback,
    A2dpMutePlayback,
    VoiceRx,
    VoiceTx,
    FmPlayback,
    FmCapture,
}

impl InternalNode {
    pub fn name(self) -> &'static str {
        match self {
            Self::ErapIn => "ERAP In",
            Self::VoiceTxDirect => "Voice TX Direct",
            Self::UsbOutLoopback => "USB Out Loopback",
            Self::UsbInLoopback => "USB In Loopback",
            Self::SpkampReference => "SPKAMP Reference",
            Self::SpkampPlayback => "SPKAMP Playback",
            Self::BtscoPlayback => "BT SCO Playback",
            Self::Bta2dpOutLoopback => "BT A2DP Out Loopback",
            Self::Bta2dpPlayback => "BT A2DP Playback",
            Self::A2dpMutePlayback => "A2DP Mute Playback",
            Self::VoiceRx => "Voice Call RX",
            Self::VoiceTx => "Voice Call TX",
            Self::FmPlayback => "FM Radio Playback",
            Self::FmCapture => "FM Radio Capture",
        }
    }

    pub fn endpoint(self) -> PcmEndpoint {
        match self {
            Self::ErapIn => endpoint::ERAP_IN,
            Self::VoiceTxDirect => endpoint::VC_FMRADIO_CAPTURE,
            Self::UsbOutLoopback => endpoint::USB_OUT_LOOPBACK,
            Self::UsbInLoopback => endpoint::USB_IN_LOOPBACK,
            Self::SpkampReference => endpoint::SPKAMP_REFERENCE,
            Self::SpkampPlayback => endpoint::SPKAMP_PLAYBACK,
            Self::BtscoPlayback => endpoint::BTSCO_PLAYBACK,
            Self::Bta2dpOutLoopback => endpoint::BTA2DP_OUT_LOOPBACK,
            Self::Bta2dpPlayback => endpoint::BTA2DP_PLAYBACK,
            Self::A2dpMutePlayback => endpoint::A2DP_MUTE_PLAYBACK,
            Self::VoiceRx => endpoint::VOICE_RX,
            Self::VoiceTx => endpoint::VOICE_TX,
            Self::FmPlayback => endpoint::FM_PLAYBACK,
            Self::FmCapture => endpoint::VC_FMRADIO_CAPTURE,
        }
    }

    pub fn direction(self) -> PcmDirection {
        match self {
            Self::ErapIn
            | Self::VoiceTxDirect
            | Self::UsbOutLoopback
            | Self::SpkampReference
            | Self::Bta2dpOutLoopback
            | Self::VoiceTx
            | Self::FmCapture => PcmDirection::Capture,
            _ => PcmDirection::Playback,
        }
    }

    /// Whether the board has the DMA this node runs on.
    pub fn supported(self, options: &ProxyOptions) -> bool {
        match self {
            Self::ErapIn => options.support_out_loopback,
            Self::UsbOutLoopback => options.support_usb_out_loopback,
            Self::UsbInLoopback => options.support_usb_in_loopback,
            Self::SpkampReference | Self::SpkampPlayback => options.support_spkamp,
            Self::BtscoPlayback => options.support_btsco,
            Self::Bta2dpOutLoopback | Self::Bta2dpPlayback | Self::A2dpMutePlayback => {
                options.support_bta2dp
            }
            Self::VoiceTxDirect | Self::VoiceRx | Self::VoiceTx | Self::FmPlayback | Self::FmCapture => {
                true
            }
        }
    }
}

fn dsp_channels(channels: u32) -> u32 {
    if channels == ABOX_UNSUPPORTED_CHANNELS {
        ABOX_SUPPORTED_MAX_CHANNELS
    } else {
        channels
    }
}

/// USB loopbacks run at the connected device's rate and width, with the
/// packed 24-bit format widened to what the DMA can carry.
pub(crate) fn usb_loopback_config(base: PcmConfig, usb: UsbConfig) -> PcmConfig {
    let format = match usb.format {
        PcmFormat::S24_3Le => PcmFormat::S24Le,
        f => f,
    };
    PcmConfig {
        channels: dsp_channels(usb.channels),
        rate: usb.rate,
        period_size: period_for_duration(usb.rate, USB_LOOPBACK_DURATION_MS),
        format,
        ..base
    }
}

impl DeviceProxy {
    fn node_config(&self, st: &RouteState, node: InternalNode, target: AudioDevice) -> PcmConfig {
        let quad = self.options.support_quad_mic;
        match node {
            InternalNode::ErapIn => {
                let mut config = pcm_config::ERAP_IN;
                if target == AudioDevice::SpeakerAndUsbHeadset {
                    config.channels = dsp_channels(self.usb.playback_config().channels);
                    info!("ERAP In USB device channels updated as CC({})", config.channels);
                } else if quad && matches!(target, AudioDevice::CallFwd | AudioDevice::Spectro) {
                    config.channels = 4;
                }
                config
            }
            InternalNode::VoiceTxDirect if quad && target.is_quad_mic(st.capture.usage) => {
                pcm_config::VC_QUAD_MIC_CAPTURE
            }
            InternalNode::VoiceTxDirect => pcm_config::VC_FMRADIO_CAPTURE,
            InternalNode::UsbOutLoopback => {
                usb_loopback_config(pcm_config::USB_OUT_LOOPBACK, self.usb.playback_config())
            }
            InternalNode::UsbInLoopback => {
                usb_loopback_config(pcm_config::USB_IN_LOOPBACK, self.usb.capture_config())
            }
            InternalNode::SpkampReference => pcm_config::SPKAMP_REFERENCE,
            InternalNode::SpkampPlayback => pcm_config::SPKAMP_PLAYBACK,
            InternalNode::BtscoPlayback => pcm_config::BTSCO_PLAYBACK,
            InternalNode::Bta2dpOutLoopback => pcm_config::BTA2DP_OUT_LOOPBACK,
            InternalNode::Bta2dpPlayback => pcm_config::BTA2DP_PLAYBACK,
            InternalNode::A2dpMutePlayback => pcm_config::A2DP_MUTE_PLAYBACK,
            InternalNode::VoiceRx => pcm_config::VOICE_RX_PLAYBACK,
            InternalNode::VoiceTx if quad && st.capture.device.is_quad_mic(st.capture.usage) => {
                pcm_config::QUAD_MIC_VOICE_TX_CAPTURE
            }
            InternalNode::VoiceTx => pcm_config::VOICE_TX_CAPTURE,
            InternalNode::FmPlayback => pcm_config::FM_PLAYBACK,
            InternalNode::FmCapture => pcm_config::VC_FMRADIO_CAPTURE,
        }
    }

    /// Opens and starts `node` unless the board lacks it or it is already running.
    pub(super) fn enable_node(&self, st: &mut RouteState, node: InternalNode, target: AudioDevice) {
        if !node.supported(&self.options) || st.nodes.contains_key(&node) {
            return;
        }
        let config = self.node_config(st, node, target);
        let ep = node.endpoint();
        let opened = self
            .backend
            .open_pcm(ep.card, ep.device, node.direction(), OpenFlags::MONOTONIC, &config)
            .and_then(|mut pcm| pcm.start().map(|()| pcm));
        match opened {
            Ok(pcm) => {
                st.nodes.insert(node, pcm);
                info!(
                    "{} PCM Device({ep}) with SR({}) PF({:?}) CC({}) is opened & started",
                    node.name(),
                    config.rate,
                    config.format,
                    config.channels
                );
            }
            Err(e) => error!(
                "{} PCM Device({ep}) with SR({}) CC({}) cannot be started: {e}",
                node.name(),
                config.rate,
                config.channels
            ),
        }
    }

    pub(super) fn disable_node(&self, st: &mut RouteState, node: InternalNode) {
        if let Some(mut pcm) = st.nodes.remove(&node) {
            if let Err(e) = pcm.stop() {
                error!("{} stop failed: {e}", node.name());
            }
            drop(pcm);
            info!("{} PCM Device({}) is stopped & closed", node.name(), node.endpoint());
        }
    }

    fn enable_usb_mic_path(&self, st: &mut RouteState, target: AudioDevice) {
        if self.is_usb_single_clksrc() {
            self.usb.capture_prepare(true, true);
        }
        self.usb.open_in_proxy();
        self.enable_node(st, InternalNode::UsbInLoopback, target);
    }

    fn disable_usb_mic_path(&self, st: &mut RouteState) {
        self.disable_node(st, InternalNode::UsbInLoopback);
        self.usb.close_in_proxy();
    }

    /// The routed usage decides which reference captures a call or
    /// loopback path needs next to the device itself.
    fn needs_call_reference(st: &RouteState, usage: AudioUsage) -> bool {
        st.playback.usage.is_cp_call() || st.playback.usage.is_ap_call() || usage.is_loopback()
    }

    fn speaker_feeds_erap(&self, usage: AudioUsage, target: AudioDevice) -> bool {
        !self.options.direct_rcvspk || target.is_speaker_dualpath() || usage.is_fm()
    }

    pub(super) fn enable_internal_path(&self, st: &mut RouteState, usage: AudioUsage, target: AudioDevice) {
        if st.skip_internal_path {
            info!("skip enabling internal path");
            return;
        }
        use AudioDevice as D;
        use InternalNode as N;

        match target {
            D::Earpiece
            | D::Speaker
            | D::Speaker2
            | D::SpeakerDual
            | D::SpeakerDex
            | D::SpeakerAndHeadset
            | D::SpeakerAndHeadphone => {
                if self.speaker_feeds_erap(usage, target) {
                    self.enable_node(st, N::SpkampPlayback, target);
                    self.enable_node(st, N::ErapIn, target);
                }
                self.enable_node(st, N::SpkampReference, target);
            }
            D::BtA2dpHeadphone | D::SpeakerAndBtA2dpHeadphone => {
                {
                    let mut a2dp = lock(&self.a2dp);
                    self.bta2dp_playback_start(&mut a2dp);
                }
                if target == D::SpeakerAndBtA2dpHeadphone {
                    self.enable_node(st, N::ErapIn, target);
                    self.enable_node(st, N::SpkampReference, target);
                    self.enable_node(st, N::SpkampPlayback, target);
                }
                self.enable_node(st, N::Bta2dpPlayback, target);
                self.enable_node(st, N::Bta2dpOutLoopback, target);
                self.enable_node(st, N::A2dpMutePlayback, target);
            }
            D::BtHeadset | D::SpeakerAndBtHeadset => {
                self.enable_node(st, N::ErapIn, target);
                if target == D::SpeakerAndBtHeadset {
                    self.enable_node(st, N::SpkampReference, target);
                    self.enable_node(st, N::SpkampPlayback, target);
                }
                self.enable_node(st, N::BtscoPlayback, target);
            }
            D::Headset | D::Headphone | D::CallFwd | D::Spectro | D::HearingAid => {
                if Self::needs_call_reference(st, usage) {
                    self.enable_node(st, N::ErapIn, target);
                }
            }
            D::UsbHeadset | D::SpeakerAndUsbHeadset => {
                // CP calls run the USB device at a fixed configuration
                let prepared = self.usb.is_playback_cpcall_prepared();
                if usage.is_cp_call() && !prepared {
                    self.usb.playback_prepare(false);
                } else if !usage.is_cp_call() && prepared {
                    self.usb.playback_prepare(true);
                }
                self.usb.open_out_proxy();
                self.set_usb_playback_modifier();

                if target == D::SpeakerAndUsbHeadset {
                    self.enable_node(st, N::SpkampPlayback, target);
                    self.enable_node(st, N::SpkampReference, target);
                }
                if target == D::SpeakerAndUsbHeadset || Self::needs_call_reference(st, usage) {
                    self.enable_node(st, N::ErapIn, target);
                }
                self.enable_node(st, N::UsbOutLoopback, target);
            }
            D::UsbHeadsetMic => self.enable_usb_mic_path(st, target),
            _ => {}
        }

        if (usage.is_cp_call() || usage.is_loopback()) && target.is_capture() {
            self.enable_node(st, N::VoiceTxDirect, target);
        }

        // USB mic is not used while the radio plays to a USB headset
        if usage == AudioUsage::UsbFmRadio && target.is_playback() && target != D::UsbHeadset {
            self.enable_usb_mic_path(st, target);
        }
    }

    pub(super) fn disable_internal_path(&self, st: &mut RouteState, usage: AudioUsage, target: AudioDevice) {
        if st.skip_internal_path {
            info!("skip disabling internal path");
            return;
        }
        use AudioDevice as D;
        use InternalNode as N;

        if usage == AudioUsage::UsbFmRadio && target.is_playback() && target != D::UsbHeadset {
            self.disable_usb_mic_path(st);
        }
        if (usage.is_cp_call() || usage.is_loopback()) && target.is_capture() {
            self.disable_node(st, N::VoiceTxDirect);
        }

        match target {
            D::Earpiece
            | D::Speaker
            | D::Speaker2
            | D::SpeakerDual
            | D::SpeakerDex
            | D::SpeakerAndHeadset
            | D::SpeakerAndHeadphone => {
                if self.speaker_feeds_erap(usage, target) {
                    self.disable_node(st, N::ErapIn);
                    self.disable_node(st, N::SpkampPlayback);
                }
                self.disable_node(st, N::SpkampReference);
            }
            D::BtA2dpHeadphone | D::SpeakerAndBtA2dpHeadphone => {
                {
                    let mut a2dp = lock(&self.a2dp);
                    self.bta2dp_playback_stop(&mut a2dp);
                }
                self.disable_node(st, N::A2dpMutePlayback);
                if target == D::SpeakerAndBtA2dpHeadphone {
                    self.disable_node(st, N::SpkampPlayback);
                    self.disable_node(st, N::SpkampReference);
                    self.disable_node(st, N::ErapIn);
                }
                self.disable_node(st, N::Bta2dpOutLoopback);
                self.disable_node(st, N::Bta2dpPlayback);
            }
            D::BtHeadset | D::SpeakerAndBtHeadset => {
                self.disable_node(st, N::BtscoPlayback);
                if target == D::SpeakerAndBtHeadset {
                    self.disable_node(st, N::SpkampPlayback);
                    self.disable_node(st, N::SpkampReference);
                }
                self.disable_node(st, N::ErapIn);
                self.reset_playback_modifier();
            }
            D::Headset | D::Headphone | D::CallFwd | D::Spectro | D::HearingAid => {
                if Self::needs_call_reference(st, usage) {
                    self.disable_node(st, N::ErapIn);
                }
            }
            D::UsbHeadset | D::SpeakerAndUsbHeadset => {
                if target == D::SpeakerAndUsbHeadset || Self::needs_call_reference(st, usage) {
                    self.disable_node(st, N::ErapIn);
                }
                if target == D::SpeakerAndUsbHeadset {
                    self.disable_node(st, N::SpkampPlayback);
                    self.disable_node(st, N::SpkampReference);
                }
                self.disable_node(st, N::UsbOutLoopback);
                self.usb.close_out_proxy();
                self.reset_playback_modifier();
            }
            D::UsbHeadsetMic => self.disable_usb_mic_path(st),
            _ => {}
        }
    }

    /// Pushes the USB device's running configuration to the SIFS0 mixer.
    pub(super) fn set_usb_playback_modifier(&self) {
        let usb = self.usb.playback_config();
        self.write_playback_modifier(dsp_channels(usb.channels), usb.rate, self.usb.playback_bitwidth());
    }

    pub(super) fn reset_playback_modifier(&self) {
        self.write_playback_modifier(
            DEFAULT_MEDIA_CHANNELS,
            DEFAULT_MEDIA_RATE,
            DEFAULT_MEDIA_FORMAT.bit_width(),
        );
    }

    fn write_playback_modifier(&self, channels: u32, rate: u32, width: u32) {
        let mixer = self.mixer_read();
        mixer.set_int(controls::SIFS0_RATE, i64::from(rate));
        mixer.set_int(controls::SIFS0_CHANNEL, i64::from(channels));
        mixer.set_int(controls::SIFS0_WIDTH, i64::from(width));
        // toggling the switch reconfigures every running DMA ASRC
        if self.options.direct_rcvspk {
            mixer.set_int(controls::SIFS0_SWITCH, controls::MIXER_OFF);
            mixer.set_int(controls::SIFS0_SWITCH, controls::MIXER_ON);
        }
        info!("playback modifier configured SR({rate}) CH({channels}) BW({width})");
    }

    pub fn start_voice_call(&self) {
        let mut st = self.state();
        let target = st.playback.device;
        self.enable_node(&mut st, InternalNode::VoiceRx, target);
        // voice TX shares its DMA with FM radio capture
        if st.nodes.contains_key(&InternalNode::FmPlayback) && st.nodes.contains_key(&InternalNode::FmCapture) {
            self.stop_fm_nodes(&mut st);
        }
        self.enable_node(&mut st, InternalNode::VoiceTx, target);
    }

    pub fn stop_voice_call(&self) {
        let mut st = self.state();
        self.disable_node(&mut st, InternalNode::VoiceRx);
        self.disable_node(&mut st, InternalNode::VoiceTx);
    }

    pub fn start_fm_radio(&self) {
        let mut st = self.state();
        self.start_fm_nodes(&mut st);
    }

    pub fn stop_fm_radio(&self) {
        let mut st = self.state();
        self.stop_fm_nodes(&mut st);
    }

    pub(super) fn start_fm_nodes(&self, st: &mut RouteState) {
        let target = st.playback.device;
        self.enable_node(st, InternalNode::FmPlayback, target);
        self.enable_node(st, InternalNode::FmCapture, target);
    }

    pub(super) fn stop_fm_nodes(&self, st: &mut RouteState) {
        self.disable_node(st, InternalNode::FmPlayback);
        self.disable_node(st, InternalNode::FmCapture);
    }

    /// Folds a playback stream's configuration into the USB pick.
    /// Returns whether the picked configuration changed.
    pub fn select_best_playback_pcmconfig(&self, config: &PcmConfig) -> bool {
        self.usb.pick_best(config)
    }

    /// Reopens the USB output at the picked configuration when it differs
    /// from what the device runs now.
    pub fn set_best_playback_pcmconfig(&self) {
        let mut st = self.state();
        let reconfig = self.usb.reconfig_needed();
        if !st.playback.device.is_usb_out()
            || self.is_usb_single_clksrc()
            || st.playback.usage.is_cp_call()
            || !reconfig
        {
            return;
        }
        let target = st.playback.device;
        self.disable_node(&mut st, InternalNode::UsbOutLoopback);
        self.usb.close_out_proxy();

        self.usb.playback_prepare(true);
        self.set_usb_playback_modifier();

        self.usb.open_out_proxy();
        self.enable_node(&mut st, InternalNode::UsbOutLoopback, target);
        info!("USB device re-configured to {:?}", self.usb.playback_config());
    }

    pub fn reset_playback_pcmconfig(&self) {
        self.usb.reset_config();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::{proxy_with, proxy_with_route};
    use crate::hw::memory::MemoryMixer;
    use crate::types::RouteModifier;

    #[test]
    fn usb_loopback_widens_packed_24_and_six_channels() {
        let usb = UsbConfig {
            format: PcmFormat::S24_3Le,
            channels: 6,
            rate: 96000,
        };
        let config = usb_loopback_config(pcm_config::USB_OUT_LOOPBACK, usb);
        assert_eq!(config.format, PcmFormat::S24Le);
        assert_eq!(config.channels, 8);
        assert_eq!(config.rate, 96000);
        assert_eq!(config.period_size, 960);
        assert_eq!(config.start_threshold, pcm_config::USB_OUT_LOOPBACK.start_threshold);
    }

    #[test]
    fn unsupported_nodes_stay_closed() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        proxy.set_route(AudioUsage::Media, AudioDevice::Speaker, RouteModifier::None, true);
        // spkamp is off by default, only ERAP In runs
        assert_eq!(proxy.open_nodes(), vec![InternalNode::ErapIn]);
        assert!(!backend.is_open(endpoint::SPKAMP_REFERENCE, PcmDirection::Capture));
    }

    #[test]
    fn speaker_opens_amp_feeds_when_supported() {
        let options = ProxyOptions {
            support_spkamp: true,
            ..ProxyOptions::default()
        };
        let (backend, _service, proxy) = proxy_with(MemoryMixer::default(), options);
        proxy.set_route(AudioUsage::Media, AudioDevice::Speaker, RouteModifier::None, true);
        assert_eq!(
            proxy.open_nodes(),
            vec![InternalNode::ErapIn, InternalNode::SpkampReference, InternalNode::SpkampPlayback]
        );
        let opens: Vec<PcmEndpoint> = backend.opens().iter().map(|o| o.endpoint).collect();
        assert_eq!(
            opens,
            vec![endpoint::SPKAMP_PLAYBACK, endpoint::ERAP_IN, endpoint::SPKAMP_REFERENCE]
        );

        proxy.set_route(AudioUsage::Media, AudioDevice::Speaker, RouteModifier::None, false);
        assert!(proxy.open_nodes().is_empty());
        assert_eq!(backend.live_count(), 0);
    }

    #[test]
    fn direct_receiver_path_skips_erap_for_single_speaker() {
        let options = ProxyOptions {
            support_spkamp: true,
            direct_rcvspk: true,
            ..ProxyOptions::default()
        };
        let (_backend, _service, proxy) = proxy_with(MemoryMixer::default(), options);
        proxy.set_route(AudioUsage::Media, AudioDevice::Earpiece, RouteModifier::None, true);
        assert_eq!(proxy.open_nodes(), vec![InternalNode::SpkampReference]);
    }

    #[test]
    fn headset_needs_erap_only_for_calls() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        proxy.set_route(AudioUsage::Media, AudioDevice::Headset, RouteModifier::None, true);
        assert!(proxy.open_nodes().is_empty());
        proxy.set_route(AudioUsage::Media, AudioDevice::Headset, RouteModifier::None, false);

        proxy.set_route(AudioUsage::ApCallWb, AudioDevice::Headset, RouteModifier::None, true);
        assert_eq!(proxy.open_nodes(), vec![InternalNode::ErapIn]);
    }

    #[test]
    fn cp_call_mic_opens_direct_voice_tx() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        proxy.set_route(AudioUsage::CpCallNb, AudioDevice::MainMic, RouteModifier::None, true);
        assert!(proxy.is_node_open(InternalNode::VoiceTxDirect));
        let record = backend.opens().pop().unwrap();
        assert_eq!(record.endpoint, endpoint::VC_FMRADIO_CAPTURE);
        assert_eq!(record.direction, PcmDirection::Capture);
        assert!(record.flags.monotonic);

        proxy.set_route(AudioUsage::CpCallNb, AudioDevice::MainMic, RouteModifier::None, false);
        assert!(!proxy.is_node_open(InternalNode::VoiceTxDirect));
    }

    #[test]
    fn quad_mic_voice_tx_uses_four_channels() {
        let options = ProxyOptions {
            support_quad_mic: true,
            ..ProxyOptions::default()
        };
        let (backend, _service, proxy) = proxy_with(MemoryMixer::default(), options);
        proxy.set_route(AudioUsage::CpCallWb, AudioDevice::QuadMic, RouteModifier::None, true);
        proxy.start_voice_call();
        let tx = backend
            .opens()
            .into_iter()
            .find(|o| o.endpoint == endpoint::VOICE_TX)
            .unwrap();
        assert_eq!(tx.config.channels, 4);
        let direct = backend
            .opens()
            .into_iter()
            .find(|o| o.endpoint == endpoint::VC_FMRADIO_CAPTURE)
            .unwrap();
        assert_eq!(direct.config, pcm_config::VC_QUAD_MIC_CAPTURE);
    }

    #[test]
    fn failed_open_leaves_node_closed() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        backend.fail_open(endpoint::ERAP_IN);
        proxy.set_route(AudioUsage::CpCallNb, AudioDevice::Headset, RouteModifier::None, true);
        assert!(!proxy.is_node_open(InternalNode::ErapIn));
        assert_eq!(proxy.active_playback().device, AudioDevice::Headset);

        backend.clear_failures();
        proxy.set_route(AudioUsage::CpCallNb, AudioDevice::Headset, RouteModifier::None, false);
        proxy.set_route(AudioUsage::CpCallNb, AudioDevice::Headset, RouteModifier::None, true);
        assert!(proxy.is_node_open(InternalNode::ErapIn));
    }

    #[test]
    fn voice_call_stops_running_fm_radio() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        proxy.set_route(AudioUsage::FmRadio, AudioDevice::Headphone, RouteModifier::None, true);
        assert!(proxy.is_node_open(InternalNode::FmPlayback));
        assert!(proxy.is_node_open(InternalNode::FmCapture));

        proxy.start_voice_call();
        assert!(!proxy.is_node_open(InternalNode::FmPlayback));
        assert!(!proxy.is_node_open(InternalNode::FmCapture));
        assert!(backend.is_open(endpoint::VOICE_RX, PcmDirection::Playback));
        assert!(backend.is_open(endpoint::VOICE_TX, PcmDirection::Capture));

        proxy.stop_voice_call();
        assert!(!backend.is_open(endpoint::VOICE_RX, PcmDirection::Playback));
        assert!(!backend.is_open(endpoint::VOICE_TX, PcmDirection::Capture));
    }

    #[test]
    fn bt_sco_teardown_resets_playback_modifier() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        proxy.set_route(AudioUsage::CpCallWb, AudioDevice::BtHeadset, RouteModifier::BtScoRxWb, true);
        assert!(proxy.is_node_open(InternalNode::BtscoPlayback));
        assert!(proxy.is_node_open(InternalNode::ErapIn));

        backend.mixer().clear_writes();
        proxy.set_route(AudioUsage::CpCallWb, AudioDevice::BtHeadset, RouteModifier::BtScoRxWb, false);
        assert!(proxy.open_nodes().is_empty());
        assert_eq!(backend.mixer().value(controls::SIFS0_RATE), Some(48000));
        assert_eq!(backend.mixer().value(controls::SIFS0_WIDTH), Some(16));
    }
}
