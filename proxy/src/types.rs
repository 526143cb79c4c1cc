use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AudioUsage {
    None,
    Media,
    Ringtone,
    Notification,
    Alarm,
    Communication,
    CpCallNb,
    CpCallWb,
    CpCallSwb,
    CpCallFb,
    CallForwardingPrimary,
    Spectro,
    ApCallNb,
    ApCallWb,
    ApCallSwb,
    Loopback,
    LoopbackPacket,
    LoopbackCodec,
    FmRadio,
    UsbFmRadio,
    Recording,
    Camcorder,
    VoiceRecognition,
    IncallUplink,
    IncallDownlink,
    IncallUplinkDownlink,
}

impl AudioUsage {
    pub fn is_cp_call(self) -> bool {
        matches!(
            self,
            Self::CpCallNb
                | Self::CpCallWb
                | Self::CpCallSwb
                | Self::CpCallFb
                | Self::CallForwardingPrimary
                | Self::Spectro
        )
    }

    pub fn is_ap_call(self) -> bool {
        matches!(
            self,
            Self::Communication | Self::ApCallNb | Self::ApCallWb | Self::ApCallSwb
        )
    }

    pub fn is_call(self) -> bool {
        self.is_cp_call() || self.is_ap_call()
    }

    pub fn is_loopback(self) -> bool {
        matches!(
            self,
            Self::Loopback | Self::LoopbackPacket | Self::LoopbackCodec
        )
    }

    pub fn is_fm(self) -> bool {
        matches!(self, Self::FmRadio | Self::UsbFmRadio)
    }

    pub fn path_name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Media => "media",
            Self::Ringtone => "ringtone",
            Self::Notification => "notification",
            Self::Alarm => "alarm",
            Self::Communication => "communication",
            Self::CpCallNb => "incall_nb",
            Self::CpCallWb => "incall_wb",
            Self::CpCallSwb => "incall_swb",
            Self::CpCallFb => "incall_fb",
            Self::CallForwardingPrimary => "call_forwarding_primary",
            Self::Spectro => "spectro",
            Self::ApCallNb => "wificall_nb",
            Self::ApCallWb => "wificall_wb",
            Self::ApCallSwb => "wificall_swb",
            Self::Loopback => "loopback",
            Self::LoopbackPacket => "loopback_packet",
            Self::LoopbackCodec => "loopback_codec",
            Self::FmRadio => "fm_radio",
            Self::UsbFmRadio => "usb_fm_radio",
            Self::Recording => "recording",
            Self::Camcorder => "camcorder",
            Self::VoiceRecognition => "recognition",
            Self::IncallUplink => "incall_uplink",
            Self::IncallDownlink => "incall_downlink",
            Self::IncallUplinkDownlink => "incall_uplink_downlink",
        }
    }
}

/// Route targets. Every variant before `MainMic` is an output device,
/// `MainMic` and everything after it (except `None`) is an input device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AudioDevice {
    Earpiece,
    Speaker,
    Speaker2,
    SpeakerDual,
    SpeakerDex,
    Headset,
    Headphone,
    BtA2dpHeadphone,
    BtHeadset,
    UsbHeadset,
    AuxDigital,
    CallFwd,
    Spectro,
    HearingAid,
    SpeakerAndHeadset,
    SpeakerAndHeadphone,
    SpeakerAndBtHeadset,
    SpeakerAndBtA2dpHeadphone,
    SpeakerAndUsbHeadset,
    MainMic,
    HandsetMic,
    SubMic,
    StereoMic,
    HeadsetMic,
    HeadphoneMic,
    SpeakerMic,
    SpeakerDexMic,
    BtHeadsetMic,
    UsbHeadsetMic,
    QuadMic,
    None,
}

impl AudioDevice {
    pub fn is_playback(self) -> bool {
        self < Self::MainMic
    }

    pub fn is_capture(self) -> bool {
        self >= Self::MainMic && self != Self::None
    }

    pub fn path_name(self) -> &'static str {
        match self {
            Self::Earpiece => "handset",
            Self::Speaker => "speaker",
            Self::Speaker2 => "speaker2",
            Self::SpeakerDual => "speaker-dual",
            Self::SpeakerDex => "dex-speaker",
            Self::Headset => "headset",
            Self::Headphone => "headphone",
            Self::BtA2dpHeadphone => "bt-a2dp-headphone",
            Self::BtHeadset => "bt-sco-headset",
            Self::UsbHeadset => "usb-headset",
            Self::AuxDigital => "hdmi",
            Self::CallFwd => "call-fwd",
            Self::Spectro => "spectro",
            Self::HearingAid => "hearing-aid",
            Self::SpeakerAndHeadset => "speaker-headset",
            Self::SpeakerAndHeadphone => "speaker-headphone",
            Self::SpeakerAndBtHeadset => "speaker-bt-sco-headset",
            Self::SpeakerAndBtA2dpHeadphone => "speaker-bt-a2dp-headphone",
            Self::SpeakerAndUsbHeadset => "speaker-usb-headset",
            Self::MainMic => "mic",
            Self::HandsetMic => "handset-mic",
            Self::SubMic => "2nd-mic",
            Self::StereoMic => "stereo-mic",
            Self::HeadsetMic => "headset-mic",
            Self::HeadphoneMic => "headphone-mic",
            Self::SpeakerMic => "speaker-mic",
            Self::SpeakerDexMic => "dex-speaker-mic",
            Self::BtHeadsetMic => "bt-sco-headset-mic",
            Self::UsbHeadsetMic => "usb-headset-mic",
            Self::QuadMic => "quad-mic",
            Self::None => "",
        }
    }

    /// Speaker class used to detect a speaker/DeX swap during a call.
    pub fn is_speaker(self) -> bool {
        matches!(
            self,
            Self::Speaker | Self::SpeakerDex | Self::SpeakerMic | Self::SpeakerDexMic
        )
    }

    pub fn is_speaker_dualpath(self) -> bool {
        matches!(
            self,
            Self::SpeakerAndHeadset
                | Self::SpeakerAndHeadphone
                | Self::SpeakerAndBtHeadset
                | Self::SpeakerAndUsbHeadset
                | Self::SpeakerAndBtA2dpHeadphone
        )
    }

    pub fn is_bt_a2dp(self) -> bool {
        matches!(self, Self::BtA2dpHeadphone | Self::SpeakerAndBtA2dpHeadphone)
    }

    pub fn is_bt_sco(self) -> bool {
        matches!(self, Self::BtHeadset | Self::SpeakerAndBtHeadset)
    }

    pub fn is_usb_out(self) -> bool {
        matches!(self, Self::UsbHeadset | Self::SpeakerAndUsbHeadset)
    }

    pub fn is_usb_mic(self) -> bool {
        self == Self::UsbHeadsetMic
    }

    pub fn is_wired_headphone(self) -> bool {
        matches!(
            self,
            Self::Headset | Self::Headphone | Self::SpeakerAndHeadset | Self::SpeakerAndHeadphone
        )
    }

    /// Whether the mic array behind this device captures four channels.
    /// Handset and speaker mics switch to the array during calls.
    pub fn is_quad_mic(self, capture_usage: AudioUsage) -> bool {
        if self == Self::QuadMic {
            return true;
        }
        capture_usage.is_call()
            && matches!(
                self,
                Self::MainMic
                    | Self::HandsetMic
                    | Self::HeadphoneMic
                    | Self::SpeakerMic
                    | Self::SpeakerDexMic
            )
    }
}

/// Secondary control bundles. Modifiers before `BtScoTxNb` belong to playback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RouteModifier {
    BtScoRxNb,
    BtScoRxWb,
    BtScoTxNb,
    BtScoTxWb,
    None,
}

impl RouteModifier {
    pub fn is_playback(self) -> bool {
        self < Self::BtScoTxNb
    }

    pub fn is_capture(self) -> bool {
        self >= Self::BtScoTxNb && self < Self::None
    }

    pub fn path_name(self) -> &'static str {
        match self {
            Self::BtScoRxNb => "set-bt-sco-rx-nb",
            Self::BtScoRxWb => "set-bt-sco-rx-wb",
            Self::BtScoTxNb => "set-bt-sco-tx-nb",
            Self::BtScoTxWb => "set-bt-sco-tx-wb",
            Self::None => "",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PlaybackType {
    NoAttribute,
    Primary,
    Fast,
    LowLatency,
    DeepBuffer,
    Compress,
    Mmap,
    Aux,
    Direct,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CaptureType {
    NoAttribute,
    Primary,
    LowLatency,
    Mmap,
    Call,
    TelephonyRx,
    FmRadio,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AudioMode {
    Normal,
    Ringtone,
    InCall,
    InCommunication,
    CallScreen,
}

impl AudioMode {
    pub fn mixer_value(self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Ringtone => 1,
            Self::InCall => 2,
            Self::InCommunication => 3,
            Self::CallScreen => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum HqMode {
    Normal,
    Uhq,
    WideRes,
    Suhq,
}

/// Kernel sample layouts, listed in increasing fidelity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PcmFormat {
    S8,
    S16Le,
    S24Le,
    S24_3Le,
    S32Le,
}

impl PcmFormat {
    pub fn bytes_per_sample(self) -> u32 {
        match self {
            Self::S8 => 1,
            Self::S16Le => 2,
            Self::S24_3Le => 3,
            Self::S24Le | Self::S32Le => 4,
        }
    }

    pub fn bit_width(self) -> u32 {
        match self {
            Self::S8 => 8,
            Self::S16Le => 16,
            Self::S24Le | Self::S24_3Le => 24,
            Self::S32Le => 32,
        }
    }

    pub fn preference(self) -> u8 {
        match self {
            Self::S8 => 1,
            Self::S16Le => 2,
            Self::S24Le => 3,
            Self::S24_3Le => 4,
            Self::S32Le => 5,
        }
    }

    pub fn is_higher_than(self, other: PcmFormat) -> bool {
        self.preference() > other.preference()
    }

    pub fn to_audio_format(self) -> u32 {
        match self {
            Self::S8 => audio_format::PCM_8_BIT,
            Self::S16Le => audio_format::PCM_16_BIT,
            Self::S24Le => audio_format::PCM_8_24_BIT,
            Self::S24_3Le => audio_format::PCM_24_BIT_PACKED,
            Self::S32Le => audio_format::PCM_32_BIT,
        }
    }

    pub fn from_audio_format(format: u32) -> Option<Self> {
        match format {
            audio_format::PCM_8_BIT => Some(Self::S8),
            audio_format::PCM_16_BIT => Some(Self::S16Le),
            audio_format::PCM_8_24_BIT => Some(Self::S24Le),
            audio_format::PCM_24_BIT_PACKED => Some(Self::S24_3Le),
            audio_format::PCM_32_BIT | audio_format::PCM_FLOAT => Some(Self::S32Le),
            _ => None,
        }
    }
}

pub mod audio_format {
    pub const DEFAULT: u32 = 0x0;
    pub const PCM_16_BIT: u32 = 0x1;
    pub const PCM_8_BIT: u32 = 0x2;
    pub const PCM_32_BIT: u32 = 0x3;
    pub const PCM_8_24_BIT: u32 = 0x4;
    pub const PCM_FLOAT: u32 = 0x5;
    pub const PCM_24_BIT_PACKED: u32 = 0x6;
    pub const MP3: u32 = 0x0100_0000;
    pub const AAC: u32 = 0x0400_0000;
    pub const FLAC: u32 = 0x1B00_0000;
    pub const SBC: u32 = 0x1F00_0000;
    pub const APTX: u32 = 0x2000_0000;
    pub const MAIN_MASK: u32 = 0xFF00_0000;

    pub fn main_format(format: u32) -> u32 {
        format & MAIN_MASK
    }

    pub fn name(format: u32) -> &'static str {
        match format {
            PCM_16_BIT => "AUDIO_FORMAT_PCM_16_BIT",
            PCM_8_BIT => "AUDIO_FORMAT_PCM_8_BIT",
            PCM_32_BIT => "AUDIO_FORMAT_PCM_32_BIT",
            PCM_8_24_BIT => "AUDIO_FORMAT_PCM_8_24_BIT",
            PCM_FLOAT => "AUDIO_FORMAT_PCM_FLOAT",
            PCM_24_BIT_PACKED => "AUDIO_FORMAT_PCM_24_BIT_PACKED",
            MP3 => "AUDIO_FORMAT_MP3",
            AAC => "AUDIO_FORMAT_AAC",
            FLAC => "AUDIO_FORMAT_FLAC",
            _ => "AUDIO_FORMAT_DEFAULT",
        }
    }
}

pub mod channel_mask {
    pub const NONE: u32 = 0x0;
    pub const OUT_MONO: u32 = 0x1;
    pub const OUT_STEREO: u32 = 0x3;
    pub const OUT_QUAD: u32 = 0x33;
    pub const OUT_5POINT1: u32 = 0x3F;
    pub const OUT_6POINT1: u32 = 0x13F;
    pub const OUT_7POINT1: u32 = 0x63F;
    pub const IN_MONO: u32 = 0x10;
    pub const IN_STEREO: u32 = 0xC;
    pub const IN_FRONT_BACK: u32 = 0x30;
    pub const INDEX_REPRESENTATION: u32 = 0x8000_0000;
    const REPRESENTATION_MASK: u32 = 0xC000_0000;

    pub fn count(mask: u32) -> u32 {
        (mask & !REPRESENTATION_MASK).count_ones()
    }

    pub fn index_mask(channels: u32) -> u32 {
        INDEX_REPRESENTATION | ((1u32 << channels.min(24)) - 1)
    }

    pub fn out_name(mask: u32) -> &'static str {
        match mask {
            OUT_MONO => "AUDIO_CHANNEL_OUT_MONO",
            OUT_STEREO => "AUDIO_CHANNEL_OUT_STEREO",
            OUT_QUAD => "AUDIO_CHANNEL_OUT_QUAD",
            OUT_5POINT1 => "AUDIO_CHANNEL_OUT_5POINT1",
            OUT_6POINT1 => "AUDIO_CHANNEL_OUT_6POINT1",
            OUT_7POINT1 => "AUDIO_CHANNEL_OUT_7POINT1",
            _ => "AUDIO_CHANNEL_NONE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devices_partition_by_main_mic() {
        assert!(AudioDevice::SpeakerAndUsbHeadset.is_playback());
        assert!(!AudioDevice::MainMic.is_playback());
        assert!(AudioDevice::QuadMic.is_capture());
        assert!(!AudioDevice::None.is_capture());
        assert!(!AudioDevice::None.is_playback());
    }

    #[test]
    fn modifiers_partition_by_sco_tx() {
        assert!(RouteModifier::BtScoRxWb.is_playback());
        assert!(RouteModifier::BtScoTxNb.is_capture());
        assert!(!RouteModifier::None.is_capture());
    }

    #[test]
    fn call_families_do_not_overlap() {
        assert!(AudioUsage::CpCallWb.is_cp_call());
        assert!(!AudioUsage::CpCallWb.is_ap_call());
        assert!(AudioUsage::Communication.is_call());
        assert!(!AudioUsage::LoopbackCodec.is_call());
    }

    #[test]
    fn channel_mask_counts() {
        assert_eq!(channel_mask::count(channel_mask::OUT_5POINT1), 6);
        assert_eq!(channel_mask::count(channel_mask::IN_STEREO), 2);
        assert_eq!(channel_mask::count(channel_mask::index_mask(3)), 3);
    }
}
