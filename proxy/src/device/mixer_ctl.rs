//! Mixer controls the routing engine writes outside the route graph, and the
//! read-locked accessors every caller goes through.

use super::{DeviceProxy, MixerState};
use crate::hw::Mixer;
use serde::Serialize;
use tracing::{error, info};

pub mod controls {
    pub const MUTE: &str = "ABOX ERAP info Mute Primary";
    pub const MUTE_CNT_FOR_PATH_CHANGE: i64 = 15;
    pub const TICKLE: &str = "ABOX Tickle";
    pub const TICKLE_ON: i64 = 1;
    pub const AUDIO_MODE: &str = "ABOX Audio Mode";
    pub const SPK_AMPL_POWER: &str = "ABOX Spk AmpL Power";

    pub const OFFLOAD_VOLUME: &str = "ABOX ComprTx0 Volume";
    pub const OFFLOAD_VOLUME_MAX: f32 = 8192.0;
    pub const OFFLOAD_UPSCALE: &str = "ABOX ComprTx0 Format";
    pub const MMAP_OUT_VOLUME: &str = "ABOX RDMA VOL FACTOR2";
    pub const MMAP_PLAYBACK_VOLUME_MAX: f32 = 16_777_215.0;

    pub const USB_CLOCKSOURCE: &str = "ABOX PCM ext USB SCDS";
    pub const CAPTURE_VPCMDAI_INSRC: &str = "ABOX VPCMIN_DAI0_A";

    pub const A2DP_OFFLOAD_PARAMS: &str = "ABOX ERAP info A2DP PARAM";
    pub const A2DP_SUSPEND_PARAMS: &str = "ABOX A2DP SUSPEND PARAM";
    pub const SPUS_OUT6: &str = "ABOX SPUS OUT6";
    pub const SIFS2: &str = "ABOX SIFS2";

    pub const SIFS0_SWITCH: &str = "ABOX SIFS0 OUT Switch";
    pub const SIFS0_RATE: &str = "ABOX SIFS0 Rate";
    pub const SIFS0_WIDTH: &str = "ABOX SIFS0 Width";
    pub const SIFS0_CHANNEL: &str = "ABOX SIFS0 Channel";

    pub const MIXER_ON: i64 = 1;
    pub const MIXER_OFF: i64 = 0;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixerControl {
    Mute,
    Tickle,
}

impl MixerControl {
    fn name(self) -> &'static str {
        match self {
            Self::Mute => controls::MUTE,
            Self::Tickle => controls::TICKLE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeTarget {
    Offload,
    Mmap,
}

/// External audio interfaces of the DSP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AudioInterface {
    Uaif0,
    Uaif1,
    Uaif2,
    Uaif3,
}

pub(crate) struct InterfaceControls {
    pub switch: String,
    pub rate: String,
    pub width: String,
    pub channel: String,
}

impl AudioInterface {
    pub(crate) fn controls(self) -> InterfaceControls {
        let index = self as u8;
        InterfaceControls {
            switch: format!("ABOX UAIF{index} Switch"),
            rate: format!("ABOX UAIF{index} Rate"),
            width: format!("ABOX UAIF{index} Width"),
            channel: format!("ABOX UAIF{index} Channel"),
        }
    }
}

impl MixerState {
    /// Runs `f` against `name` when the mixer is open and exposes it.
    pub(crate) fn control<T>(
        &self,
        name: &str,
        f: impl FnOnce(&dyn Mixer) -> Result<T, String>,
    ) -> Option<T> {
        let Some(mixer) = self.mixer.as_ref() else {
            error!("mixer is not opened, {name} skipped");
            return None;
        };
        if !mixer.has_control(name) {
            error!("cannot find {name} Mixer Control");
            return None;
        }
        match f(mixer.as_ref()) {
            Ok(v) => Some(v),
            Err(e) => {
                error!("failed to access {name}: {e}");
                None
            }
        }
    }

    pub(crate) fn set_int(&self, name: &str, value: i64) {
        self.control(name, |m| m.set_value(name, 0, value));
    }

    pub(crate) fn set_string(&self, name: &str, value: &str) {
        self.control(name, |m| m.set_enum_by_string(name, value));
    }

    pub(crate) fn set_array(&self, name: &str, data: &[u8]) {
        self.control(name, |m| m.set_array(name, data));
    }
}

impl DeviceProxy {
    /// Value of index 0, or -1 when the control is missing.
    pub fn get_mixer_value_int(&self, name: &str) -> i64 {
        self.mixer_read()
            .control(name, |m| m.get_value(name, 0))
            .unwrap_or(-1)
    }

    pub fn get_mixer_value_array(&self, name: &str) -> Option<Vec<u8>> {
        self.mixer_read().control(name, |m| m.get_array(name))
    }

    pub fn set_mixer_value_int(&self, name: &str, value: i64) {
        self.mixer_read().set_int(name, value);
    }

    pub fn set_mixer_value_string(&self, name: &str, value: &str) {
        self.mixer_read().set_string(name, value);
    }

    pub fn set_mixer_value_array(&self, name: &str, data: &[u8]) {
        self.mixer_read().set_array(name, data);
    }

    pub fn set_mixer_control(&self, control: MixerControl, value: i64) {
        let name = control.name();
        if self
            .mixer_read()
            .control(name, |m| m.set_value(name, 0, value))
            .is_some()
        {
            info!("set Mixer Control({name}) to {value}");
        }
    }

    pub fn set_primary_mute(&self, count: i64) {
        self.set_mixer_control(MixerControl::Mute, count);
    }

    /// Volumes are linear gains in `0.0..=1.0`.
    pub fn set_volume(&self, target: VolumeTarget, left: f32, right: f32) {
        match target {
            VolumeTarget::Offload => {
                let gains = [
                    (left * controls::OFFLOAD_VOLUME_MAX) as i32,
                    (right * controls::OFFLOAD_VOLUME_MAX) as i32,
                ];
                let data: Vec<u8> = gains.iter().flat_map(|g| g.to_le_bytes()).collect();
                self.set_mixer_value_array(controls::OFFLOAD_VOLUME, &data);
            }
            VolumeTarget::Mmap => {
                let gain = (left * controls::MMAP_PLAYBACK_VOLUME_MAX) as i64;
                self.set_mixer_value_int(controls::MMAP_OUT_VOLUME, gain);
            }
        }
    }

    /// Selects the DSP upscaler for the compressed offload stream.
    pub fn set_upscale_info(&self, rate: u32, format: u32) {
        use crate::types::audio_format;
        let factor = match (format, rate) {
            (audio_format::PCM_16_BIT, 48000) => "48K_16B",
            (audio_format::PCM_8_24_BIT, 48000) => "48K_24B",
            (audio_format::PCM_8_24_BIT, 192000) => "192K_24B",
            (audio_format::PCM_8_24_BIT, 384000) => "384K_24B",
            _ => {
                error!(
                    "invalid upscale config rate {rate} format {}",
                    audio_format::name(format)
                );
                return;
            }
        };
        self.set_mixer_value_string(controls::OFFLOAD_UPSCALE, factor);
        info!("upscale factor set to {factor}");
    }

    /// Reconfigures one external interface with its switch held off.
    pub fn set_audio_interface(
        &self,
        iface: AudioInterface,
        rate: u32,
        width: u32,
        channels: u32,
    ) {
        let device = self.active_playback().device;
        let ctl = iface.controls();
        let mixer = self.mixer_read();
        mixer.set_int(&ctl.switch, controls::MIXER_OFF);
        let sifs0 = iface == AudioInterface::Uaif0;
        let headphone = sifs0 && device.is_wired_headphone();
        if headphone {
            mixer.set_int(controls::SIFS0_SWITCH, controls::MIXER_OFF);
        }
        mixer.set_int(&ctl.rate, i64::from(rate));
        mixer.set_int(&ctl.width, i64::from(width));
        mixer.set_int(&ctl.channel, i64::from(channels));
        if sifs0 && !device.is_usb_out() {
            mixer.set_int(controls::SIFS0_RATE, i64::from(rate));
            mixer.set_int(controls::SIFS0_WIDTH, i64::from(width));
            mixer.set_int(controls::SIFS0_CHANNEL, i64::from(channels));
        }
        if headphone {
            mixer.set_int(controls::SIFS0_SWITCH, controls::MIXER_ON);
        }
        mixer.set_int(&ctl.switch, controls::MIXER_ON);
        info!("{iface:?} configured SR({rate}) W({width}) CH({channels})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::proxy_with_route;
    use crate::hw::memory::MemoryMixer;
    use crate::types::{AudioDevice, AudioUsage, RouteModifier, audio_format};

    #[test]
    fn missing_controls_read_as_minus_one_and_skip_writes() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::strict(&[controls::TICKLE]));
        assert_eq!(proxy.get_mixer_value_int(controls::USB_CLOCKSOURCE), -1);
        backend.mixer().clear_writes();
        proxy.set_mixer_value_int(controls::AUDIO_MODE, 2);
        proxy.set_mixer_value_string(controls::SPUS_OUT6, "SIFS2");
        assert_eq!(backend.mixer().write_count(), 0);
    }

    #[test]
    fn volume_scaling() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        proxy.set_volume(VolumeTarget::Offload, 1.0, 0.5);
        let array = backend.mixer().array(controls::OFFLOAD_VOLUME).unwrap();
        assert_eq!(&array[0..4], &8192i32.to_le_bytes());
        assert_eq!(&array[4..8], &4096i32.to_le_bytes());

        proxy.set_volume(VolumeTarget::Mmap, 1.0, 1.0);
        assert_eq!(backend.mixer().value(controls::MMAP_OUT_VOLUME), Some(0xFF_FFFF));
    }

    #[test]
    fn upscale_factors() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        let mixer = backend.mixer();
        proxy.set_upscale_info(192000, audio_format::PCM_8_24_BIT);
        assert_eq!(mixer.enum_value(controls::OFFLOAD_UPSCALE).as_deref(), Some("192K_24B"));
        proxy.set_upscale_info(44100, audio_format::PCM_16_BIT);
        assert_eq!(mixer.enum_value(controls::OFFLOAD_UPSCALE).as_deref(), Some("192K_24B"));
        proxy.set_upscale_info(48000, audio_format::PCM_16_BIT);
        assert_eq!(mixer.enum_value(controls::OFFLOAD_UPSCALE).as_deref(), Some("48K_16B"));
    }

    #[test]
    fn uaif0_toggles_sifs0_for_wired_headphones() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        proxy.set_route(AudioUsage::Media, AudioDevice::Headphone, RouteModifier::None, true);
        let mixer = backend.mixer();
        mixer.clear_writes();
        proxy.set_audio_interface(AudioInterface::Uaif0, 96000, 24, 2);
        let names: Vec<String> = mixer.writes().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names.first().map(String::as_str), Some("ABOX UAIF0 Switch"));
        assert_eq!(names.get(1).map(String::as_str), Some(controls::SIFS0_SWITCH));
        assert_eq!(names.last().map(String::as_str), Some("ABOX UAIF0 Switch"));
        assert_eq!(mixer.value(controls::SIFS0_RATE), Some(96000));
        assert_eq!(mixer.value("ABOX UAIF0 Switch"), Some(1));

        mixer.clear_writes();
        proxy.set_audio_interface(AudioInterface::Uaif2, 16000, 16, 1);
        assert_eq!(mixer.write_count(), 5);
        assert_eq!(mixer.value("ABOX UAIF2 Rate"), Some(16000));
    }
}
