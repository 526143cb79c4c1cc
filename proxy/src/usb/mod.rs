//! USB audio sub-proxy: connected card discovery, best-match configuration
//! shared by every open playback stream, the USB PCM endpoints driven by the
//! DSP, and the optional vendor gain bundle.

pub mod best_match;
pub mod gain;
pub mod profile;

use crate::hw::{AudioBackend, OpenFlags, PcmDevice, PcmDirection};
use crate::params::{StrParms, keys};
use crate::pcm_config::PcmConfig;
use crate::types::PcmFormat;
use best_match::{UsbConfig, best_matching_config};
use gain::UsbGain;
use profile::UsbProfile;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

pub const USB_PERIOD_COUNT: u32 = 4;
pub const USB_PLAYBACK_DURATION_MS: u32 = 10;
pub const USB_CAPTURE_DURATION_MS: u32 = 10;

pub mod device_mask {
    pub const OUT_USB_DEVICE: i64 = 0x4000;
    pub const OUT_USB_HEADSET: i64 = 0x400_0000;
    pub const IN_USB_DEVICE: i64 = 0x8000_1000;
    pub const IN_USB_HEADSET: i64 = 0x8200_0000;

    pub fn is_out(mask: i64) -> bool {
        mask == OUT_USB_DEVICE || mask == OUT_USB_HEADSET
    }

    pub fn is_in(mask: i64) -> bool {
        mask == IN_USB_DEVICE || mask == IN_USB_HEADSET
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsbDirection {
    Out,
    In,
}

impl UsbDirection {
    pub fn section(self) -> &'static str {
        match self {
            Self::Out => "Playback:",
            Self::In => "Capture:",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Out => Self::In,
            Self::In => Self::Out,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Out => "usb-out",
            Self::In => "usb-in",
        }
    }
}

/// What the caller should do with the board's USB clock-source flag after
/// a connection change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSourceUpdate {
    Keep,
    Probe,
    Reset,
}

#[derive(Default)]
struct UsbPort {
    card: Option<(u32, u32)>,
    profile: UsbProfile,
    active: UsbConfig,
    pcm: Option<Box<dyn PcmDevice>>,
}

impl UsbPort {
    fn connected(&self) -> bool {
        self.card.is_some()
    }
}

#[derive(Default)]
struct UsbState {
    out: UsbPort,
    input: UsbPort,
    picked: UsbConfig,
    cpcall_prepared: bool,
    gain: Option<UsbGain>,
}

impl UsbState {
    fn port(&mut self, direction: UsbDirection) -> &mut UsbPort {
        match direction {
            UsbDirection::Out => &mut self.out,
            UsbDirection::In => &mut self.input,
        }
    }
}

fn lock(m: &Mutex<UsbState>) -> MutexGuard<'_, UsbState> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn match_or_default(profile: &UsbProfile, format: PcmFormat, channels: u32, rate: u32) -> UsbConfig {
    best_matching_config(&profile.devices, format, channels, rate).unwrap_or_default()
}

fn usb_pcm_config(active: UsbConfig, duration_ms: u32) -> PcmConfig {
    let period_size = active.rate * duration_ms / 1000;
    PcmConfig {
        channels: active.channels,
        rate: active.rate,
        period_size,
        period_count: USB_PERIOD_COUNT,
        format: active.format,
        start_threshold: period_size,
        stop_threshold: u32::MAX,
    }
}

pub struct UsbProxy {
    backend: Arc<dyn AudioBackend>,
    proc_asound: PathBuf,
    gain_dir: PathBuf,
    state: Mutex<UsbState>,
}

impl std::fmt::Debug for UsbProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("UsbProxy")
            .field("out_card", &state.out.card)
            .field("in_card", &state.input.card)
            .field("picked", &state.picked)
            .finish()
    }
}

impl UsbProxy {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        proc_asound: impl Into<PathBuf>,
        gain_dir: impl Into<PathBuf>,
    ) -> Self {
        info!("opened & initialized USB audio proxy");
        Self {
            backend,
            proc_asound: proc_asound.into(),
            gain_dir: gain_dir.into(),
            state: Mutex::new(UsbState::default()),
        }
    }

    pub fn is_playback_connected(&self) -> bool {
        lock(&self.state).out.connected()
    }

    pub fn is_capture_connected(&self) -> bool {
        lock(&self.state).input.connected()
    }

    pub fn is_playback_cpcall_prepared(&self) -> bool {
        lock(&self.state).cpcall_prepared
    }

    pub fn playback_config(&self) -> UsbConfig {
        lock(&self.state).out.active
    }

    pub fn capture_config(&self) -> UsbConfig {
        lock(&self.state).input.active
    }

    pub fn picked_config(&self) -> UsbConfig {
        lock(&self.state).picked
    }

    /// S8 devices are driven as 16 bit.
    pub fn playback_bitwidth(&self) -> u32 {
        match lock(&self.state).out.active.format {
            PcmFormat::S8 => 16,
            format => format.bit_width(),
        }
    }

    pub fn playback_highest_supported_channels(&self) -> u32 {
        lock(&self.state).out.profile.max_channels()
    }

    pub fn playback_supports_rate(&self, rate: u32) -> bool {
        lock(&self.state)
            .out
            .profile
            .devices
            .iter()
            .any(|d| d.rates.contains(&rate))
    }

    /// `set_default` selects the picked stream config; otherwise the fixed
    /// call configuration is used.
    pub fn playback_prepare(&self, set_default: bool) {
        let mut state = lock(&self.state);
        let request = if set_default {
            state.picked
        } else {
            UsbConfig::DEFAULT
        };
        state.out.active = match_or_default(
            &state.out.profile,
            request.format,
            request.channels,
            request.rate,
        );
        state.cpcall_prepared = !set_default;
        info!(
            "configured USB out proxy SR({}) CH({}) FMT({:?})",
            state.out.active.rate, state.out.active.channels, state.out.active.format
        );
    }

    /// With `set_default` and a single clock source the capture side follows
    /// the active playback rate.
    pub fn capture_prepare(&self, set_default: bool, single_clksrc: bool) {
        let mut state = lock(&self.state);
        let rate = if set_default && single_clksrc && state.out.connected() {
            state.out.active.rate
        } else {
            UsbConfig::DEFAULT.rate
        };
        state.input.active = match_or_default(
            &state.input.profile,
            UsbConfig::DEFAULT.format,
            UsbConfig::DEFAULT.channels,
            rate,
        );
        info!(
            "configured USB in proxy SR({}) CH({}) FMT({:?})",
            state.input.active.rate, state.input.active.channels, state.input.active.format
        );
    }

    /// Folds one stream's config into the running maximum; returns whether
    /// anything changed.
    pub fn pick_best(&self, config: &PcmConfig) -> bool {
        let mut state = lock(&self.state);
        info!(
            "current config rate[{}] format[{:?}] channels[{}]",
            config.rate, config.format, config.channels
        );
        let picked = &mut state.picked;
        let mut updated = false;
        if config.rate > picked.rate {
            picked.rate = config.rate;
            updated = true;
        }
        if config.format.is_higher_than(picked.format) {
            picked.format = config.format;
            updated = true;
        }
        if config.channels > picked.channels {
            picked.channels = config.channels;
            updated = true;
        }
        if updated {
            info!(
                "selected config rate[{}] format[{:?}] channels[{}]",
                picked.rate, picked.format, picked.channels
            );
        }
        updated
    }

    pub fn reconfig_needed(&self) -> bool {
        let state = lock(&self.state);
        if !state.out.connected() {
            return false;
        }
        let best = match_or_default(
            &state.out.profile,
            state.picked.format,
            state.picked.channels,
            state.picked.rate,
        );
        let needed = best != state.out.active;
        if needed {
            info!(
                "need reconfig rate[{}] format[{:?}] channels[{}]",
                state.picked.rate, state.picked.format, state.picked.channels
            );
        }
        needed
    }

    pub fn reset_config(&self) {
        let mut state = lock(&self.state);
        state.picked = UsbConfig::DEFAULT;
        info!(
            "usb-out reset rate[{}] format[{:?}] channels[{}]",
            state.picked.rate, state.picked.format, state.picked.channels
        );
    }

    pub fn open_out_proxy(&self) {
        let mut state = lock(&self.state);
        let port = &mut state.out;
        let Some((card, device)) = port.card else {
            return;
        };
        if port.pcm.is_some() {
            return;
        }
        let config = usb_pcm_config(port.active, USB_PLAYBACK_DURATION_MS);
        let opened = self
            .backend
            .open_pcm(card, device, PcmDirection::Playback, OpenFlags::MONOTONIC, &config)
            .and_then(|mut pcm| {
                // A silent period triggers the prepare on the USB side.
                let silence = vec![0u8; config.period_bytes() as usize];
                pcm.write(&silence)?;
                Ok(pcm)
            });
        match opened {
            Ok(pcm) => {
                info!(
                    "opened USB out PCM pcmC{card}D{device}p with SR({}) CC({}) Format({:?})",
                    config.rate, config.channels, config.format
                );
                port.pcm = Some(pcm);
            }
            Err(e) => error!("USB out PCM device is not ready at {} Hz: {e}", config.rate),
        }
    }

    pub fn close_out_proxy(&self) {
        let mut state = lock(&self.state);
        if state.out.pcm.take().is_some() {
            info!("closed USB out PCM device");
        }
    }

    pub fn open_in_proxy(&self) {
        let mut state = lock(&self.state);
        let port = &mut state.input;
        let Some((card, device)) = port.card else {
            return;
        };
        if port.pcm.is_some() {
            return;
        }
        let config = usb_pcm_config(port.active, USB_CAPTURE_DURATION_MS);
        let opened = self
            .backend
            .open_pcm(card, device, PcmDirection::Capture, OpenFlags::MONOTONIC, &config)
            .and_then(|mut pcm| {
                pcm.start()?;
                Ok(pcm)
            });
        match opened {
            Ok(pcm) => {
                info!(
                    "opened/started USB in PCM pcmC{card}D{device}c with SR({}) CC({}) Format({:?})",
                    config.rate, config.channels, config.format
                );
                port.pcm = Some(pcm);
            }
            Err(e) => error!("USB in PCM device cannot be started at {} Hz: {e}", config.rate),
        }
    }

    pub fn close_in_proxy(&self) {
        let mut state = lock(&self.state);
        if state.input.pcm.take().is_some() {
            info!("closed USB in PCM device");
        }
    }

    pub fn is_out_proxy_open(&self) -> bool {
        lock(&self.state).out.pcm.is_some()
    }

    pub fn is_in_proxy_open(&self) -> bool {
        lock(&self.state).input.pcm.is_some()
    }

    pub fn set_gain(&self, path: &str) {
        if let Some(gain) = lock(&self.state).gain.as_ref() {
            gain.apply(path);
        }
    }

    pub fn reset_gain(&self, path: &str) {
        if let Some(gain) = lock(&self.state).gain.as_ref() {
            gain.reset(path);
        }
    }

    pub fn has_gain_control(&self) -> bool {
        lock(&self.state).gain.is_some()
    }

    /// Handles `connect`/`disconnect` of USB device masks with `card` and
    /// `device` keys.
    pub fn set_parameters(&self, parms: &StrParms) -> ClockSourceUpdate {
        let mut update = ClockSourceUpdate::Keep;
        if let Some(mask) = parms.get_int(keys::DEVICE_CONNECT) {
            let direction = if device_mask::is_out(mask) {
                Some(UsbDirection::Out)
            } else if device_mask::is_in(mask) {
                Some(UsbDirection::In)
            } else {
                None
            };
            if let Some(direction) = direction {
                let card = parms.get_int(keys::DEVICE_CARD).unwrap_or(-1);
                let device = parms.get_int(keys::DEVICE_DEVICE).unwrap_or(-1);
                info!(
                    "connected {} device with card {card} / device {device}",
                    direction.as_str()
                );
                if let (Ok(card), Ok(device)) = (u32::try_from(card), u32::try_from(device)) {
                    self.connect(direction, card, device);
                }
            }
            let state = lock(&self.state);
            if state.out.connected() || state.input.connected() {
                update = ClockSourceUpdate::Probe;
            }
        }
        if let Some(mask) = parms.get_int(keys::DEVICE_DISCONNECT) {
            let direction = if device_mask::is_out(mask) {
                Some(UsbDirection::Out)
            } else if device_mask::is_in(mask) {
                Some(UsbDirection::In)
            } else {
                None
            };
            if let Some(direction) = direction {
                self.disconnect(direction);
                let state = lock(&self.state);
                if !state.out.connected() && !state.input.connected() {
                    update = ClockSourceUpdate::Reset;
                }
            }
        }
        update
    }

    fn connect(&self, direction: UsbDirection, card: u32, device: u32) {
        let mut state = lock(&self.state);
        if state.port(direction).connected() {
            return;
        }
        let stream0 = self
            .proc_asound
            .join(format!("card{card}"))
            .join("stream0");
        let profile = self
            .backend
            .read_text(&stream0)
            .and_then(|text| UsbProfile::parse(&text, direction))
            .unwrap_or_else(|e| {
                warn!("{}: failed to read USB profile: {e}", direction.as_str());
                UsbProfile::default()
            });
        profile.log(direction);
        let request = match direction {
            UsbDirection::Out => state.picked,
            UsbDirection::In => UsbConfig::DEFAULT,
        };
        let port = state.port(direction);
        port.card = Some((card, device));
        port.active = match_or_default(&profile, request.format, request.channels, request.rate);
        port.profile = profile;

        if state.gain.is_none() {
            match UsbGain::load(
                self.backend.as_ref(),
                &self.proc_asound,
                &self.gain_dir,
                card,
            ) {
                Ok(Some(gain)) => {
                    info!("USB gain control enabled");
                    state.gain = Some(gain);
                }
                Ok(None) => {}
                Err(e) => warn!("failed to enable USB gain control: {e}"),
            }
        }
    }

    fn disconnect(&self, direction: UsbDirection) {
        let mut state = lock(&self.state);
        let port = state.port(direction);
        let Some((card, device)) = port.card else {
            return;
        };
        info!(
            "disconnected {} device with card {card} / device {device}",
            direction.as_str()
        );
        *port = UsbPort::default();
        if !state.out.connected() && !state.input.connected() {
            if state.gain.take().is_some() {
                info!("USB gain control disabled");
            }
        } else if state.gain.is_some() {
            info!("USB device still in use");
        }
    }

    /// Appends the capability strings of a connected direction for the
    /// `sup_*` keys present in `query`.
    pub fn get_stream_parameters(&self, direction: UsbDirection, query: &StrParms, reply: &mut StrParms) {
        let state = lock(&self.state);
        let port = match direction {
            UsbDirection::Out => &state.out,
            UsbDirection::In => &state.input,
        };
        if !port.connected() {
            return;
        }
        if query.has_key(keys::STREAM_SUP_FORMATS) {
            reply.add_str(keys::STREAM_SUP_FORMATS, &port.profile.supported_formats());
        }
        if query.has_key(keys::STREAM_SUP_CHANNELS) {
            reply.add_str(
                keys::STREAM_SUP_CHANNELS,
                &port.profile.supported_channels(direction),
            );
        }
        if query.has_key(keys::STREAM_SUP_SAMPLING_RATES) {
            reply.add_str(keys::STREAM_SUP_SAMPLING_RATES, &port.profile.supported_rates());
        }
    }

    pub fn dump(&self) -> serde_json::Value {
        let state = lock(&self.state);
        let port = |p: &UsbPort, d: UsbDirection| {
            json!({
                "connected": p.connected(),
                "card": p.card.map(|c| c.0),
                "device": p.card.map(|c| c.1),
                "active": p.active,
                "open": p.pcm.is_some(),
                "profiles": p.profile.devices,
                "direction": d.as_str(),
            })
        };
        json!({
            "out": port(&state.out, UsbDirection::Out),
            "in": port(&state.input, UsbDirection::In),
            "picked": state.picked,
            "cpcall_prepared": state.cpcall_prepared,
            "gain_control": state.gain.is_some(),
        })
    }
}

impl Drop for UsbProxy {
    fn drop(&mut self) {
        info!("USB audio proxy destroyed");
    }
}
