use super::{ActiveRoute, DeviceProxy, MixerControl, MixerState, RouteState, controls};
use crate::types::{AudioDevice, AudioUsage, RouteModifier};
use std::path::Path;
use tracing::{error, info, warn};

/// `<usage>-<device>`, or the bare usage path for devices without a name.
pub fn make_path(usage: AudioUsage, device: AudioDevice) -> String {
    let device_name = device.path_name();
    if device_name.is_empty() {
        usage.path_name().to_string()
    } else {
        format!("{}-{}", usage.path_name(), device_name)
    }
}

/// Dual-speaker boards route every speaker path through its `dual-` twin.
/// Loopback paths keep their name.
pub fn add_dual_path(path: &str, dual: bool) -> String {
    if !dual || path.contains("loopback") {
        return path.to_string();
    }
    match path.find("speaker") {
        Some(at) => format!("{}dual-{}", &path[..at], &path[at..]),
        None => path.to_string(),
    }
}

pub fn make_gain(path: &str) -> String {
    format!("gain-{path}")
}

fn log_route_err(op: &str, path: &str, res: Result<(), String>) {
    if let Err(e) = res {
        warn!("{op} {path} failed: {e}");
    }
}

impl MixerState {
    fn with_route(&self, f: impl FnOnce(&dyn crate::hw::AudioRoute)) {
        match self.route.as_deref() {
            Some(route) => f(route),
            None => error!("audio route is not initialized"),
        }
    }
}

impl ActiveRoute {
    fn is_routed(&self) -> bool {
        self.usage != AudioUsage::None && self.device != AudioDevice::None
    }
}

impl DeviceProxy {
    fn full_path(&self, usage: AudioUsage, device: AudioDevice) -> String {
        add_dual_path(&make_path(usage, device), self.support_dualspk())
    }

    fn apply_route(&self, usage: AudioUsage, device: AudioDevice) {
        if device == AudioDevice::AuxDigital {
            return;
        }
        let path = self.full_path(usage, device);
        let gain = make_gain(&path);
        self.mixer_read().with_route(|route| {
            log_route_err("apply", &path, route.apply_and_update_path(&path));
            info!("routed to {path}");
            log_route_err("apply", &gain, route.apply_and_update_path(&gain));
            info!("set gain as {gain}");
        });
    }

    fn reroute(&self, old: ActiveRoute, usage: AudioUsage, device: AudioDevice) {
        let old_path = self.full_path(old.usage, old.device);
        let old_gain = make_gain(&old_path);
        let new_path = self.full_path(usage, device);
        let new_gain = make_gain(&new_path);
        self.mixer_read().with_route(|route| {
            log_route_err("reset", &old_path, route.reset_and_update_path(&old_path));
            info!("unrouted {old_path}");
            log_route_err("reset", &old_gain, route.reset_and_update_path(&old_gain));

            if device != AudioDevice::AuxDigital {
                log_route_err("apply", &new_path, route.apply_and_update_path(&new_path));
                info!("routed {new_path}");
                log_route_err("apply", &new_gain, route.apply_and_update_path(&new_gain));
            }
            log_route_err("update", "mixer", route.update_mixer());
        });
    }

    fn reset_route(&self, usage: AudioUsage, device: AudioDevice) {
        let path = self.full_path(usage, device);
        let gain = make_gain(&path);
        self.mixer_read().with_route(|route| {
            log_route_err("reset", &path, route.reset_and_update_path(&path));
            info!("unrouted {path}");
            log_route_err("reset", &gain, route.reset_and_update_path(&gain));
        });
    }

    fn set_modifier(&self, modifier: RouteModifier) {
        let path = modifier.path_name();
        self.mixer_read().with_route(|route| {
            log_route_err("apply", path, route.apply_and_update_path(path));
        });
        info!("enabled modifier {path}");
    }

    fn update_modifier(&self, old: RouteModifier, new: RouteModifier) {
        self.mixer_read().with_route(|route| {
            log_route_err("reset", old.path_name(), route.reset_path(old.path_name()));
            log_route_err("apply", new.path_name(), route.apply_path(new.path_name()));
            log_route_err("update", "mixer", route.update_mixer());
        });
        info!("modifier {} replaced by {}", old.path_name(), new.path_name());
    }

    fn reset_modifier(&self, modifier: RouteModifier) {
        let path = modifier.path_name();
        self.mixer_read().with_route(|route| {
            log_route_err("reset", path, route.reset_and_update_path(path));
        });
        info!("disabled modifier {path}");
    }

    /// Call to call transitions that keep the internal nodes running: a CP
    /// call bandwidth change on one device, or a speaker/DeX swap.
    fn keeps_internal_path(active: ActiveRoute, usage: AudioUsage, device: AudioDevice) -> bool {
        if !active.usage.is_call() || !usage.is_call() {
            return false;
        }
        let bandwidth_change = active.usage != usage
            && active.device == device
            && active.usage.is_cp_call()
            && usage.is_cp_call();
        let speaker_swap = active.usage == usage
            && active.device != device
            && active.device.is_speaker()
            && device.is_speaker();
        bandwidth_change || speaker_swap
    }

    fn before_playback_route(&self, st: &mut RouteState, usage: AudioUsage, device: AudioDevice) {
        if st.skip_internal_path {
            info!("skip internal path pcm controls");
            return;
        }
        if !usage.is_fm() {
            self.stop_fm_nodes(st);
        }
        if st.playback.device != device && (st.playback.usage.is_ap_call() || usage.is_ap_call()) {
            self.set_mixer_control(MixerControl::Mute, controls::MUTE_CNT_FOR_PATH_CHANGE);
        }
    }

    /// Routes `usage` to `device` (or tears that route down). Playback and
    /// capture each hold one active route; enabling a new one reroutes away
    /// from the previous pair.
    pub fn set_route(&self, usage: AudioUsage, device: AudioDevice, modifier: RouteModifier, enable: bool) {
        let mut st = self.state();
        let st = &mut *st;

        if enable {
            let active = if device.is_playback() { st.playback } else { st.capture };
            if Self::keeps_internal_path(active, usage, device) {
                info!(
                    "skip loopback PCMs re-open, active-device({:?}) requested-device({device:?})",
                    active.device
                );
                st.skip_internal_path = true;
            }

            if device.is_playback() {
                self.before_playback_route(st, usage, device);
                let old = st.playback;
                if old.is_routed() {
                    self.disable_internal_path(st, old.usage, old.device);
                    self.reroute(old, usage, device);
                } else {
                    self.apply_route(usage, device);
                }
                st.playback.usage = usage;
                st.playback.device = device;

                if modifier.is_playback() {
                    if old.modifier == RouteModifier::None {
                        self.set_modifier(modifier);
                    } else {
                        self.update_modifier(old.modifier, modifier);
                    }
                } else if modifier == RouteModifier::None && old.modifier != RouteModifier::None {
                    self.reset_modifier(old.modifier);
                }
                if device.is_usb_out() {
                    self.usb.set_gain(&make_path(usage, device));
                }
                st.playback.modifier = modifier;

                self.enable_internal_path(st, usage, device);
                if usage.is_fm() {
                    self.start_fm_nodes(st);
                }
            } else {
                let old = st.capture;
                if old.is_routed() {
                    self.disable_internal_path(st, old.usage, old.device);
                    self.reroute(old, usage, device);
                } else {
                    // capture routing needs the DSP awake early
                    self.set_mixer_control(MixerControl::Tickle, controls::TICKLE_ON);
                    self.apply_route(usage, device);
                }
                st.capture.usage = usage;
                st.capture.device = device;

                if modifier.is_capture() {
                    if old.modifier == RouteModifier::None {
                        self.set_modifier(modifier);
                    } else {
                        self.update_modifier(old.modifier, modifier);
                    }
                } else if modifier == RouteModifier::None && old.modifier != RouteModifier::None {
                    self.reset_modifier(old.modifier);
                }
                if device.is_usb_mic() {
                    self.usb.set_gain(&make_path(usage, device));
                }
                st.capture.modifier = modifier;

                self.enable_internal_path(st, usage, device);
            }
        } else {
            self.disable_internal_path(st, usage, device);

            if modifier != RouteModifier::None {
                self.reset_modifier(modifier);
                if modifier.is_playback() {
                    st.playback.modifier = RouteModifier::None;
                } else {
                    st.capture.modifier = RouteModifier::None;
                }
            } else {
                st.playback.modifier = RouteModifier::None;
                st.capture.modifier = RouteModifier::None;
            }
            if device.is_usb_out() || device.is_usb_mic() {
                self.usb.reset_gain(&make_path(usage, device));
            }
            self.reset_route(usage, device);

            let cleared = if device.is_playback() { &mut st.playback } else { &mut st.capture };
            cleared.usage = AudioUsage::None;
            cleared.device = AudioDevice::None;
        }

        st.skip_internal_path = false;
    }

    /// Applies or resets the AP call TX speech enhancement path of the
    /// active capture usage.
    pub fn set_apcall_txse(&self, enable: bool) {
        let path = format!("set-{}-txse", self.active_capture().usage.path_name());
        self.mixer_read().with_route(|route| {
            if enable {
                log_route_err("apply", &path, route.apply_and_update_path(&path));
            } else {
                log_route_err("reset", &path, route.reset_and_update_path(&path));
            }
        });
        info!("{path} is {}", if enable { "enabled" } else { "disabled" });
    }

    /// Opens the mixer and the route graph described by `xml_path`. A graph
    /// that references controls the driver has not registered yet starts the
    /// recovery thread.
    pub fn init_route(&self, xml_path: &Path) -> bool {
        let card = self.options.mixer_card;
        let mixer = match self.backend.open_mixer(card) {
            Ok(mixer) => mixer,
            Err(e) => {
                error!("failed to open Mixer: {e}");
                return false;
            }
        };
        let mut state = self.mixer_write();
        state.mixer = Some(mixer.clone());
        state.set_int(controls::TICKLE, controls::TICKLE_ON);
        if let Err(e) = mixer.subscribe_events(true) {
            warn!("mixer event subscription failed: {e}");
        }

        let route = match self.backend.open_route(mixer.clone(), card, xml_path) {
            Ok(route) => route,
            Err(e) => {
                error!("failed to init audio route: {e}");
                if let Err(e) = mixer.subscribe_events(false) {
                    error!("mixer event unsubscription failed: {e}");
                }
                state.mixer = None;
                return false;
            }
        };
        let missing = route.missing_controls();
        state.route = Some(route);
        state.xml_path = Some(xml_path.to_path_buf());
        drop(state);

        {
            let mut st = self.state();
            st.playback = ActiveRoute::IDLE;
            st.capture = ActiveRoute::IDLE;
        }
        info!("opened Mixer & initialized audio route");

        if missing {
            self.spawn_recovery();
            info!("missing control found, update thread is created");
        } else if let Err(e) = mixer.subscribe_events(false) {
            warn!("mixer event unsubscription failed: {e}");
        }
        true
    }

    pub fn deinit_route(&self) {
        let mut state = self.mixer_write();
        state.route = None;
        state.mixer = None;
        state.xml_path = None;
        info!("closed Mixer & deinitialized audio route");
    }
}
