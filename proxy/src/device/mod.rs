//! The routing engine. One `DeviceProxy` per process owns the mixer, the
//! route graph, the active playback and capture routes and every internal
//! PCM the DSP needs alongside them.
//!
//! Lock order is `state` before `a2dp` before `mixer`. The mixer lock is a
//! read-write lock: routing takes it shared, only the recovery thread takes
//! it exclusive while it reopens the mixer and route graph.

mod board_info;
mod internal;
mod mixer_ctl;
mod recovery;
mod route;

pub use board_info::{
    BoardCapabilities, BoardInfo, MicrophoneDevice, MicrophoneDirectionality, MicrophoneInfo,
    MicrophoneLocation, Microphones, Placement, parse_microphones,
};
pub use internal::InternalNode;
pub use mixer_ctl::{AudioInterface, MixerControl, VolumeTarget, controls};

use crate::a2dp::{A2dpProxy, A2dpServiceConnector, is_bt_offload_format};
use crate::error::ProxyError;
use crate::hw::config::proc_asound_root;
use crate::hw::options::ProxyOptions;
use crate::hw::{AudioBackend, AudioRoute, Mixer, PcmDevice};
use crate::params::{StrParms, keys};
use crate::types::{AudioDevice, AudioMode, AudioUsage, RouteModifier};
use crate::usb::{ClockSourceUpdate, UsbProxy};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

pub const DEFAULT_USB_GAIN_DIR: &str = "/vendor/etc";

/// BT A2DP output masks carried by `connect`/`disconnect`.
pub mod a2dp_mask {
    pub const OUT_BLUETOOTH_A2DP: i64 = 0x80;
    pub const OUT_BLUETOOTH_A2DP_HEADPHONES: i64 = 0x100;
    pub const OUT_BLUETOOTH_A2DP_SPEAKER: i64 = 0x200;

    pub fn is_a2dp(mask: i64) -> bool {
        matches!(
            mask,
            OUT_BLUETOOTH_A2DP | OUT_BLUETOOTH_A2DP_HEADPHONES | OUT_BLUETOOTH_A2DP_SPEAKER
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ActiveRoute {
    pub usage: AudioUsage,
    pub device: AudioDevice,
    pub modifier: RouteModifier,
}

impl ActiveRoute {
    pub const IDLE: Self = Self {
        usage: AudioUsage::None,
        device: AudioDevice::None,
        modifier: RouteModifier::None,
    };

    pub fn is_idle(&self) -> bool {
        *self == Self::IDLE
    }
}

impl Default for ActiveRoute {
    fn default() -> Self {
        Self::IDLE
    }
}

#[derive(Default)]
pub(crate) struct MixerState {
    mixer: Option<Arc<dyn Mixer>>,
    route: Option<Box<dyn AudioRoute>>,
    xml_path: Option<PathBuf>,
}

struct RouteState {
    playback: ActiveRoute,
    capture: ActiveRoute,
    nodes: BTreeMap<InternalNode, Box<dyn PcmDevice>>,
    skip_internal_path: bool,
    call_state: bool,
    audio_mode: AudioMode,
    primary_out: bool,
}

impl Default for RouteState {
    fn default() -> Self {
        Self {
            playback: ActiveRoute::IDLE,
            capture: ActiveRoute::IDLE,
            nodes: BTreeMap::new(),
            skip_internal_path: false,
            call_state: false,
            audio_mode: AudioMode::Normal,
            primary_out: false,
        }
    }
}

struct A2dpContext {
    proxy: A2dpProxy,
    out_enabled: bool,
    suspended: bool,
    delay_ms: u32,
    default_delay_ms: u32,
}

pub struct DeviceProxy {
    backend: Arc<dyn AudioBackend>,
    options: ProxyOptions,
    mixer: Arc<RwLock<MixerState>>,
    state: Mutex<RouteState>,
    a2dp: Mutex<A2dpContext>,
    usb: UsbProxy,
    support_dualspk: AtomicBool,
    spk_ampl_power: AtomicBool,
    usb_single_clksrc: AtomicBool,
    board: BoardInfo,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DeviceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("DeviceProxy")
            .field("playback", &state.playback)
            .field("capture", &state.capture)
            .field("nodes", &state.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl DeviceProxy {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        options: ProxyOptions,
        a2dp: Arc<dyn A2dpServiceConnector>,
    ) -> Self {
        let usb = UsbProxy::new(backend.clone(), proc_asound_root(), DEFAULT_USB_GAIN_DIR);
        info!("created audio device proxy with {options:?}");
        Self {
            backend,
            options,
            mixer: Arc::new(RwLock::new(MixerState::default())),
            state: Mutex::new(RouteState::default()),
            a2dp: Mutex::new(A2dpContext {
                proxy: A2dpProxy::new(a2dp),
                out_enabled: false,
                suspended: false,
                delay_ms: 0,
                default_delay_ms: 0,
            }),
            usb,
            support_dualspk: AtomicBool::new(options.support_dualspk),
            spk_ampl_power: AtomicBool::new(false),
            usb_single_clksrc: AtomicBool::new(options.usb_single_clksrc),
            board: BoardInfo::default(),
            recovery: Mutex::new(None),
        }
    }

    /// Where USB stream descriptors and gain bundles are looked up.
    pub fn with_usb_paths(mut self, proc_asound: impl Into<PathBuf>, gain_dir: impl Into<PathBuf>) -> Self {
        self.usb = UsbProxy::new(self.backend.clone(), proc_asound, gain_dir);
        self
    }

    pub fn with_board_info(mut self, board: BoardInfo) -> Self {
        board.capabilities.log();
        self.board = board;
        self
    }

    pub fn init(&self) {
        {
            let mut state = self.state();
            state.call_state = false;
            state.skip_internal_path = false;
            state.audio_mode = AudioMode::Normal;
        }
        self.spk_ampl_power.store(false, Ordering::Relaxed);
        if self.options.support_bta2dp {
            lock(&self.a2dp).proxy.init();
        }
        info!("audio device proxy initialized");
    }

    pub fn deinit(&self) {
        if self.options.support_bta2dp {
            let mut a2dp = lock(&self.a2dp);
            a2dp.proxy.deinit();
            a2dp.out_enabled = false;
        }
        {
            let mut state = self.state();
            let nodes: Vec<InternalNode> = state.nodes.keys().copied().collect();
            for node in nodes {
                self.disable_node(&mut state, node);
            }
        }
        self.usb.close_out_proxy();
        self.usb.close_in_proxy();
        self.join_recovery();
        self.deinit_route();
        info!("audio device proxy deinitialized");
    }

    fn state(&self) -> MutexGuard<'_, RouteState> {
        lock(&self.state)
    }

    pub(crate) fn mixer_read(&self) -> RwLockReadGuard<'_, MixerState> {
        self.mixer.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn mixer_write(&self) -> RwLockWriteGuard<'_, MixerState> {
        self.mixer.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    pub fn usb(&self) -> &UsbProxy {
        &self.usb
    }

    pub fn active_playback(&self) -> ActiveRoute {
        self.state().playback
    }

    pub fn active_capture(&self) -> ActiveRoute {
        self.state().capture
    }

    pub fn is_node_open(&self, node: InternalNode) -> bool {
        self.state().nodes.contains_key(&node)
    }

    pub fn open_nodes(&self) -> Vec<InternalNode> {
        self.state().nodes.keys().copied().collect()
    }

    pub fn is_usb_single_clksrc(&self) -> bool {
        self.usb_single_clksrc.load(Ordering::Relaxed)
    }

    pub fn support_dualspk(&self) -> bool {
        self.support_dualspk.load(Ordering::Relaxed)
    }

    pub fn set_dual_speaker_mode(&self, on: bool) {
        self.support_dualspk.store(on, Ordering::Relaxed);
        info!("dual speaker mode {}", if on { "on" } else { "off" });
    }

    pub fn spk_ampl_power(&self) -> bool {
        self.spk_ampl_power.load(Ordering::Relaxed)
    }

    pub fn set_spk_ampl_power(&self, on: bool) {
        self.spk_ampl_power.store(on, Ordering::Relaxed);
        if self.support_dualspk() {
            self.set_mixer_value_int(controls::SPK_AMPL_POWER, i64::from(on));
        }
    }

    pub fn call_status(&self, on: bool) {
        self.state().call_state = on;
        info!("call state {}", if on { "on" } else { "off" });
    }

    pub fn call_state(&self) -> bool {
        self.state().call_state
    }

    pub fn set_audiomode(&self, mode: AudioMode) {
        self.state().audio_mode = mode;
        self.set_mixer_value_int(controls::AUDIO_MODE, mode.mixer_value());
        info!("audio mode set to {mode:?}");
    }

    pub fn audio_mode(&self) -> AudioMode {
        self.state().audio_mode
    }

    /// Claims the primary output slot; false when another stream holds it.
    pub fn register_primary_out(&self) -> bool {
        let mut state = self.state();
        if state.primary_out {
            return false;
        }
        state.primary_out = true;
        true
    }

    pub fn release_primary_out(&self) {
        self.state().primary_out = false;
    }

    pub fn is_a2dp_out_enabled(&self) -> bool {
        lock(&self.a2dp).out_enabled
    }

    /// Wireless transport latency while A2DP offload carries the active output.
    pub fn a2dp_latency_ms(&self) -> Option<u32> {
        let device = self.active_playback().device;
        let a2dp = lock(&self.a2dp);
        if !a2dp.out_enabled || !device.is_bt_a2dp() {
            return None;
        }
        Some(a2dp.delay_ms.max(a2dp.default_delay_ms))
    }

    pub fn a2dp_service_died(&self) {
        lock(&self.a2dp).proxy.service_died();
    }

    pub fn a2dp_status(&self) -> crate::a2dp::A2dpStatus {
        lock(&self.a2dp).proxy.status()
    }

    pub fn microphones(&self) -> &[MicrophoneInfo] {
        &self.board.microphones
    }

    pub fn get_microphones(&self, query_only: bool) -> Microphones {
        if query_only {
            info!("requested number of microphones, return {}", self.board.microphones.len());
            return Microphones::Count(self.board.microphones.len());
        }
        Microphones::List(self.board.microphones.clone())
    }

    pub fn check_configurations(&self, key: &str) -> Option<String> {
        self.board.capabilities.query(key)
    }

    /// Starts the offload session and pushes the encoder parameters to the
    /// DSP. Caller holds the A2DP lock.
    fn bta2dp_playback_start(&self, a2dp: &mut A2dpContext) {
        if !a2dp.out_enabled {
            return;
        }
        if let Err(e) = a2dp.proxy.start() {
            warn!("A2DP offload start failed: {e}");
            return;
        }
        match a2dp.proxy.codec_config() {
            Ok(config) => {
                self.set_mixer_value_array(controls::A2DP_OFFLOAD_PARAMS, &config.encoder_params());
                a2dp.default_delay_ms = config.default_delay_ms();
                info!("A2DP offload started with {config:?}");
            }
            Err(e) => error!("failed to get A2DP codec config: {e}"),
        }
    }

    fn bta2dp_playback_stop(&self, a2dp: &mut A2dpContext) {
        if a2dp.out_enabled {
            if let Err(e) = a2dp.proxy.stop() {
                warn!("A2DP offload stop failed: {e}");
            }
        }
    }

    fn set_a2dp_suspend_mixer(&self, on: bool, device: AudioDevice) {
        self.set_mixer_value_array(controls::A2DP_SUSPEND_PARAMS, &u32::from(on).to_le_bytes());
        if device.is_bt_a2dp() {
            if on {
                self.set_mixer_value_string(controls::SPUS_OUT6, "RESERVED");
                self.set_mixer_value_string(controls::SIFS2, "RESERVED");
            } else {
                self.set_mixer_value_string(controls::SPUS_OUT6, "SIFS2");
                self.set_mixer_value_string(controls::SIFS2, "SPUS OUT6");
            }
        }
    }

    fn enable_a2dp_offload(&self, a2dp: &mut A2dpContext, device: AudioDevice) -> Result<(), ProxyError> {
        if a2dp.out_enabled {
            return Ok(());
        }
        a2dp.proxy
            .open()
            .map_err(|e| ProxyError::Io(e.to_string()))?;
        a2dp.out_enabled = true;
        info!("set BT A2DP Offload Enabled & Open A2DP");
        if a2dp.suspended {
            if let Err(e) = a2dp.proxy.suspend() {
                warn!("A2DP suspend on open failed: {e}");
            }
            self.set_a2dp_suspend_mixer(true, device);
        } else if device.is_bt_a2dp() {
            self.bta2dp_playback_start(a2dp);
        }
        Ok(())
    }

    fn disable_a2dp_offload(&self, a2dp: &mut A2dpContext) -> Result<(), ProxyError> {
        if !a2dp.out_enabled {
            return Ok(());
        }
        a2dp.proxy
            .close()
            .map_err(|e| ProxyError::Io(e.to_string()))?;
        a2dp.out_enabled = false;
        a2dp.delay_ms = 0;
        info!("set BT A2DP Offload Disabled & Close A2DP");
        Ok(())
    }

    /// Framework `key=value` parameters: BT A2DP offload session control
    /// first, then USB connection changes.
    pub fn set_parameters(&self, parms: &StrParms) -> Result<(), ProxyError> {
        let device = self.active_playback().device;
        let mut status = Ok(());
        if self.options.support_bta2dp {
            let mut a2dp = lock(&self.a2dp);
            let a2dp = &mut *a2dp;

            if let Some(mask) = parms.get_int(keys::DEVICE_CONNECT).filter(|m| a2dp_mask::is_a2dp(*m)) {
                info!("connected BT A2DP Out Device {mask:#x}");
                let offload = parms
                    .get_int(keys::A2DP_FORMAT)
                    .and_then(|f| u32::try_from(f).ok())
                    .is_some_and(is_bt_offload_format);
                if offload {
                    status = status.and(self.enable_a2dp_offload(a2dp, device));
                }
            }
            if let Some(mask) = parms.get_int(keys::DEVICE_DISCONNECT).filter(|m| a2dp_mask::is_a2dp(*m)) {
                info!("disconnected BT A2DP Out Device {mask:#x}");
                status = status.and(self.disable_a2dp_offload(a2dp));
            }
            if let Some(value) = parms.get_str(keys::A2DP_SUSPENDED) {
                let was_suspended = a2dp.proxy.is_suspended();
                if value.starts_with("true") {
                    if a2dp.out_enabled {
                        if let Err(e) = a2dp.proxy.suspend() {
                            warn!("A2DP suspend failed: {e}");
                        }
                        info!("set A2DP Suspend Flag");
                    }
                    self.set_a2dp_suspend_mixer(true, device);
                    a2dp.suspended = true;
                } else {
                    if let Err(e) = a2dp.proxy.clear_suspend() {
                        warn!("A2DP clear suspend failed: {e}");
                    }
                    if device.is_bt_a2dp() && was_suspended {
                        self.bta2dp_playback_start(a2dp);
                    }
                    info!("cleared A2DP Suspend Flag");
                    self.set_a2dp_suspend_mixer(false, device);
                    a2dp.suspended = false;
                }
            }
            if let Some(value) = parms.get_int(keys::BT_OFFLOAD_ENABLE) {
                if value == 1 {
                    status = status.and(self.enable_a2dp_offload(a2dp, device));
                } else if value == 0 {
                    status = status.and(self.disable_a2dp_offload(a2dp));
                }
            }
            if let Some(report) = parms.get_int(keys::A2DP_DELAY_REPORT) {
                let report = u32::try_from(report).unwrap_or(0);
                let cal = self.options.a2dp_cal_latency_ms;
                a2dp.delay_ms = report.saturating_sub(cal);
                info!("A2DP delay report {report} ms, delay {} ms", a2dp.delay_ms);
            }
            if let Some(value) = parms.get_str(keys::A2DP_RECONFIG) {
                if a2dp.out_enabled && value == "true" && device.is_bt_a2dp() {
                    info!("reconfigure A2DP offload session");
                    self.bta2dp_playback_stop(a2dp);
                    self.bta2dp_playback_start(a2dp);
                }
            }
        }

        match self.usb.set_parameters(parms) {
            ClockSourceUpdate::Keep => {}
            ClockSourceUpdate::Probe => {
                let single = self.get_mixer_value_int(controls::USB_CLOCKSOURCE) > 0;
                self.usb_single_clksrc.store(single, Ordering::Relaxed);
                info!("USB single clock source {single}");
            }
            ClockSourceUpdate::Reset => self.usb_single_clksrc.store(false, Ordering::Relaxed),
        }
        status
    }

    /// USB capability strings for streams without a fixed attribute.
    pub fn get_usb_parameters(
        &self,
        direction: crate::usb::UsbDirection,
        query: &StrParms,
        reply: &mut StrParms,
    ) {
        self.usb.get_stream_parameters(direction, query, reply);
    }

    pub fn dump(&self) -> serde_json::Value {
        let state = self.state();
        let nodes: Vec<InternalNode> = state.nodes.keys().copied().collect();
        let a2dp = lock(&self.a2dp);
        let mixer = self.mixer_read();
        json!({
            "playback": state.playback,
            "capture": state.capture,
            "nodes": nodes,
            "call_state": state.call_state,
            "audio_mode": state.audio_mode,
            "primary_out": state.primary_out,
            "mixer_paths": mixer.xml_path.as_deref().map(Path::to_path_buf),
            "mixer_open": mixer.mixer.is_some(),
            "a2dp": {
                "status": a2dp.proxy.status().as_str(),
                "prev_status": a2dp.proxy.prev_status().as_str(),
                "out_enabled": a2dp.out_enabled,
                "suspended": a2dp.suspended,
                "delay_ms": a2dp.delay_ms,
                "default_delay_ms": a2dp.default_delay_ms,
            },
            "usb": self.usb.dump(),
            "usb_single_clksrc": self.is_usb_single_clksrc(),
            "dual_speaker": self.support_dualspk(),
            "microphones": self.board.microphones.len(),
        })
    }
}

impl Drop for DeviceProxy {
    fn drop(&mut self) {
        self.join_recovery();
        info!("audio device proxy destroyed");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::a2dp::{A2dpService, A2dpStatus};
    use crate::hw::memory::{MemoryBackend, MemoryMixer};
    use std::sync::atomic::AtomicUsize;

    pub(crate) const MIXER_PATHS: &str = "/vendor/etc/mixer_paths.xml";

    #[derive(Default)]
    pub(crate) struct FakeA2dp {
        pub starts: AtomicUsize,
        pub stops: AtomicUsize,
    }

    impl A2dpService for FakeA2dp {
        fn open_stream(&self) -> i32 {
            0
        }
        fn close_stream(&self) -> i32 {
            0
        }
        fn start_stream(&self) -> i32 {
            self.starts.fetch_add(1, Ordering::Relaxed);
            0
        }
        fn stop_stream(&self) -> i32 {
            self.stops.fetch_add(1, Ordering::Relaxed);
            0
        }
        fn suspend_stream(&self) -> i32 {
            0
        }
        fn clear_suspend_flag(&self) -> i32 {
            0
        }
        fn codec_config(&self) -> Result<Vec<u8>, i32> {
            Err(-1)
        }
    }

    pub(crate) struct FakeConnector(pub Option<Arc<FakeA2dp>>);

    impl A2dpServiceConnector for FakeConnector {
        fn connect(&self) -> Option<Arc<dyn A2dpService>> {
            self.0.clone().map(|s| s as Arc<dyn A2dpService>)
        }
    }

    pub(crate) fn proxy_with(
        mixer: MemoryMixer,
        options: ProxyOptions,
    ) -> (MemoryBackend, Arc<FakeA2dp>, Arc<DeviceProxy>) {
        let backend = MemoryBackend::with_mixer(mixer);
        let service = Arc::new(FakeA2dp::default());
        let proxy = DeviceProxy::new(
            Arc::new(backend.clone()),
            options,
            Arc::new(FakeConnector(Some(service.clone()))),
        )
        .with_usb_paths("/proc/asound", "/vendor/etc");
        proxy.init();
        assert!(proxy.init_route(Path::new(MIXER_PATHS)));
        (backend, service, Arc::new(proxy))
    }

    pub(crate) fn proxy_with_route(mixer: MemoryMixer) -> (MemoryBackend, Arc<DeviceProxy>) {
        let (backend, _, proxy) = proxy_with(mixer, ProxyOptions::default());
        (backend, proxy)
    }

    fn a2dp_parms(text: &str) -> StrParms {
        StrParms::parse(text)
    }

    #[test]
    fn init_leaves_every_route_idle() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        assert!(proxy.active_playback().is_idle());
        assert!(proxy.active_capture().is_idle());
        assert!(proxy.open_nodes().is_empty());
        assert_eq!(proxy.a2dp_status(), A2dpStatus::Init);
    }

    #[test]
    fn offload_connect_opens_session_once() {
        let (_backend, _service, proxy) = proxy_with(MemoryMixer::default(), ProxyOptions::default());
        let connect = format!(
            "connect={};format={}",
            a2dp_mask::OUT_BLUETOOTH_A2DP,
            crate::types::audio_format::SBC
        );
        proxy.set_parameters(&a2dp_parms(&connect)).unwrap();
        assert!(proxy.is_a2dp_out_enabled());
        assert_eq!(proxy.a2dp_status(), A2dpStatus::Standby);

        proxy.set_parameters(&a2dp_parms(&connect)).unwrap();
        assert_eq!(proxy.a2dp_status(), A2dpStatus::Standby);

        proxy
            .set_parameters(&a2dp_parms(&format!("disconnect={}", a2dp_mask::OUT_BLUETOOTH_A2DP)))
            .unwrap();
        assert!(!proxy.is_a2dp_out_enabled());
        assert_eq!(proxy.a2dp_status(), A2dpStatus::Init);
    }

    #[test]
    fn non_offload_format_is_ignored() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        let connect = format!(
            "connect={};format={}",
            a2dp_mask::OUT_BLUETOOTH_A2DP,
            crate::types::audio_format::PCM_16_BIT
        );
        proxy.set_parameters(&a2dp_parms(&connect)).unwrap();
        assert!(!proxy.is_a2dp_out_enabled());
    }

    #[test]
    fn delay_report_subtracts_calibration() {
        let options = ProxyOptions {
            a2dp_cal_latency_ms: 40,
            ..ProxyOptions::default()
        };
        let (_backend, _service, proxy) = proxy_with(MemoryMixer::default(), options);
        proxy.set_parameters(&a2dp_parms("bt_offload_enable=1")).unwrap();
        proxy.set_parameters(&a2dp_parms("A2dpDelayReport=250")).unwrap();
        proxy.set_route(
            AudioUsage::Media,
            AudioDevice::BtA2dpHeadphone,
            RouteModifier::None,
            true,
        );
        assert_eq!(proxy.a2dp_latency_ms(), Some(210));
        proxy.set_parameters(&a2dp_parms("A2dpDelayReport=30")).unwrap();
        assert_eq!(proxy.a2dp_latency_ms(), Some(0));

        proxy.set_parameters(&a2dp_parms("bt_offload_enable=0")).unwrap();
        assert_eq!(proxy.a2dp_latency_ms(), None);
    }

    #[test]
    fn suspend_rewires_output_mux_on_a2dp() {
        let (backend, _service, proxy) = proxy_with(MemoryMixer::default(), ProxyOptions::default());
        proxy.set_parameters(&a2dp_parms("bt_offload_enable=1")).unwrap();
        proxy.set_route(
            AudioUsage::Media,
            AudioDevice::BtA2dpHeadphone,
            RouteModifier::None,
            true,
        );
        proxy.set_parameters(&a2dp_parms("A2dpSuspended=true")).unwrap();
        let mixer = backend.mixer();
        assert_eq!(mixer.enum_value(controls::SPUS_OUT6).as_deref(), Some("RESERVED"));
        assert_eq!(
            mixer.array(controls::A2DP_SUSPEND_PARAMS),
            Some(1u32.to_le_bytes().to_vec())
        );
        assert_eq!(proxy.a2dp_status(), A2dpStatus::Suspended);

        proxy.set_parameters(&a2dp_parms("A2dpSuspended=false")).unwrap();
        assert_eq!(mixer.enum_value(controls::SIFS2).as_deref(), Some("SPUS OUT6"));
        assert_eq!(proxy.a2dp_status(), A2dpStatus::Started);
    }

    #[test]
    fn reconfig_restarts_the_session() {
        let (_backend, service, proxy) = proxy_with(MemoryMixer::default(), ProxyOptions::default());
        proxy.set_parameters(&a2dp_parms("bt_offload_enable=1")).unwrap();
        proxy.set_route(
            AudioUsage::Media,
            AudioDevice::BtA2dpHeadphone,
            RouteModifier::None,
            true,
        );
        let starts = service.starts.load(Ordering::Relaxed);
        proxy.set_parameters(&a2dp_parms("reconfigA2dp=true")).unwrap();
        assert_eq!(service.stops.load(Ordering::Relaxed), 1);
        assert_eq!(service.starts.load(Ordering::Relaxed), starts + 1);
    }

    #[test]
    fn usb_connect_probes_clock_source() {
        let (backend, proxy) = proxy_with_route(MemoryMixer::default());
        backend.mixer().set_value(controls::USB_CLOCKSOURCE, 0, 1).unwrap();
        backend.set_file(
            "/proc/asound/card1/stream0",
            "Playback:\n  Altset 1\n    Format: S16_LE\n    Channels: 2\n    Rates: 48000\n",
        );
        proxy
            .set_parameters(&StrParms::parse("connect=16384;card=1;device=0"))
            .unwrap();
        assert!(proxy.usb().is_playback_connected());
        assert!(proxy.is_usb_single_clksrc());
        proxy
            .set_parameters(&StrParms::parse("disconnect=16384"))
            .unwrap();
        assert!(!proxy.is_usb_single_clksrc());
    }

    #[test]
    fn primary_out_is_exclusive() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        assert!(proxy.register_primary_out());
        assert!(!proxy.register_primary_out());
        proxy.release_primary_out();
        assert!(proxy.register_primary_out());
    }

    #[test]
    fn dump_reports_routes_and_nodes() {
        let (_backend, proxy) = proxy_with_route(MemoryMixer::default());
        proxy.set_route(AudioUsage::CpCallWb, AudioDevice::Headset, RouteModifier::None, true);
        let dump = proxy.dump();
        assert_eq!(dump["playback"]["device"], "Headset");
        assert_eq!(dump["nodes"][0], "ErapIn");
        assert_eq!(dump["a2dp"]["status"], proxy.a2dp_status().as_str());
    }
}
