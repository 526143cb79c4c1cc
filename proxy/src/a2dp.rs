//! Bluetooth A2DP offload session. The vendor offload service owns the
//! actual link; this side tracks the session state and translates the codec
//! blob it hands out into the encoder parameters the DSP expects.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const SBC_CODEC_TAG: u32 = 0x1F00_0000;
pub const APTX_CODEC_TAG: u32 = 0x2000_0000;

pub const ENC_MEDIA_FMT_SBC: u32 = 0x0001_0BF2;
pub const ENC_MEDIA_FMT_APTX: u32 = 0x0001_31FF;

const PCM_CHANNEL_L: u32 = 1;
const PCM_CHANNEL_R: u32 = 2;
const PCM_CHANNEL_C: u32 = 3;

/// Transport latency assumed until the stack reports a larger delay.
pub const A2DP_SBC_DEFAULT_DELAY_MS: u32 = 150;
pub const A2DP_APTX_DEFAULT_DELAY_MS: u32 = 200;

/// Audio format bit set on every A2DP offload format announced at connect.
pub const BT_OFFLOAD_FORMAT_FLAG: u32 = 0x20_0000;

pub fn is_bt_offload_format(format: u32) -> bool {
    format & BT_OFFLOAD_FORMAT_FLAG == BT_OFFLOAD_FORMAT_FLAG
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum A2dpStatus {
    None,
    Init,
    Standby,
    Started,
    Suspended,
}

impl A2dpStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "A2DP_STATUS_NONE",
            Self::Init => "A2DP_STATUS_INIT",
            Self::Standby => "A2DP_STATUS_STANDBY",
            Self::Started => "A2DP_STATUS_STARTED",
            Self::Suspended => "A2DP_STATUS_SUSPENDED",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum A2dpError {
    ServiceUnavailable,
    InvalidState(A2dpStatus),
    Service(i32),
}

impl fmt::Display for A2dpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceUnavailable => write!(f, "A2DP offload service unavailable"),
            Self::InvalidState(status) => write!(f, "abnormal A2DP status {}", status.as_str()),
            Self::Service(code) => write!(f, "A2DP offload service failed with {code}"),
        }
    }
}

impl std::error::Error for A2dpError {}

/// Calls into the vendor offload service. Each call returns the service's
/// status code, `0` on success.
pub trait A2dpService: Send + Sync {
    fn open_stream(&self) -> i32;
    fn close_stream(&self) -> i32;
    fn start_stream(&self) -> i32;
    fn stop_stream(&self) -> i32;
    fn suspend_stream(&self) -> i32;
    fn clear_suspend_flag(&self) -> i32;
    /// Shared-memory codec blob: a codec tag followed by the codec struct.
    fn codec_config(&self) -> Result<Vec<u8>, i32>;
}

/// Looks the offload service up. `None` means the service is not registered.
pub trait A2dpServiceConnector: Send + Sync {
    fn connect(&self) -> Option<Arc<dyn A2dpService>>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SbcEncoderConfig {
    pub subband: u32,
    pub blk_len: u32,
    pub sampling_rate: u16,
    pub channels: u8,
    pub alloc: u8,
    pub min_bitpool: u8,
    pub max_bitpool: u8,
    pub bitrate: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AptxEncoderConfig {
    pub sampling_rate: u16,
    pub channels: u8,
    pub bitrate: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum A2dpCodecConfig {
    Sbc(SbcEncoderConfig),
    Aptx(AptxEncoderConfig),
}

const SBC_CONFIG_LEN: usize = 20;
const APTX_CONFIG_LEN: usize = 8;

impl A2dpCodecConfig {
    pub fn decode(blob: &[u8]) -> Result<Self, String> {
        if blob.len() < 4 {
            return Err(format!("A2DP codec blob too short ({} bytes)", blob.len()));
        }
        let tag = LittleEndian::read_u32(&blob[..4]);
        let body = &blob[4..];
        match tag {
            SBC_CODEC_TAG => {
                if body.len() < SBC_CONFIG_LEN {
                    return Err("truncated SBC codec config".to_string());
                }
                Ok(Self::Sbc(SbcEncoderConfig {
                    subband: LittleEndian::read_u32(&body[0..4]),
                    blk_len: LittleEndian::read_u32(&body[4..8]),
                    sampling_rate: LittleEndian::read_u16(&body[8..10]),
                    channels: body[10],
                    alloc: body[11],
                    min_bitpool: body[12],
                    max_bitpool: body[13],
                    bitrate: LittleEndian::read_u32(&body[16..20]),
                }))
            }
            APTX_CODEC_TAG => {
                if body.len() < APTX_CONFIG_LEN {
                    return Err("truncated aptX codec config".to_string());
                }
                Ok(Self::Aptx(AptxEncoderConfig {
                    sampling_rate: LittleEndian::read_u16(&body[0..2]),
                    channels: body[2],
                    bitrate: LittleEndian::read_u32(&body[4..8]),
                }))
            }
            other => Err(format!("unsupported A2DP codec type {other:#x}")),
        }
    }

    /// Seven packed little-endian words in the layout of the DSP encoder.
    pub fn encoder_params(&self) -> Vec<u8> {
        let words: [u32; 7] = match self {
            Self::Sbc(sbc) => [
                ENC_MEDIA_FMT_SBC,
                sbc.subband,
                sbc.blk_len,
                u32::from(sbc.channels),
                u32::from(sbc.alloc),
                sbc.bitrate,
                u32::from(sbc.sampling_rate),
            ],
            Self::Aptx(aptx) => {
                let channels = u32::from(aptx.channels);
                let mapping = if channels == 1 {
                    [PCM_CHANNEL_C, 0]
                } else {
                    [PCM_CHANNEL_L, PCM_CHANNEL_R]
                };
                [
                    ENC_MEDIA_FMT_APTX,
                    u32::from(aptx.sampling_rate),
                    channels,
                    0,
                    mapping[0],
                    mapping[1],
                    0,
                ]
            }
        };
        let mut out = vec![0u8; words.len() * 4];
        LittleEndian::write_u32_into(&words, &mut out);
        out
    }

    pub fn default_delay_ms(&self) -> u32 {
        match self {
            Self::Sbc(_) => A2DP_SBC_DEFAULT_DELAY_MS,
            Self::Aptx(_) => A2DP_APTX_DEFAULT_DELAY_MS,
        }
    }
}

fn service_result(op: &str, code: i32) -> Result<(), A2dpError> {
    if code == 0 {
        Ok(())
    } else {
        error!("A2DP stream {op} failed with {code}");
        Err(A2dpError::Service(code))
    }
}

/// Session state machine. Not internally locked: the owner serializes every
/// call, including start/codec-config/stop sequences.
pub struct A2dpProxy {
    connector: Arc<dyn A2dpServiceConnector>,
    service: Option<Arc<dyn A2dpService>>,
    service_exists: bool,
    status: A2dpStatus,
    prev_status: A2dpStatus,
}

impl fmt::Debug for A2dpProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("A2dpProxy")
            .field("status", &self.status)
            .field("prev_status", &self.prev_status)
            .field("service", &self.service.is_some())
            .finish()
    }
}

impl A2dpProxy {
    pub fn new(connector: Arc<dyn A2dpServiceConnector>) -> Self {
        Self {
            connector,
            service: None,
            service_exists: true,
            status: A2dpStatus::None,
            prev_status: A2dpStatus::None,
        }
    }

    pub fn status(&self) -> A2dpStatus {
        self.status
    }

    pub fn prev_status(&self) -> A2dpStatus {
        self.prev_status
    }

    pub fn is_suspended(&self) -> bool {
        self.status == A2dpStatus::Suspended
    }

    /// Death notification: drop the cached handle so the next call looks the
    /// service up again.
    pub fn service_died(&mut self) {
        error!("A2DP offload service died");
        self.service = None;
    }

    fn service(&mut self) -> Result<Arc<dyn A2dpService>, A2dpError> {
        if self.service.is_none() && self.service_exists {
            self.service = self.connector.connect();
            if self.service.is_none() {
                error!("Unable to get A2DP offload service");
                self.service_exists = false;
            }
        }
        self.service.clone().ok_or(A2dpError::ServiceUnavailable)
    }

    fn transit(&mut self, op: &str, to: A2dpStatus) {
        self.prev_status = self.status;
        self.status = to;
        info!(
            "a2dp {op}: transit to {} from {}",
            self.status.as_str(),
            self.prev_status.as_str()
        );
    }

    fn require(&self, op: &str, allowed: &[A2dpStatus]) -> Result<(), A2dpError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            info!("a2dp {op}: ignored as {}", self.status.as_str());
            Err(A2dpError::InvalidState(self.status))
        }
    }

    pub fn init(&mut self) {
        self.status = A2dpStatus::Init;
        self.prev_status = A2dpStatus::None;
        info!("a2dp init: transit to {}", self.status.as_str());
    }

    pub fn deinit(&mut self) {
        self.status = A2dpStatus::None;
        self.service = None;
        info!("a2dp deinit: transit to {}", self.status.as_str());
    }

    pub fn open(&mut self) -> Result<(), A2dpError> {
        let service = self.service()?;
        self.require("open", &[A2dpStatus::Init])?;
        service_result("open", service.open_stream())?;
        self.transit("open", A2dpStatus::Standby);
        Ok(())
    }

    /// Stops a running stream first, then closes the session.
    pub fn close(&mut self) -> Result<(), A2dpError> {
        let service = self.service()?;
        if self.status == A2dpStatus::Started
            && service_result("stop", service.stop_stream()).is_ok()
        {
            self.transit("close", A2dpStatus::Standby);
        }
        service_result("close", service.close_stream())?;
        self.transit("close", A2dpStatus::Init);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), A2dpError> {
        let service = self.service()?;
        self.require("start", &[A2dpStatus::Standby])?;
        service_result("start", service.start_stream())?;
        self.transit("start", A2dpStatus::Started);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), A2dpError> {
        let service = self.service()?;
        self.require("stop", &[A2dpStatus::Started])?;
        service_result("stop", service.stop_stream())?;
        self.transit("stop", A2dpStatus::Standby);
        Ok(())
    }

    pub fn suspend(&mut self) -> Result<(), A2dpError> {
        let service = self.service()?;
        self.require("suspend", &[A2dpStatus::Standby, A2dpStatus::Started])?;
        service_result("suspend", service.suspend_stream())?;
        self.transit("suspend", A2dpStatus::Suspended);
        Ok(())
    }

    /// Succeeds without a transition when the session is not suspended.
    pub fn clear_suspend(&mut self) -> Result<(), A2dpError> {
        let service = self.service()?;
        let code = service.clear_suspend_flag();
        if code == 0 && self.status == A2dpStatus::Suspended {
            self.transit("clear-suspend", A2dpStatus::Standby);
        } else {
            info!("a2dp clear-suspend: ignored as {}", self.status.as_str());
        }
        Ok(())
    }

    pub fn codec_config(&mut self) -> Result<A2dpCodecConfig, A2dpError> {
        let service = self.service()?;
        self.require("codec-config", &[A2dpStatus::Started])?;
        let blob = service.codec_config().map_err(|code| {
            error!("A2DP stream did not get codec config: {code}");
            A2dpError::Service(code)
        })?;
        A2dpCodecConfig::decode(&blob).map_err(|e| {
            warn!("{e}");
            A2dpError::Service(-1)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub(crate) struct FakeService {
        pub calls: Mutex<Vec<&'static str>>,
        pub fail: Mutex<Option<&'static str>>,
        pub blob: Mutex<Vec<u8>>,
    }

    impl FakeService {
        fn record(&self, op: &'static str) -> i32 {
            self.calls.lock().unwrap().push(op);
            if *self.fail.lock().unwrap() == Some(op) { -1 } else { 0 }
        }
    }

    impl A2dpService for FakeService {
        fn open_stream(&self) -> i32 {
            self.record("open")
        }
        fn close_stream(&self) -> i32 {
            self.record("close")
        }
        fn start_stream(&self) -> i32 {
            self.record("start")
        }
        fn stop_stream(&self) -> i32 {
            self.record("stop")
        }
        fn suspend_stream(&self) -> i32 {
            self.record("suspend")
        }
        fn clear_suspend_flag(&self) -> i32 {
            self.record("clear_suspend")
        }
        fn codec_config(&self) -> Result<Vec<u8>, i32> {
            self.record("codec_config");
            Ok(self.blob.lock().unwrap().clone())
        }
    }

    pub(crate) struct FakeConnector {
        pub service: Option<Arc<FakeService>>,
        pub lookups: AtomicUsize,
    }

    impl A2dpServiceConnector for FakeConnector {
        fn connect(&self) -> Option<Arc<dyn A2dpService>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.service
                .clone()
                .map(|s| s as Arc<dyn A2dpService>)
        }
    }

    pub(crate) fn sbc_blob() -> Vec<u8> {
        let mut blob = vec![0u8; 24];
        LittleEndian::write_u32(&mut blob[0..4], SBC_CODEC_TAG);
        LittleEndian::write_u32(&mut blob[4..8], 8);
        LittleEndian::write_u32(&mut blob[8..12], 16);
        LittleEndian::write_u16(&mut blob[12..14], 48000);
        blob[14] = 3;
        blob[15] = 1;
        blob[16] = 2;
        blob[17] = 51;
        LittleEndian::write_u32(&mut blob[20..24], 328_000);
        blob
    }

    fn proxy() -> (Arc<FakeService>, Arc<FakeConnector>, A2dpProxy) {
        let service = Arc::new(FakeService::default());
        let connector = Arc::new(FakeConnector {
            service: Some(service.clone()),
            lookups: AtomicUsize::new(0),
        });
        let mut a2dp = A2dpProxy::new(connector.clone());
        a2dp.init();
        (service, connector, a2dp)
    }

    #[test]
    fn start_only_from_standby() {
        let (_service, _connector, mut a2dp) = proxy();
        assert_eq!(
            a2dp.start(),
            Err(A2dpError::InvalidState(A2dpStatus::Init))
        );
        assert_eq!(a2dp.status(), A2dpStatus::Init);
        a2dp.open().unwrap();
        a2dp.start().unwrap();
        assert_eq!(a2dp.status(), A2dpStatus::Started);
        assert_eq!(a2dp.prev_status(), A2dpStatus::Standby);
        assert!(a2dp.start().is_err());
        assert_eq!(a2dp.status(), A2dpStatus::Started);
    }

    #[test]
    fn start_from_none_fails() {
        let (_service, connector, _) = proxy();
        let mut a2dp = A2dpProxy::new(connector);
        assert_eq!(
            a2dp.start(),
            Err(A2dpError::InvalidState(A2dpStatus::None))
        );
    }

    #[test]
    fn clear_suspend_is_noop_unless_suspended() {
        let (_service, _connector, mut a2dp) = proxy();
        a2dp.open().unwrap();
        assert_eq!(a2dp.clear_suspend(), Ok(()));
        assert_eq!(a2dp.status(), A2dpStatus::Standby);
        a2dp.suspend().unwrap();
        assert!(a2dp.is_suspended());
        a2dp.clear_suspend().unwrap();
        assert_eq!(a2dp.status(), A2dpStatus::Standby);
    }

    #[test]
    fn close_stops_a_started_stream() {
        let (service, _connector, mut a2dp) = proxy();
        a2dp.open().unwrap();
        a2dp.start().unwrap();
        a2dp.close().unwrap();
        assert_eq!(a2dp.status(), A2dpStatus::Init);
        assert_eq!(
            *service.calls.lock().unwrap(),
            vec!["open", "start", "stop", "close"]
        );
    }

    #[test]
    fn service_failure_keeps_state() {
        let (service, _connector, mut a2dp) = proxy();
        *service.fail.lock().unwrap() = Some("open");
        assert_eq!(a2dp.open(), Err(A2dpError::Service(-1)));
        assert_eq!(a2dp.status(), A2dpStatus::Init);
    }

    #[test]
    fn missing_service_is_not_looked_up_again() {
        let connector = Arc::new(FakeConnector {
            service: None,
            lookups: AtomicUsize::new(0),
        });
        let mut a2dp = A2dpProxy::new(connector.clone());
        a2dp.init();
        assert_eq!(a2dp.open(), Err(A2dpError::ServiceUnavailable));
        assert_eq!(a2dp.open(), Err(A2dpError::ServiceUnavailable));
        assert_eq!(a2dp.status(), A2dpStatus::Init);
        assert_eq!(connector.lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn death_forces_lookup() {
        let (_service, connector, mut a2dp) = proxy();
        a2dp.open().unwrap();
        a2dp.service_died();
        a2dp.start().unwrap();
        assert_eq!(connector.lookups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn codec_config_only_while_started() {
        let (service, _connector, mut a2dp) = proxy();
        *service.blob.lock().unwrap() = sbc_blob();
        a2dp.open().unwrap();
        assert!(a2dp.codec_config().is_err());
        a2dp.start().unwrap();
        let config = a2dp.codec_config().unwrap();
        let A2dpCodecConfig::Sbc(sbc) = config else {
            panic!("expected SBC, got {config:?}");
        };
        assert_eq!(sbc.subband, 8);
        assert_eq!(sbc.sampling_rate, 48000);
        assert_eq!(sbc.max_bitpool, 51);
        assert_eq!(sbc.bitrate, 328_000);
        assert_eq!(config.default_delay_ms(), A2DP_SBC_DEFAULT_DELAY_MS);

        let params = config.encoder_params();
        assert_eq!(params.len(), 28);
        assert_eq!(LittleEndian::read_u32(&params[0..4]), ENC_MEDIA_FMT_SBC);
        assert_eq!(LittleEndian::read_u32(&params[12..16]), 3);
        assert_eq!(LittleEndian::read_u32(&params[24..28]), 48000);
    }

    #[test]
    fn aptx_mono_maps_center_channel() {
        let mut blob = vec![0u8; 12];
        LittleEndian::write_u32(&mut blob[0..4], APTX_CODEC_TAG);
        LittleEndian::write_u16(&mut blob[4..6], 44100);
        blob[6] = 1;
        LittleEndian::write_u32(&mut blob[8..12], 352_000);
        let config = A2dpCodecConfig::decode(&blob).unwrap();
        let params = config.encoder_params();
        assert_eq!(LittleEndian::read_u32(&params[0..4]), ENC_MEDIA_FMT_APTX);
        assert_eq!(LittleEndian::read_u32(&params[4..8]), 44100);
        assert_eq!(LittleEndian::read_u32(&params[16..20]), 3);
        assert_eq!(LittleEndian::read_u32(&params[20..24]), 0);
        assert_eq!(config.default_delay_ms(), A2DP_APTX_DEFAULT_DELAY_MS);
    }

    #[test]
    fn offload_format_flag() {
        assert!(is_bt_offload_format(0x2000_0000 | BT_OFFLOAD_FORMAT_FLAG));
        assert!(!is_bt_offload_format(0x1F00_0000));
    }
}
