pub mod config;
pub mod logging;

pub use abox_proxy;
pub use config::BoardConfig;

use abox_proxy::a2dp::A2dpServiceConnector;
use abox_proxy::device::{BoardInfo, DeviceProxy};
use abox_proxy::hw::AudioBackend;
use abox_proxy::params::StrParms;
use abox_proxy::stream::{AudioConfig, CaptureStream, PlaybackStream};
use abox_proxy::types::{AudioUsage, CaptureType, PlaybackType};
use abox_proxy::ProxyError;
use std::sync::Arc;
use tracing::info;

/// The process-wide audio HAL: one device proxy shared by every stream.
pub struct AudioHal {
    config: BoardConfig,
    proxy: Arc<DeviceProxy>,
}

impl AudioHal {
    pub fn open(
        config: BoardConfig,
        backend: Arc<dyn AudioBackend>,
        a2dp: Arc<dyn A2dpServiceConnector>,
    ) -> Result<Self, String> {
        logging::init(&config.log_level);

        let board = match &config.board_info {
            Some(path) => BoardInfo::load(backend.as_ref(), path, config.capabilities()),
            None => BoardInfo {
                capabilities: config.capabilities(),
                ..BoardInfo::default()
            },
        };
        let proxy = DeviceProxy::new(backend, config.proxy_options(), a2dp)
            .with_usb_paths(config.proc_asound.clone(), config.usb_gain_dir.clone())
            .with_board_info(board);
        proxy.init();
        if !proxy.init_route(&config.mixer_paths) {
            proxy.deinit();
            return Err(format!(
                "Failed to init audio route from '{}'",
                config.mixer_paths.display()
            ));
        }
        info!("audio HAL opened on card {}", config.mixer_card);
        Ok(Self {
            config,
            proxy: Arc::new(proxy),
        })
    }

    #[cfg(target_os = "linux")]
    pub fn open_alsa(
        config: BoardConfig,
        a2dp: Arc<dyn A2dpServiceConnector>,
    ) -> Result<Self, String> {
        Self::open(config, Arc::new(abox_proxy::hw::alsa::AlsaBackend), a2dp)
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn proxy(&self) -> &Arc<DeviceProxy> {
        &self.proxy
    }

    pub fn open_output_stream(
        &self,
        stream_type: PlaybackType,
        config: AudioConfig,
    ) -> Result<PlaybackStream, ProxyError> {
        PlaybackStream::new(self.proxy.clone(), stream_type, config)
    }

    pub fn open_input_stream(
        &self,
        stream_type: CaptureType,
        usage: AudioUsage,
        config: AudioConfig,
    ) -> Result<CaptureStream, ProxyError> {
        CaptureStream::new(self.proxy.clone(), stream_type, usage, config)
    }

    pub fn set_parameters(&self, kvpairs: &str) -> Result<(), ProxyError> {
        self.proxy.set_parameters(&StrParms::parse(kvpairs))
    }

    /// Board capability lookup, `None` for keys the board does not describe.
    pub fn check_configuration(&self, key: &str) -> Option<String> {
        self.proxy.check_configurations(key)
    }

    pub fn dump(&self) -> String {
        self.proxy.dump().to_string()
    }
}

impl Drop for AudioHal {
    fn drop(&mut self) {
        self.proxy.deinit();
        info!("audio HAL closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abox_proxy::a2dp::A2dpService;
    use abox_proxy::hw::memory::MemoryBackend;
    use abox_proxy::types::{AudioDevice, RouteModifier, audio_format, channel_mask};

    struct NoA2dp;

    impl A2dpServiceConnector for NoA2dp {
        fn connect(&self) -> Option<Arc<dyn A2dpService>> {
            None
        }
    }

    fn hal(config: BoardConfig) -> (MemoryBackend, AudioHal) {
        let backend = MemoryBackend::default();
        let hal = AudioHal::open(config, Arc::new(backend.clone()), Arc::new(NoA2dp)).unwrap();
        (backend, hal)
    }

    #[test]
    fn opens_with_board_capabilities() {
        let config = BoardConfig::from_toml_str("num_speaker = 2\nfmradio = \"internal\"").unwrap();
        let (_backend, hal) = hal(config);
        assert_eq!(hal.check_configuration("num_speaker").as_deref(), Some("2"));
        assert_eq!(hal.check_configuration("fmradio").as_deref(), Some("internal"));
        assert_eq!(hal.check_configuration("unknown"), None);
        assert!(hal.proxy().active_playback().is_idle());
    }

    #[test]
    fn route_failure_is_reported() {
        let backend = MemoryBackend::default();
        backend.set_route_init_fails(true);
        let opened = AudioHal::open(BoardConfig::default(), Arc::new(backend), Arc::new(NoA2dp));
        assert!(opened.is_err());
    }

    #[test]
    fn streams_share_the_device_proxy() {
        let (_backend, hal) = hal(BoardConfig::default());
        hal.proxy()
            .set_route(AudioUsage::Media, AudioDevice::Speaker, RouteModifier::None, true);
        let config = AudioConfig::pcm(48000, channel_mask::OUT_STEREO, audio_format::PCM_16_BIT);
        let mut out = hal.open_output_stream(PlaybackType::LowLatency, config).unwrap();
        out.open(0).unwrap();
        out.write(&[0; 96 * 4]).unwrap();
        assert_eq!(out.frames_written(), 96);

        let dump: String = hal.dump();
        assert!(dump.contains("\"Speaker\""));
    }
}
