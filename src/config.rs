//! Board configuration. One TOML file describes what the board wires up;
//! anything left out keeps the stock value.

use abox_proxy::device::{BoardCapabilities, Placement};
use abox_proxy::hw::config::apply_env_overrides;
use abox_proxy::hw::options::ProxyOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoardConfig {
    pub mixer_card: u32,
    pub mixer_paths: PathBuf,
    pub board_info: Option<PathBuf>,
    pub usb_gain_dir: PathBuf,
    pub proc_asound: PathBuf,
    pub support_spkamp: bool,
    pub support_dualspk: bool,
    pub support_quad_mic: bool,
    pub direct_rcvspk: bool,
    pub usb_single_clksrc: bool,
    pub bluetooth: String,
    pub fmradio: String,
    pub usb_by_primary: bool,
    pub num_earpiece: u32,
    pub num_speaker: u32,
    pub num_proximity: u32,
    pub speaker_amp: bool,
    pub a2dp_cal_latency_ms: u32,
    pub log_level: String,
}

impl Default for BoardConfig {
    fn default() -> Self {
        let caps = BoardCapabilities::default();
        Self {
            mixer_card: 0,
            mixer_paths: PathBuf::from("/vendor/etc/mixer_paths.xml"),
            board_info: None,
            usb_gain_dir: PathBuf::from(abox_proxy::device::DEFAULT_USB_GAIN_DIR),
            proc_asound: PathBuf::from(abox_proxy::hw::config::DEFAULT_PROC_ASOUND),
            support_spkamp: false,
            support_dualspk: false,
            support_quad_mic: false,
            direct_rcvspk: false,
            usb_single_clksrc: false,
            bluetooth: caps.bluetooth.as_str().to_string(),
            fmradio: caps.fmradio.as_str().to_string(),
            usb_by_primary: caps.usb_by_primary,
            num_earpiece: caps.num_earpiece,
            num_speaker: caps.num_speaker,
            num_proximity: caps.num_proximity,
            speaker_amp: caps.speaker_amp,
            a2dp_cal_latency_ms: 0,
            log_level: "info".to_string(),
        }
    }
}

impl BoardConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {e}", path.display()))?;
        Self::from_toml_str(&text)
            .map_err(|e| format!("Failed to parse '{}': {e}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Capability flags for the device proxy, with environment overrides applied.
    pub fn proxy_options(&self) -> ProxyOptions {
        let mut options = ProxyOptions {
            mixer_card: self.mixer_card,
            support_spkamp: self.support_spkamp,
            support_dualspk: self.support_dualspk,
            support_quad_mic: self.support_quad_mic,
            direct_rcvspk: self.direct_rcvspk,
            usb_single_clksrc: self.usb_single_clksrc,
            a2dp_cal_latency_ms: self.a2dp_cal_latency_ms,
            ..ProxyOptions::default()
        };
        apply_env_overrides(&mut options);
        options
    }

    pub fn capabilities(&self) -> BoardCapabilities {
        BoardCapabilities {
            num_earpiece: self.num_earpiece,
            num_speaker: self.num_speaker,
            num_proximity: self.num_proximity,
            speaker_amp: self.speaker_amp,
            bluetooth: Placement::parse(&self.bluetooth),
            fmradio: Placement::parse(&self.fmradio),
            usb_by_primary: self.usb_by_primary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_keeps_defaults() {
        let config = BoardConfig::from_toml_str("").unwrap();
        assert_eq!(config, BoardConfig::default());
        assert_eq!(config.capabilities(), BoardCapabilities::default());
    }

    #[test]
    fn board_flags_reach_proxy_options() {
        let config = BoardConfig::from_toml_str(
            r#"
mixer_card = 1
mixer_paths = "/odm/etc/mixer_paths.xml"
support_quad_mic = true
support_dualspk = true
a2dp_cal_latency_ms = 40
bluetooth = "internal"
num_speaker = 2
log_level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.mixer_paths, PathBuf::from("/odm/etc/mixer_paths.xml"));
        assert_eq!(config.log_level, "debug");

        let options = config.proxy_options();
        assert_eq!(options.mixer_card, 1);
        assert!(options.support_quad_mic);
        assert!(options.support_dualspk);
        assert_eq!(options.a2dp_cal_latency_ms, 40);

        let caps = config.capabilities();
        assert_eq!(caps.bluetooth, Placement::Internal);
        assert_eq!(caps.num_speaker, 2);
        assert_eq!(caps.fmradio, Placement::External);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(BoardConfig::from_toml_str("mixer_card = \"zero\"").is_err());
        assert!(BoardConfig::load(Path::new("/nonexistent/board.toml")).is_err());
    }
}
