//! Board description: fixed capabilities and the microphone
//! characteristics table read from the board info XML.

use crate::hw::AudioBackend;
use crate::hw::xml::{self, XmlEvent};
use serde::Serialize;
use std::path::Path;
use tracing::{error, info, warn};

const CHARACTERISTICS_TAG: &str = "microphone_characteristics";
const MICROPHONE_TAG: &str = "microphone";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum MicrophoneDevice {
    #[default]
    BuiltinMic,
    BackMic,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum MicrophoneLocation {
    #[default]
    Unknown,
    Mainbody,
    MainbodyMovable,
    Peripheral,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum MicrophoneDirectionality {
    #[default]
    Unknown,
    Omni,
    BiDirectional,
    Cardioid,
    HyperCardioid,
    SuperCardioid,
}

impl MicrophoneDevice {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "AUDIO_DEVICE_IN_BUILTIN_MIC" => Some(Self::BuiltinMic),
            "AUDIO_DEVICE_IN_BACK_MIC" => Some(Self::BackMic),
            _ => None,
        }
    }
}

impl MicrophoneLocation {
    fn parse(s: &str) -> Option<Self> {
        match s.strip_prefix("AUDIO_MICROPHONE_LOCATION_")? {
            "UNKNOWN" => Some(Self::Unknown),
            "MAINBODY" => Some(Self::Mainbody),
            "MAINBODY_MOVABLE" => Some(Self::MainbodyMovable),
            "PERIPHERAL" => Some(Self::Peripheral),
            _ => None,
        }
    }
}

impl MicrophoneDirectionality {
    fn parse(s: &str) -> Option<Self> {
        match s.strip_prefix("AUDIO_MICROPHONE_DIRECTIONALITY_")? {
            "UNKNOWN" => Some(Self::Unknown),
            "OMNI" => Some(Self::Omni),
            "BI_DIRECTIONAL" => Some(Self::BiDirectional),
            "CARDIOID" => Some(Self::Cardioid),
            "HYPER_CARDIOID" => Some(Self::HyperCardioid),
            "SUPER_CARDIOID" => Some(Self::SuperCardioid),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MicrophoneInfo {
    pub device_id: String,
    pub id: i32,
    pub device: MicrophoneDevice,
    pub address: String,
    pub location: MicrophoneLocation,
    pub group: i32,
    pub index_in_the_group: i32,
    pub sensitivity: f32,
    pub max_spl: f32,
    pub min_spl: f32,
    pub directionality: MicrophoneDirectionality,
    pub frequencies: Vec<f32>,
    pub responses: Vec<f32>,
    pub geometric_location: [f32; 3],
    pub orientation: [f32; 3],
}

/// Count-only or full answer to a microphone query.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Microphones {
    Count(usize),
    List(Vec<MicrophoneInfo>),
}

/// Walks the attributes in document order; a key that is not where the
/// schema expects it is left at its default.
struct Cursor<'a> {
    attrs: &'a [(String, String)],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, key: &str) -> Option<&'a str> {
        let (k, v) = self.attrs.get(self.pos)?;
        if k != key {
            return None;
        }
        self.pos += 1;
        Some(v.as_str())
    }

    fn int(&mut self, key: &str) -> Option<i32> {
        self.take(key).and_then(|v| v.trim().parse().ok())
    }

    fn float(&mut self, key: &str) -> Option<f32> {
        self.take(key).and_then(|v| v.trim().parse().ok())
    }

    fn floats(&mut self, key: &str) -> Option<Vec<f32>> {
        self.take(key)
            .map(|v| v.split_whitespace().filter_map(|f| f.parse().ok()).collect())
    }

    fn vector(&mut self, key: &str) -> Option<[f32; 3]> {
        let values = self.floats(key)?;
        let mut out = [0.0; 3];
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = value;
        }
        Some(out)
    }
}

impl MicrophoneInfo {
    fn from_attrs(attrs: &[(String, String)]) -> Self {
        let mut c = Cursor { attrs, pos: 0 };
        let mut mic = Self::default();
        if let Some(v) = c.take("device_id") {
            mic.device_id = v.to_string();
        }
        if let Some(v) = c.int("id") {
            mic.id = v;
        }
        if let Some(v) = c.take("device").and_then(MicrophoneDevice::parse) {
            mic.device = v;
        }
        if let Some(v) = c.take("address") {
            mic.address = v.to_string();
        }
        if let Some(v) = c.take("location").and_then(MicrophoneLocation::parse) {
            mic.location = v;
        }
        if let Some(v) = c.int("group") {
            mic.group = v;
        }
        if let Some(v) = c.int("index_in_the_group") {
            mic.index_in_the_group = v;
        }
        if let Some(v) = c.float("sensitivity") {
            mic.sensitivity = v;
        }
        if let Some(v) = c.float("max_spl") {
            mic.max_spl = v;
        }
        if let Some(v) = c.float("min_spl") {
            mic.min_spl = v;
        }
        if let Some(v) = c
            .take("directionality")
            .and_then(MicrophoneDirectionality::parse)
        {
            mic.directionality = v;
        }
        if c.int("num_frequency_responses").unwrap_or(0) > 0 {
            mic.frequencies = c.floats("frequencies").unwrap_or_default();
            mic.responses = c.floats("responses").unwrap_or_default();
        }
        if let Some(v) = c.vector("geometric_location") {
            mic.geometric_location = v;
        }
        if let Some(v) = c.vector("orientation") {
            mic.orientation = v;
        }
        mic
    }
}

pub fn parse_microphones(text: &str) -> Result<Vec<MicrophoneInfo>, String> {
    let mut mics = Vec::new();
    let mut in_characteristics = false;
    for event in xml::parse(text)? {
        match event {
            XmlEvent::Start { name, .. } if name == CHARACTERISTICS_TAG => {
                in_characteristics = true;
            }
            XmlEvent::End { name } if name == CHARACTERISTICS_TAG => {
                in_characteristics = false;
            }
            XmlEvent::Start { name, attrs } if name == MICROPHONE_TAG => {
                if !in_characteristics {
                    error!("microphone tag should be inside {CHARACTERISTICS_TAG}");
                    continue;
                }
                mics.push(MicrophoneInfo::from_attrs(&attrs));
            }
            _ => {}
        }
    }
    Ok(mics)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Placement {
    Internal,
    #[default]
    External,
    None,
}

impl Placement {
    pub fn parse(s: &str) -> Self {
        match s {
            "internal" => Self::Internal,
            "external" => Self::External,
            _ => Self::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
            Self::None => "none",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BoardCapabilities {
    pub num_earpiece: u32,
    pub num_speaker: u32,
    pub num_proximity: u32,
    pub speaker_amp: bool,
    pub bluetooth: Placement,
    pub fmradio: Placement,
    pub usb_by_primary: bool,
}

impl Default for BoardCapabilities {
    fn default() -> Self {
        Self {
            num_earpiece: 1,
            num_speaker: 1,
            num_proximity: 1,
            speaker_amp: true,
            bluetooth: Placement::External,
            fmradio: Placement::External,
            usb_by_primary: false,
        }
    }
}

impl BoardCapabilities {
    /// String form of one capability, `None` for unknown keys.
    pub fn query(&self, key: &str) -> Option<String> {
        let value = match key {
            "num_earpiece" => self.num_earpiece.to_string(),
            "num_speaker" => self.num_speaker.to_string(),
            "num_proximity" => self.num_proximity.to_string(),
            "speaker_amp" => self.speaker_amp.to_string(),
            "bluetooth" => self.bluetooth.as_str().to_string(),
            "fmradio" => self.fmradio.as_str().to_string(),
            "usb_by_primary" => self.usb_by_primary.to_string(),
            _ => return None,
        };
        Some(value)
    }

    pub fn log(&self) {
        info!("the supported number of BuiltIn Earpiece = {}", self.num_earpiece);
        info!("the supported number of BuiltIn Speaker = {}", self.num_speaker);
        if self.num_speaker == 2 {
            info!("this set supports Dual Speaker");
        }
        info!("the supported number of Proximity Sensor = {}", self.num_proximity);
        if self.speaker_amp {
            info!("the Speaker AMP is supported");
        }
        info!("the supported BT is {}", self.bluetooth.as_str());
        info!("the supported FM Radio is {}", self.fmradio.as_str());
        if self.usb_by_primary {
            info!("the USB Device is supported by Primary AudioHAL");
        } else {
            info!("the USB Device is supported by USB AudioHAL");
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BoardInfo {
    pub capabilities: BoardCapabilities,
    pub microphones: Vec<MicrophoneInfo>,
}

impl BoardInfo {
    /// Reads the microphone table; an unreadable file leaves it empty.
    pub fn load(
        backend: &dyn AudioBackend,
        path: &Path,
        capabilities: BoardCapabilities,
    ) -> Self {
        let microphones = backend
            .read_text(path)
            .and_then(|text| parse_microphones(&text))
            .unwrap_or_else(|e| {
                warn!("board info '{}' not loaded: {e}", path.display());
                Vec::new()
            });
        info!(
            "board info '{}' lists {} microphones",
            path.display(),
            microphones.len()
        );
        Self {
            capabilities,
            microphones,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::memory::MemoryBackend;

    const BOARD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<audio_board_info>
    <microphone device_id="builtin_mic_1" id="0"/>
    <microphone_characteristics>
        <microphone device_id="builtin_mic_1" id="1" device="AUDIO_DEVICE_IN_BUILTIN_MIC"
            address="bottom" location="AUDIO_MICROPHONE_LOCATION_MAINBODY" group="0"
            index_in_the_group="0" sensitivity="-37.0" max_spl="132.5" min_spl="28.5"
            directionality="AUDIO_MICROPHONE_DIRECTIONALITY_OMNI" num_frequency_responses="3"
            frequencies="100.0 1000.0 8000.0" responses="-0.5 0.0 1.5"
            geometric_location="0.0345 0.0015 0.0015" orientation="0.0 -1.0 0.0"/>
        <microphone device_id="builtin_mic_2" id="2" device="AUDIO_DEVICE_IN_BACK_MIC"
            address="top" location="AUDIO_MICROPHONE_LOCATION_MAINBODY" group="0"
            index_in_the_group="1" sensitivity="-37.0" max_spl="132.5" min_spl="28.5"
            directionality="AUDIO_MICROPHONE_DIRECTIONALITY_OMNI" num_frequency_responses="0"
            geometric_location="0.0 0.15 0.0" orientation="0.0 1.0 0.0"/>
    </microphone_characteristics>
</audio_board_info>
"#;

    #[test]
    fn microphones_parse_positionally() {
        let mics = parse_microphones(BOARD).unwrap();
        assert_eq!(mics.len(), 2);
        let main = &mics[0];
        assert_eq!(main.device_id, "builtin_mic_1");
        assert_eq!(main.id, 1);
        assert_eq!(main.address, "bottom");
        assert_eq!(main.sensitivity, -37.0);
        assert_eq!(main.directionality, MicrophoneDirectionality::Omni);
        assert_eq!(main.frequencies, vec![100.0, 1000.0, 8000.0]);
        assert_eq!(main.responses, vec![-0.5, 0.0, 1.5]);
        assert_eq!(main.orientation, [0.0, -1.0, 0.0]);

        let back = &mics[1];
        assert_eq!(back.device, MicrophoneDevice::BackMic);
        assert_eq!(back.index_in_the_group, 1);
        assert!(back.frequencies.is_empty());
        assert_eq!(back.geometric_location, [0.0, 0.15, 0.0]);
    }

    #[test]
    fn missing_file_gives_empty_table() {
        let backend = MemoryBackend::default();
        let info = BoardInfo::load(
            &backend,
            Path::new("/vendor/etc/audio_board_info.xml"),
            BoardCapabilities::default(),
        );
        assert!(info.microphones.is_empty());
    }

    #[test]
    fn capability_queries() {
        let caps = BoardCapabilities {
            num_speaker: 2,
            bluetooth: Placement::parse("internal"),
            ..BoardCapabilities::default()
        };
        assert_eq!(caps.query("num_speaker").as_deref(), Some("2"));
        assert_eq!(caps.query("bluetooth").as_deref(), Some("internal"));
        assert_eq!(caps.query("fmradio").as_deref(), Some("external"));
        assert_eq!(caps.query("usb_by_primary").as_deref(), Some("false"));
        assert_eq!(caps.query("num_mic"), None);
    }
}
