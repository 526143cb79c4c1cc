//! Parser for the `/proc/asound/cardN/stream0` descriptor of a USB audio
//! card and the capability strings derived from it.

use super::UsbDirection;
use crate::types::PcmFormat;
use serde::Serialize;
use tracing::{info, warn};

/// Rates the DSP can run a USB endpoint at, in descending order. Bit `i` of
/// a rates mask refers to entry `i`.
pub const SUPPORTED_RATES: [u32; 8] = [384000, 192000, 96000, 48000, 44100, 32000, 16000, 8000];

const FORMAT_STRS: [&str; 5] = [
    "AUDIO_FORMAT_PCM_32_BIT",
    "AUDIO_FORMAT_PCM_24_BIT_PACKED",
    "AUDIO_FORMAT_PCM_8_24_BIT",
    "AUDIO_FORMAT_PCM_16_BIT",
    "AUDIO_FORMAT_PCM_8_BIT",
];

const MAX_CHANNELS: u32 = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UsbDeviceInfo {
    pub format: PcmFormat,
    pub bit_width: u32,
    pub channels: u32,
    pub rates: Vec<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UsbCapabilities {
    pub formats_mask: u32,
    pub channels_mask: u32,
    pub rates_mask: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UsbProfile {
    pub devices: Vec<UsbDeviceInfo>,
    pub caps: UsbCapabilities,
}

fn format_bit(format: PcmFormat) -> u32 {
    match format {
        PcmFormat::S32Le => 1,
        PcmFormat::S24_3Le => 1 << 1,
        PcmFormat::S24Le => 1 << 2,
        PcmFormat::S16Le => 1 << 3,
        PcmFormat::S8 => 1 << 4,
    }
}

fn line_after<'a>(block: &'a str, key: &str) -> Option<&'a str> {
    let start = block.find(key)? + key.len();
    let rest = &block[start..];
    Some(rest.split('\n').next().unwrap_or(rest))
}

fn parse_format(line: &str) -> Option<PcmFormat> {
    if line.contains("S16_LE") {
        Some(PcmFormat::S16Le)
    } else if line.contains("S24_LE") {
        Some(PcmFormat::S24Le)
    } else if line.contains("S24_3LE") {
        Some(PcmFormat::S24_3Le)
    } else if line.contains("S32_LE") {
        Some(PcmFormat::S32Le)
    } else {
        None
    }
}

/// Accepts both `8000, 44100, 48000` and `8000 - 48000 (continuous)`.
/// Returns the supported rates found and their mask bits.
pub fn parse_rates(line: &str) -> Option<(Vec<u32>, u32)> {
    let mut tokens = line
        .split(|c: char| c == ' ' || c == ',' || c == '.' || c == '-')
        .filter(|t| !t.is_empty());
    let mut rates = Vec::new();
    let mut mask = 0;
    if line.contains("continuous") {
        let min: u32 = tokens.next()?.parse().ok()?;
        let max: u32 = tokens.next()?.parse().ok()?;
        for (i, rate) in SUPPORTED_RATES.iter().enumerate() {
            if (min..=max).contains(rate) {
                rates.push(*rate);
                mask |= 1 << i;
            }
        }
    } else {
        let first = tokens.next()?;
        for token in std::iter::once(first).chain(tokens) {
            let Ok(rate) = token.parse::<u32>() else {
                continue;
            };
            if let Some(i) = SUPPORTED_RATES.iter().position(|r| *r == rate) {
                rates.push(rate);
                mask |= 1 << i;
            }
        }
    }
    Some((rates, mask))
}

impl UsbProfile {
    pub fn parse(text: &str, direction: UsbDirection) -> Result<Self, String> {
        let start = text
            .find(direction.section())
            .ok_or_else(|| format!("{} section not found in USB stream file", direction.section()))?;
        let end = text
            .find(direction.other().section())
            .filter(|end| *end > start)
            .unwrap_or(text.len());
        let section = &text[start..end];

        let mut profile = Self::default();
        for block in section.split("Altset").skip(1) {
            let Some(format) = line_after(block, "Format: ").and_then(parse_format) else {
                warn!("usb {}: altset without a usable format", direction.as_str());
                continue;
            };
            let Some(channels) = line_after(block, "Channels: ")
                .and_then(|l| l.trim().parse::<u32>().ok())
            else {
                warn!("usb {}: altset without channel count", direction.as_str());
                continue;
            };
            let Some((rates, rates_mask)) = line_after(block, "Rates: ").and_then(parse_rates)
            else {
                warn!("usb {}: altset without sample rates", direction.as_str());
                continue;
            };
            profile.caps.formats_mask |= format_bit(format);
            profile.caps.channels_mask |= 1 << channels.min(31);
            profile.caps.rates_mask |= rates_mask;
            profile.devices.push(UsbDeviceInfo {
                format,
                bit_width: format.bit_width(),
                channels,
                rates,
            });
        }
        Ok(profile)
    }

    pub fn log(&self, direction: UsbDirection) {
        for (i, dev) in self.devices.iter().enumerate() {
            info!(
                "USB_Device[{}] {}: {:?} {}bit {}ch rates {:?}",
                direction.as_str(),
                i + 1,
                dev.format,
                dev.bit_width,
                dev.channels,
                dev.rates
            );
        }
    }

    pub fn max_channels(&self) -> u32 {
        self.devices.iter().map(|d| d.channels).max().unwrap_or(0)
    }

    pub fn min_channels(&self) -> u32 {
        self.devices
            .iter()
            .map(|d| d.channels)
            .min()
            .unwrap_or(MAX_CHANNELS)
    }

    pub fn supported_formats(&self) -> String {
        FORMAT_STRS
            .iter()
            .enumerate()
            .filter(|(i, _)| self.caps.formats_mask & (1 << i) != 0)
            .map(|(_, s)| *s)
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Output masks start at stereo, input masks at mono. Counts 1 and 2 list
    /// the positional mask before the index mask.
    pub fn supported_channels(&self, direction: UsbDirection) -> String {
        let (first, positional) = match direction {
            UsbDirection::Out => (2, ["AUDIO_CHANNEL_OUT_MONO", "AUDIO_CHANNEL_OUT_STEREO"]),
            UsbDirection::In => (1, ["AUDIO_CHANNEL_IN_MONO", "AUDIO_CHANNEL_IN_STEREO"]),
        };
        let (min, max) = (self.min_channels(), self.max_channels());
        let mut entries = Vec::new();
        for count in first..=MAX_CHANNELS {
            if count < min || count > max {
                continue;
            }
            if count <= 2 {
                entries.push(positional[count as usize - 1].to_string());
            }
            entries.push(format!("AUDIO_CHANNEL_INDEX_MASK_{count}"));
        }
        entries.join("|")
    }

    pub fn supported_rates(&self) -> String {
        SUPPORTED_RATES
            .iter()
            .enumerate()
            .filter(|(i, _)| self.caps.rates_mask & (1 << i) != 0)
            .map(|(_, r)| r.to_string())
            .collect::<Vec<_>>()
            .join("|")
    }
}
