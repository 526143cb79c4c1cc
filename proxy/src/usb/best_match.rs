//! Best-match selection over USB altsettings. Format is chosen first, then
//! channels among entries of that format, then rate among entries of that
//! format and channel count. Every step is a pure function of the list.

use super::profile::UsbDeviceInfo;
use crate::types::PcmFormat;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct UsbConfig {
    pub format: PcmFormat,
    pub channels: u32,
    pub rate: u32,
}

impl UsbConfig {
    pub const DEFAULT: Self = Self {
        format: PcmFormat::S16Le,
        channels: 2,
        rate: 48000,
    };
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Rate or channel candidate `cur` replaces `selected` when it is the closer
/// value above the request, or a larger value that still stays below it.
fn closer(requested: u32, cur: u32, selected: u32) -> bool {
    (cur > requested && requested.abs_diff(cur) < requested.abs_diff(selected))
        || (cur > selected && requested > cur)
}

/// Exact format first, then packed 24 bit standing in for a padded 24 bit
/// request, then the highest-fidelity format on offer.
pub fn best_format(devices: &[UsbDeviceInfo], requested: PcmFormat) -> Option<PcmFormat> {
    if devices.iter().any(|d| d.format == requested) {
        return Some(requested);
    }
    if requested == PcmFormat::S24Le && devices.iter().any(|d| d.format == PcmFormat::S24_3Le) {
        return Some(PcmFormat::S24_3Le);
    }
    devices.iter().map(|d| d.format).reduce(|sel, cur| {
        if cur.is_higher_than(sel) { cur } else { sel }
    })
}

pub fn best_channels(devices: &[UsbDeviceInfo], format: PcmFormat, requested: u32) -> u32 {
    let mut selected = 0;
    for dev in devices.iter().filter(|d| d.format == format) {
        let cur = dev.channels;
        if cur == requested {
            return cur;
        }
        if selected == 0 || closer(requested, cur, selected) {
            selected = cur;
        }
    }
    selected
}

pub fn best_rate(devices: &[UsbDeviceInfo], format: PcmFormat, channels: u32, requested: u32) -> u32 {
    let mut selected = 0;
    for dev in devices
        .iter()
        .filter(|d| d.format == format && d.channels == channels)
    {
        for &cur in &dev.rates {
            if cur == requested {
                return cur;
            }
            if selected == 0 || closer(requested, cur, selected) {
                selected = cur;
            }
        }
    }
    selected
}

/// `None` only when the profile list is empty.
pub fn best_matching_config(
    devices: &[UsbDeviceInfo],
    format: PcmFormat,
    channels: u32,
    rate: u32,
) -> Option<UsbConfig> {
    let format = best_format(devices, format)?;
    let channels = best_channels(devices, format, channels);
    let rate = best_rate(devices, format, channels, rate);
    Some(UsbConfig {
        format,
        channels,
        rate,
    })
}
