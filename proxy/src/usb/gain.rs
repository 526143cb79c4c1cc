//! Gain-control bundle for vendor USB headsets. Known VID:PID pairs get an
//! extra route graph whose `<path>-gain` entries are applied next to the
//! regular route path.

use crate::hw::{AudioBackend, AudioRoute};
use std::path::Path;
use tracing::{error, info};

pub const BUNDLE_VID: u32 = 0x04e8;
pub const WHITE_PID: u32 = 0xa037;
pub const GRAY_HEADPHONE_PID: u32 = 0xa04b;
pub const GRAY_HEADSET_PID: u32 = 0xa04c;

pub const WHITE_GAIN_XML: &str = "mixer_usb_white.xml";
pub const GRAY_GAIN_XML: &str = "mixer_usb_gray.xml";

/// Parses the `vvvv:pppp` hexadecimal content of `/proc/asound/cardN/usbid`.
pub fn parse_usbid(text: &str) -> Result<(u32, u32), String> {
    let text = text.trim();
    let (vid, pid) = text
        .split_once(':')
        .ok_or_else(|| format!("Failed to parse USB id '{text}'"))?;
    let vid = u32::from_str_radix(vid, 16).map_err(|e| format!("Bad USB VID '{vid}': {e}"))?;
    let pid = u32::from_str_radix(pid, 16).map_err(|e| format!("Bad USB PID '{pid}': {e}"))?;
    Ok((vid, pid))
}

/// Gain XML for a supported bundle, `None` for every other device.
pub fn bundle_xml(vid: u32, pid: u32) -> Option<&'static str> {
    if vid != BUNDLE_VID {
        return None;
    }
    match pid {
        WHITE_PID => Some(WHITE_GAIN_XML),
        GRAY_HEADPHONE_PID | GRAY_HEADSET_PID => Some(GRAY_GAIN_XML),
        _ => None,
    }
}

pub fn gain_path(path: &str) -> String {
    format!("{path}-gain")
}

pub struct UsbGain {
    pub vid: u32,
    pub pid: u32,
    route: Box<dyn AudioRoute>,
}

impl std::fmt::Debug for UsbGain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbGain")
            .field("vid", &format_args!("{:#06x}", self.vid))
            .field("pid", &format_args!("{:#06x}", self.pid))
            .finish()
    }
}

impl UsbGain {
    /// `Ok(None)` when the device needs no gain control.
    pub fn load(
        backend: &dyn AudioBackend,
        proc_asound: &Path,
        gain_dir: &Path,
        card: u32,
    ) -> Result<Option<Self>, String> {
        let usbid = proc_asound.join(format!("card{card}")).join("usbid");
        let (vid, pid) = parse_usbid(&backend.read_text(&usbid)?)?;
        info!("USB device VID: {vid:#x} PID: {pid:#x}");
        let Some(xml) = bundle_xml(vid, pid) else {
            info!("USB gain control not required");
            return Ok(None);
        };
        let xml_path = gain_dir.join(xml);
        info!("USB bundle gain control XML '{}' loading", xml_path.display());
        let mixer = backend.open_mixer(card)?;
        let route = backend.open_route(mixer, card, &xml_path).map_err(|e| {
            error!("Failed to init USB gain route for card {card}: {e}");
            e
        })?;
        Ok(Some(Self { vid, pid, route }))
    }

    pub fn apply(&self, path: &str) {
        let name = gain_path(path);
        match self.route.apply_and_update_path(&name) {
            Ok(()) => info!("USB gain routed to {name}"),
            Err(e) => error!("Failed to apply USB gain path {name}: {e}"),
        }
    }

    pub fn reset(&self, path: &str) {
        let name = gain_path(path);
        match self.route.reset_and_update_path(&name) {
            Ok(()) => info!("USB gain reset {name}"),
            Err(e) => error!("Failed to reset USB gain path {name}: {e}"),
        }
    }
}
