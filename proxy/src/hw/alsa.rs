use super::error_fmt::{backend_io_error, backend_open_error, backend_rw_error, missing_control_error};
use super::route::MixerPaths;
use super::traits::{
    AudioBackend, AudioRoute, CompressDevice, Mixer, MmapRegion, OpenFlags, PcmDevice,
    PcmDirection,
};
use crate::pcm_config::{ComprConfig, PcmConfig};
use crate::types::PcmFormat;
use alsa::ctl::{Ctl, ElemId, ElemIface, ElemType, ElemValue};
use alsa::pcm::{Access, Format, HwParams, PCM, State};
use alsa::{Direction, ValueOr};
use std::ffi::CString;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, warn};

const BACKEND: &str = "ALSA";

fn alsa_format(format: PcmFormat) -> Format {
    match format {
        PcmFormat::S8 => Format::S8,
        PcmFormat::S16Le => Format::S16LE,
        PcmFormat::S24Le => Format::S24LE,
        PcmFormat::S24_3Le => Format::S243LE,
        PcmFormat::S32Le => Format::S32LE,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlsaBackend;

impl AudioBackend for AlsaBackend {
    fn open_pcm(
        &self,
        card: u32,
        device: u32,
        direction: PcmDirection,
        flags: OpenFlags,
        config: &PcmConfig,
    ) -> Result<Box<dyn PcmDevice>, String> {
        Ok(Box::new(AlsaPcm::open(card, device, direction, flags, config)?))
    }

    fn open_compress(
        &self,
        card: u32,
        device: u32,
        config: &ComprConfig,
    ) -> Result<Box<dyn CompressDevice>, String> {
        Ok(Box::new(super::compress::ComprDevice::open(
            card, device, config,
        )?))
    }

    fn open_mixer(&self, card: u32) -> Result<Arc<dyn Mixer>, String> {
        Ok(Arc::new(AlsaMixer::open(card)?))
    }

    fn open_route(
        &self,
        mixer: Arc<dyn Mixer>,
        _card: u32,
        xml_path: &Path,
    ) -> Result<Box<dyn AudioRoute>, String> {
        Ok(Box::new(MixerPaths::load(mixer, xml_path)?))
    }

    fn read_text(&self, path: &Path) -> Result<String, String> {
        std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {e}", path.display()))
    }

    fn mmap_data_fd(
        &self,
        card: u32,
        device: u32,
        direction: PcmDirection,
    ) -> Result<(i32, u32), String> {
        let path = format!("/dev/snd/hwC{card}D{device}");
        let node = File::open(&path)
            .map_err(|e| backend_open_error(BACKEND, direction.as_str(), &path, e))?;
        let mut info = super::ioctl::MmapFd {
            dir: match direction {
                PcmDirection::Playback => 0,
                PcmDirection::Capture => 1,
            },
            ..Default::default()
        };
        unsafe { super::ioctl::pcm_mmap_data_fd(node.as_raw_fd(), &mut info) }
            .map_err(|e| backend_rw_error(BACKEND, direction.as_str(), "mmap data fd", e))?;
        Ok((info.fd, info.size.max(0) as u32))
    }
}

pub struct AlsaPcm {
    name: String,
    direction: PcmDirection,
    pcm: PCM,
    config: PcmConfig,
}

impl std::fmt::Debug for AlsaPcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlsaPcm")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("config", &self.config)
            .finish()
    }
}

impl AlsaPcm {
    pub fn open(
        card: u32,
        device: u32,
        direction: PcmDirection,
        flags: OpenFlags,
        config: &PcmConfig,
    ) -> Result<Self, String> {
        let name = format!("hw:{card},{device}");
        let dir = match direction {
            PcmDirection::Playback => Direction::Playback,
            PcmDirection::Capture => Direction::Capture,
        };
        let pcm = PCM::new(&name, dir, false)
            .map_err(|e| backend_open_error(BACKEND, direction.as_str(), &name, e))?;
        configure_pcm(&pcm, config, flags)
            .map_err(|e| backend_open_error(BACKEND, direction.as_str(), &name, e))?;
        debug!("opened {name} ({}) {config:?}", direction.as_str());
        Ok(Self {
            name,
            direction,
            pcm,
            config: *config,
        })
    }

    fn recover(&self) {
        if self.pcm.state() == State::XRun {
            if let Err(e) = self.pcm.prepare() {
                warn!("{}", backend_rw_error(BACKEND, self.direction.as_str(), "xrun prepare", e));
            }
        }
    }
}

fn configure_pcm(pcm: &PCM, config: &PcmConfig, flags: OpenFlags) -> Result<(), String> {
    let hwp = HwParams::any(pcm).map_err(|e| e.to_string())?;
    let access = if flags.mmap {
        Access::MMapInterleaved
    } else {
        Access::RWInterleaved
    };
    hwp.set_access(access).map_err(|e| e.to_string())?;
    hwp.set_format(alsa_format(config.format))
        .map_err(|e| e.to_string())?;
    hwp.set_channels(config.channels)
        .map_err(|e| e.to_string())?;
    hwp.set_rate(config.rate, ValueOr::Nearest)
        .map_err(|e| e.to_string())?;
    hwp.set_period_size_near(config.period_size as i64, ValueOr::Nearest)
        .map_err(|e| e.to_string())?;
    hwp.set_buffer_size_near(config.buffer_frames() as i64)
        .map_err(|e| e.to_string())?;
    pcm.hw_params(&hwp).map_err(|e| e.to_string())?;

    let swp = pcm.sw_params_current().map_err(|e| e.to_string())?;
    swp.set_start_threshold(config.start_threshold as i64)
        .map_err(|e| e.to_string())?;
    if config.stop_threshold != u32::MAX && config.stop_threshold > 0 {
        swp.set_stop_threshold(config.stop_threshold as i64)
            .map_err(|e| e.to_string())?;
    }
    swp.set_avail_min(config.period_size as i64)
        .map_err(|e| e.to_string())?;
    if flags.monotonic {
        swp.set_tstamp_mode(true).map_err(|e| e.to_string())?;
    }
    pcm.sw_params(&swp).map_err(|e| e.to_string())?;
    pcm.prepare().map_err(|e| e.to_string())
}

impl PcmDevice for AlsaPcm {
    fn config(&self) -> &PcmConfig {
        &self.config
    }

    fn start(&mut self) -> Result<(), String> {
        self.pcm
            .start()
            .map_err(|e| backend_rw_error(BACKEND, self.direction.as_str(), "start", e))
    }

    fn stop(&mut self) -> Result<(), String> {
        self.pcm
            .drop()
            .map_err(|e| backend_rw_error(BACKEND, self.direction.as_str(), "stop", e))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, String> {
        let io = self.pcm.io_bytes();
        match io.writei(data) {
            Ok(frames) => Ok(self.config.frames_to_bytes(frames as u32) as usize),
            Err(e) => {
                self.recover();
                Err(backend_rw_error(BACKEND, "playback", "write", e))
            }
        }
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, String> {
        let io = self.pcm.io_bytes();
        match io.readi(data) {
            Ok(frames) => Ok(self.config.frames_to_bytes(frames as u32) as usize),
            Err(e) => {
                self.recover();
                Err(backend_rw_error(BACKEND, "capture", "read", e))
            }
        }
    }

    fn htimestamp(&mut self) -> Result<(u32, Duration), String> {
        let status = self
            .pcm
            .status()
            .map_err(|e| backend_io_error(BACKEND, self.direction.as_str(), e))?;
        let avail = status.get_avail().max(0) as u32;
        let ts = status.get_htstamp();
        let time = Duration::new(ts.tv_sec.max(0) as u64, ts.tv_nsec.max(0) as u32);
        Ok((avail, time))
    }

    fn mmap_begin(&mut self) -> Result<MmapRegion, String> {
        Err(backend_rw_error(
            BACKEND,
            self.direction.as_str(),
            "mmap begin",
            "memory-mapped transfers are serviced by the exclusive buffer fd",
        ))
    }

    fn mmap_commit(&mut self, _offset: u32, _frames: u32) -> Result<(), String> {
        Err(backend_rw_error(
            BACKEND,
            self.direction.as_str(),
            "mmap commit",
            "memory-mapped transfers are serviced by the exclusive buffer fd",
        ))
    }

    fn mmap_hw_ptr(&mut self) -> Result<(u32, Duration), String> {
        let status = self
            .pcm
            .status()
            .map_err(|e| backend_io_error(BACKEND, self.direction.as_str(), e))?;
        let delay = status.get_delay().max(0) as u32;
        let ts = status.get_htstamp();
        let time = Duration::new(ts.tv_sec.max(0) as u64, ts.tv_nsec.max(0) as u32);
        Ok((delay, time))
    }

    fn poll_fd(&self) -> Option<i32> {
        use alsa::poll::Descriptors;
        let mut fds = [nix::libc::pollfd {
            fd: -1,
            events: 0,
            revents: 0,
        }];
        match self.pcm.fill(&mut fds) {
            Ok(n) if n > 0 => Some(fds[0].fd),
            _ => None,
        }
    }
}

/// Control interface of one card. Enumerated controls are written by item
/// name through the simple-mixer view of the same card.
pub struct AlsaMixer {
    name: String,
    ctl: Mutex<Ctl>,
}

impl std::fmt::Debug for AlsaMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlsaMixer").field("name", &self.name).finish()
    }
}

impl AlsaMixer {
    pub fn open(card: u32) -> Result<Self, String> {
        let name = format!("hw:{card}");
        let ctl = Ctl::new(&name, true)
            .map_err(|e| backend_open_error(BACKEND, "mixer", &name, e))?;
        Ok(Self {
            name,
            ctl: Mutex::new(ctl),
        })
    }

    fn elem_id(name: &str) -> Result<ElemId, String> {
        let cname = CString::new(name).map_err(|e| e.to_string())?;
        let mut id = ElemId::new(ElemIface::Mixer);
        id.set_name(&cname);
        Ok(id)
    }

    fn with_value<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Ctl, ElemType, u32, &mut ElemValue) -> Result<T, String>,
    ) -> Result<T, String> {
        let id = Self::elem_id(name)?;
        let ctl = self.ctl.lock().unwrap_or_else(|e| e.into_inner());
        let info = ctl
            .elem_info(&id)
            .map_err(|_| missing_control_error(name))?;
        let kind = info.get_type();
        let mut value = ElemValue::new(kind).map_err(|e| e.to_string())?;
        value.set_id(&id);
        ctl.elem_read(&mut value)
            .map_err(|e| backend_rw_error(BACKEND, "mixer", "read", e))?;
        f(&ctl, kind, info.get_count(), &mut value)
    }
}

impl Mixer for AlsaMixer {
    fn has_control(&self, name: &str) -> bool {
        let Ok(id) = Self::elem_id(name) else {
            return false;
        };
        let ctl = self.ctl.lock().unwrap_or_else(|e| e.into_inner());
        ctl.elem_info(&id).is_ok()
    }

    fn num_values(&self, name: &str) -> Result<usize, String> {
        self.with_value(name, |_, _, count, _| Ok(count as usize))
    }

    fn get_value(&self, name: &str, index: usize) -> Result<i64, String> {
        self.with_value(name, |_, kind, _, value| {
            let idx = index as u32;
            let v = match kind {
                ElemType::Boolean => value.get_boolean(idx).map(i64::from),
                ElemType::Integer => value.get_integer(idx).map(i64::from),
                ElemType::Integer64 => value.get_integer64(idx),
                ElemType::Enumerated => value.get_enumerated(idx).map(i64::from),
                _ => None,
            };
            v.ok_or_else(|| format!("Mixer control '{name}' has no value {index}"))
        })
    }

    fn set_value(&self, name: &str, index: usize, v: i64) -> Result<(), String> {
        self.with_value(name, |ctl, kind, _, value| {
            let idx = index as u32;
            let set = match kind {
                ElemType::Boolean => value.set_boolean(idx, v != 0),
                ElemType::Integer => value.set_integer(idx, v as i32),
                ElemType::Integer64 => value.set_integer64(idx, v),
                ElemType::Enumerated => value.set_enumerated(idx, v as u32),
                _ => None,
            };
            set.ok_or_else(|| format!("Mixer control '{name}' rejects value {index}"))?;
            ctl.elem_write(value)
                .map_err(|e| backend_rw_error(BACKEND, "mixer", "write", e))
        })
    }

    fn get_array(&self, name: &str) -> Result<Vec<u8>, String> {
        self.with_value(name, |_, _, _, value| {
            value
                .get_bytes()
                .map(<[u8]>::to_vec)
                .ok_or_else(|| format!("Mixer control '{name}' is not a byte array"))
        })
    }

    fn set_array(&self, name: &str, data: &[u8]) -> Result<(), String> {
        self.with_value(name, |ctl, _, _, value| {
            value
                .set_bytes(data)
                .ok_or_else(|| format!("Mixer control '{name}' is not a byte array"))?;
            ctl.elem_write(value)
                .map_err(|e| backend_rw_error(BACKEND, "mixer", "write", e))
        })
    }

    fn set_enum_by_string(&self, name: &str, item: &str) -> Result<(), String> {
        use alsa::mixer::{Mixer as SimpleMixer, SelemChannelId, SelemId};
        let simple = SimpleMixer::new(&self.name, false)
            .map_err(|e| backend_open_error(BACKEND, "mixer", &self.name, e))?;
        let selem = simple
            .find_selem(&SelemId::new(name, 0))
            .ok_or_else(|| missing_control_error(name))?;
        let position = selem
            .iter_enum()
            .map_err(|e| backend_rw_error(BACKEND, "mixer", "enum items", e))?
            .position(|i| i.map(|i| i == item).unwrap_or(false));
        match position {
            Some(idx) => selem
                .set_enum_item(SelemChannelId::mono(), idx as u32)
                .map_err(|e| backend_rw_error(BACKEND, "mixer", "write", e)),
            None => {
                let idx = item
                    .parse::<i64>()
                    .map_err(|_| format!("Mixer control '{name}' has no item '{item}'"))?;
                self.set_value(name, 0, idx)
            }
        }
    }

    fn subscribe_events(&self, enable: bool) -> Result<(), String> {
        let ctl = self.ctl.lock().unwrap_or_else(|e| e.into_inner());
        ctl.subscribe_events(enable)
            .map_err(|e| backend_io_error(BACKEND, "mixer", e))
    }

    fn wait_event(&self, timeout: Duration) -> Result<bool, String> {
        let ctl = self.ctl.lock().unwrap_or_else(|e| e.into_inner());
        let ready = ctl
            .wait(Some(timeout.as_millis() as u32))
            .map_err(|e| backend_io_error(BACKEND, "mixer", e))?;
        if !ready {
            return Ok(false);
        }
        let mut added = false;
        loop {
            match ctl.read() {
                Ok(Some(event)) => added |= event.get_mask().add(),
                Ok(None) => break,
                Err(e) => {
                    error!("{}", backend_io_error(BACKEND, "mixer", e));
                    break;
                }
            }
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_formats_map_to_alsa() {
        assert_eq!(alsa_format(PcmFormat::S16Le), Format::S16LE);
        assert_eq!(alsa_format(PcmFormat::S24_3Le), Format::S243LE);
    }

    #[test]
    #[ignore = "requires ALSA hardware"]
    fn opens_primary_playback() {
        let pcm = AlsaPcm::open(
            0,
            0,
            PcmDirection::Playback,
            OpenFlags::MONOTONIC,
            &crate::pcm_config::PRIMARY_PLAYBACK,
        );
        assert!(pcm.is_ok());
    }
}
