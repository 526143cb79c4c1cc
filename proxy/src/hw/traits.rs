use crate::pcm_config::{ComprConfig, PcmConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PcmDirection {
    Playback,
    Capture,
}

impl PcmDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Playback => "playback",
            Self::Capture => "capture",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub mmap: bool,
    pub monotonic: bool,
}

impl OpenFlags {
    pub const MONOTONIC: Self = Self {
        mmap: false,
        monotonic: true,
    };
    pub const MMAP: Self = Self {
        mmap: true,
        monotonic: true,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MmapRegion {
    pub offset: u32,
    pub frames: u32,
}

/// An opened PCM endpoint. Dropping the handle closes the device.
pub trait PcmDevice: Send {
    fn config(&self) -> &PcmConfig;
    fn start(&mut self) -> Result<(), String>;
    fn stop(&mut self) -> Result<(), String>;
    fn write(&mut self, data: &[u8]) -> Result<usize, String>;
    fn read(&mut self, data: &mut [u8]) -> Result<usize, String>;
    /// Frames the ring buffer can accept (playback) or holds (capture), plus the kernel time.
    fn htimestamp(&mut self) -> Result<(u32, Duration), String>;
    fn mmap_begin(&mut self) -> Result<MmapRegion, String>;
    fn mmap_commit(&mut self, offset: u32, frames: u32) -> Result<(), String>;
    fn mmap_hw_ptr(&mut self) -> Result<(u32, Duration), String>;
    fn poll_fd(&self) -> Option<i32>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GaplessMetadata {
    pub encoder_delay: u32,
    pub encoder_padding: u32,
}

/// A compressed offload endpoint. Dropping the handle closes the device.
pub trait CompressDevice: Send {
    fn write(&mut self, data: &[u8]) -> Result<usize, String>;
    fn start(&mut self) -> Result<(), String>;
    fn stop(&mut self) -> Result<(), String>;
    fn pause(&mut self) -> Result<(), String>;
    fn resume(&mut self) -> Result<(), String>;
    fn drain(&mut self) -> Result<(), String>;
    fn set_nonblock(&mut self, nonblock: bool) -> Result<(), String>;
    fn set_gapless_metadata(&mut self, meta: GaplessMetadata) -> Result<(), String>;
    /// Rendered PCM frames and the sampling rate they are counted in.
    fn tstamp(&mut self) -> Result<(u64, u32), String>;
}

pub trait Mixer: Send + Sync {
    fn has_control(&self, name: &str) -> bool;
    fn num_values(&self, name: &str) -> Result<usize, String>;
    fn get_value(&self, name: &str, index: usize) -> Result<i64, String>;
    fn set_value(&self, name: &str, index: usize, value: i64) -> Result<(), String>;
    fn get_array(&self, name: &str) -> Result<Vec<u8>, String>;
    fn set_array(&self, name: &str, data: &[u8]) -> Result<(), String>;
    fn set_enum_by_string(&self, name: &str, value: &str) -> Result<(), String>;
    fn subscribe_events(&self, enable: bool) -> Result<(), String>;
    /// Blocks for at most `timeout`; returns whether a control-add event arrived.
    fn wait_event(&self, timeout: Duration) -> Result<bool, String>;
}

pub trait AudioRoute: Send + Sync {
    fn apply_path(&self, name: &str) -> Result<(), String>;
    fn reset_path(&self, name: &str) -> Result<(), String>;
    fn update_mixer(&self) -> Result<(), String>;
    fn missing_controls(&self) -> bool;

    fn apply_and_update_path(&self, name: &str) -> Result<(), String> {
        self.apply_path(name)?;
        self.update_mixer()
    }

    fn reset_and_update_path(&self, name: &str) -> Result<(), String> {
        self.reset_path(name)?;
        self.update_mixer()
    }
}

/// Opens the collaborators the proxy drives. One backend serves the whole process.
pub trait AudioBackend: Send + Sync {
    fn open_pcm(
        &self,
        card: u32,
        device: u32,
        direction: PcmDirection,
        flags: OpenFlags,
        config: &PcmConfig,
    ) -> Result<Box<dyn PcmDevice>, String>;

    fn open_compress(
        &self,
        card: u32,
        device: u32,
        config: &ComprConfig,
    ) -> Result<Box<dyn CompressDevice>, String>;

    fn open_mixer(&self, card: u32) -> Result<Arc<dyn Mixer>, String>;

    fn open_route(
        &self,
        mixer: Arc<dyn Mixer>,
        card: u32,
        xml_path: &Path,
    ) -> Result<Box<dyn AudioRoute>, String>;

    fn read_text(&self, path: &Path) -> Result<String, String>;

    /// Exclusive-mode DMA buffer descriptor of an MMAP endpoint.
    fn mmap_data_fd(
        &self,
        card: u32,
        device: u32,
        direction: PcmDirection,
    ) -> Result<(i32, u32), String>;
}
