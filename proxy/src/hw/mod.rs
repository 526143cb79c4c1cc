#[cfg(target_os = "linux")]
pub mod alsa;
#[cfg(unix)]
pub mod compress;
pub mod config;
pub mod error_fmt;
#[cfg(unix)]
mod ioctl;
pub mod memory;
pub mod options;
pub mod route;
pub mod traits;
pub mod xml;

pub use traits::{
    AudioBackend, AudioRoute, CompressDevice, GaplessMetadata, Mixer, MmapRegion, OpenFlags,
    PcmDevice, PcmDirection,
};
