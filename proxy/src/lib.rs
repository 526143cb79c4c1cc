pub mod a2dp;
pub mod device;
pub mod error;
pub mod hw;
pub mod params;
pub mod pcm_config;
pub mod stream;
pub mod types;
pub mod usb;

pub use device::DeviceProxy;
pub use error::ProxyError;
pub use stream::{AudioConfig, CaptureStream, PlaybackStream, Position};
