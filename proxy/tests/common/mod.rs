#![allow(dead_code)]

use abox_proxy::DeviceProxy;
use abox_proxy::a2dp::{A2dpService, A2dpServiceConnector};
use abox_proxy::hw::memory::MemoryBackend;
use abox_proxy::hw::options::ProxyOptions;
use abox_proxy::params::StrParms;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const MIXER_PATHS: &str = "/vendor/etc/mixer_paths.xml";

pub const USB_STREAM0: &str = "\
Playback:
  Altset 1
    Format: S16_LE
    Channels: 2
    Rates: 44100, 48000
  Altset 2
    Format: S24_3LE
    Channels: 2
    Rates: 44100, 48000, 96000
";

#[derive(Default)]
pub struct BtStack {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl BtStack {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::Relaxed)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::Relaxed)
    }
}

impl A2dpService for BtStack {
    fn open_stream(&self) -> i32 {
        0
    }
    fn close_stream(&self) -> i32 {
        0
    }
    fn start_stream(&self) -> i32 {
        self.starts.fetch_add(1, Ordering::Relaxed);
        0
    }
    fn stop_stream(&self) -> i32 {
        self.stops.fetch_add(1, Ordering::Relaxed);
        0
    }
    fn suspend_stream(&self) -> i32 {
        0
    }
    fn clear_suspend_flag(&self) -> i32 {
        0
    }
    fn codec_config(&self) -> Result<Vec<u8>, i32> {
        Err(-1)
    }
}

struct Connector(Arc<BtStack>);

impl A2dpServiceConnector for Connector {
    fn connect(&self) -> Option<Arc<dyn A2dpService>> {
        Some(self.0.clone())
    }
}

pub struct Rig {
    pub backend: MemoryBackend,
    pub bt: Arc<BtStack>,
    pub proxy: Arc<DeviceProxy>,
}

impl Rig {
    pub fn with_options(options: ProxyOptions) -> Self {
        let backend = MemoryBackend::default();
        let bt = Arc::new(BtStack::default());
        let proxy = DeviceProxy::new(
            Arc::new(backend.clone()),
            options,
            Arc::new(Connector(bt.clone())),
        )
        .with_usb_paths("/proc/asound", "/vendor/etc");
        proxy.init();
        assert!(proxy.init_route(Path::new(MIXER_PATHS)));
        Self {
            backend,
            bt,
            proxy: Arc::new(proxy),
        }
    }

    pub fn new() -> Self {
        Self::with_options(ProxyOptions::default())
    }

    pub fn set(&self, kv: &str) {
        self.proxy.set_parameters(&StrParms::parse(kv)).unwrap();
    }

    pub fn connect_usb_out(&self) {
        self.backend.set_file("/proc/asound/card1/stream0", USB_STREAM0);
        self.set("connect=16384;card=1;device=0");
    }
}
