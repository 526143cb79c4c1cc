//! In-process backend: every PCM, compress, mixer and route operation is
//! recorded so routing behavior can be observed without sound cards.

use super::route::MixerPaths;
use super::traits::{
    AudioBackend, AudioRoute, CompressDevice, GaplessMetadata, Mixer, MmapRegion, OpenFlags,
    PcmDevice, PcmDirection,
};
use crate::pcm_config::{ComprConfig, PcmConfig, PcmEndpoint};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct MixerInner {
    known: Option<HashSet<String>>,
    values: HashMap<String, Vec<i64>>,
    enums: HashMap<String, String>,
    arrays: HashMap<String, Vec<u8>>,
    writes: Vec<(String, String)>,
    events: VecDeque<()>,
    subscribed: bool,
    unsubscribe_fails: bool,
}

#[derive(Default)]
pub struct MemoryMixer {
    inner: Mutex<MixerInner>,
}

impl MemoryMixer {
    /// A mixer exposing only `names`; any other control is reported missing.
    pub fn strict(names: &[&str]) -> Self {
        let inner = MixerInner {
            known: Some(names.iter().map(|n| n.to_string()).collect()),
            ..MixerInner::default()
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn add_control(&self, name: &str) {
        if let Some(known) = lock(&self.inner).known.as_mut() {
            known.insert(name.to_string());
        }
    }

    pub fn value(&self, name: &str) -> Option<i64> {
        lock(&self.inner)
            .values
            .get(name)
            .and_then(|v| v.first().copied())
    }

    pub fn values(&self, name: &str) -> Option<Vec<i64>> {
        lock(&self.inner).values.get(name).cloned()
    }

    pub fn enum_value(&self, name: &str) -> Option<String> {
        lock(&self.inner).enums.get(name).cloned()
    }

    pub fn array(&self, name: &str) -> Option<Vec<u8>> {
        lock(&self.inner).arrays.get(name).cloned()
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        lock(&self.inner).writes.clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.inner).writes.len()
    }

    pub fn clear_writes(&self) {
        lock(&self.inner).writes.clear();
    }

    pub fn push_event(&self) {
        lock(&self.inner).events.push_back(());
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.inner).subscribed
    }

    pub fn set_unsubscribe_fails(&self, fails: bool) {
        lock(&self.inner).unsubscribe_fails = fails;
    }

    fn check(inner: &MixerInner, name: &str) -> Result<(), String> {
        match &inner.known {
            Some(known) if !known.contains(name) => {
                Err(super::error_fmt::missing_control_error(name))
            }
            _ => Ok(()),
        }
    }
}

impl Mixer for MemoryMixer {
    fn has_control(&self, name: &str) -> bool {
        Self::check(&lock(&self.inner), name).is_ok()
    }

    fn num_values(&self, name: &str) -> Result<usize, String> {
        let inner = lock(&self.inner);
        Self::check(&inner, name)?;
        Ok(inner.values.get(name).map_or(1, Vec::len))
    }

    fn get_value(&self, name: &str, index: usize) -> Result<i64, String> {
        let inner = lock(&self.inner);
        Self::check(&inner, name)?;
        Ok(inner
            .values
            .get(name)
            .and_then(|v| v.get(index).copied())
            .unwrap_or(0))
    }

    fn set_value(&self, name: &str, index: usize, value: i64) -> Result<(), String> {
        let mut inner = lock(&self.inner);
        Self::check(&inner, name)?;
        let slot = inner.values.entry(name.to_string()).or_default();
        if slot.len() <= index {
            slot.resize(index + 1, 0);
        }
        slot[index] = value;
        inner.writes.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn get_array(&self, name: &str) -> Result<Vec<u8>, String> {
        let inner = lock(&self.inner);
        Self::check(&inner, name)?;
        Ok(inner.arrays.get(name).cloned().unwrap_or_default())
    }

    fn set_array(&self, name: &str, data: &[u8]) -> Result<(), String> {
        let mut inner = lock(&self.inner);
        Self::check(&inner, name)?;
        inner.arrays.insert(name.to_string(), data.to_vec());
        inner.writes.push((name.to_string(), format!("{data:?}")));
        Ok(())
    }

    fn set_enum_by_string(&self, name: &str, value: &str) -> Result<(), String> {
        let mut inner = lock(&self.inner);
        Self::check(&inner, name)?;
        inner.enums.insert(name.to_string(), value.to_string());
        inner.writes.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn subscribe_events(&self, enable: bool) -> Result<(), String> {
        let mut inner = lock(&self.inner);
        if !enable && inner.unsubscribe_fails {
            return Err("mixer event unsubscribe rejected".to_string());
        }
        inner.subscribed = enable;
        Ok(())
    }

    fn wait_event(&self, timeout: Duration) -> Result<bool, String> {
        if lock(&self.inner).events.pop_front().is_some() {
            return Ok(true);
        }
        std::thread::sleep(timeout.min(Duration::from_millis(2)));
        Ok(false)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOp {
    Apply(String),
    Reset(String),
    Update,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenRecord {
    pub endpoint: PcmEndpoint,
    pub direction: PcmDirection,
    pub flags: OpenFlags,
    pub config: PcmConfig,
}

#[derive(Default)]
struct BackendState {
    next_id: u64,
    live: HashMap<u64, (PcmEndpoint, PcmDirection)>,
    opens: Vec<OpenRecord>,
    closes: usize,
    failing: HashSet<PcmEndpoint>,
    avail: HashMap<PcmEndpoint, u32>,
    written: HashMap<PcmEndpoint, usize>,
    route_ops: Vec<RouteOp>,
    missing_route_inits: u32,
    route_init_fails: bool,
    mixer_paths: Option<String>,
    files: HashMap<PathBuf, String>,
    mmap_fd: Option<(i32, u32)>,
    compress_written: usize,
    compress_frames: u64,
    compress_metadata: Vec<GaplessMetadata>,
    compress_live: bool,
}

#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
    mixer: Arc<MemoryMixer>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_mixer(MemoryMixer::default())
    }
}

impl MemoryBackend {
    pub fn with_mixer(mixer: MemoryMixer) -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState::default())),
            mixer: Arc::new(mixer),
        }
    }

    pub fn mixer(&self) -> Arc<MemoryMixer> {
        self.mixer.clone()
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        lock(&self.state).opens.clone()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opens.len()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).closes
    }

    pub fn is_open(&self, endpoint: PcmEndpoint, direction: PcmDirection) -> bool {
        lock(&self.state)
            .live
            .values()
            .any(|(e, d)| *e == endpoint && *d == direction)
    }

    pub fn live_count(&self) -> usize {
        lock(&self.state).live.len()
    }

    pub fn fail_open(&self, endpoint: PcmEndpoint) {
        lock(&self.state).failing.insert(endpoint);
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failing.clear();
    }

    pub fn set_avail(&self, endpoint: PcmEndpoint, frames: u32) {
        lock(&self.state).avail.insert(endpoint, frames);
    }

    pub fn written_bytes(&self, endpoint: PcmEndpoint) -> usize {
        lock(&self.state).written.get(&endpoint).copied().unwrap_or(0)
    }

    pub fn route_ops(&self) -> Vec<RouteOp> {
        lock(&self.state).route_ops.clone()
    }

    pub fn applied_paths(&self) -> Vec<String> {
        self.route_ops()
            .into_iter()
            .filter_map(|op| match op {
                RouteOp::Apply(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn reset_paths(&self) -> Vec<String> {
        self.route_ops()
            .into_iter()
            .filter_map(|op| match op {
                RouteOp::Reset(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn clear_route_ops(&self) {
        lock(&self.state).route_ops.clear();
    }

    /// The next `count` route graphs report missing controls.
    pub fn set_missing_route_inits(&self, count: u32) {
        lock(&self.state).missing_route_inits = count;
    }

    pub fn set_route_init_fails(&self, fails: bool) {
        lock(&self.state).route_init_fails = fails;
    }

    /// Route graphs are built from this mixer-paths document instead of being recorded.
    pub fn set_mixer_paths(&self, xml: &str) {
        lock(&self.state).mixer_paths = Some(xml.to_string());
    }

    pub fn set_file(&self, path: impl Into<PathBuf>, contents: &str) {
        lock(&self.state)
            .files
            .insert(path.into(), contents.to_string());
    }

    pub fn remove_file(&self, path: &Path) {
        lock(&self.state).files.remove(path);
    }

    pub fn set_mmap_fd(&self, fd: Option<(i32, u32)>) {
        lock(&self.state).mmap_fd = fd;
    }

    pub fn compress_written(&self) -> usize {
        lock(&self.state).compress_written
    }

    pub fn set_compress_frames(&self, frames: u64) {
        lock(&self.state).compress_frames = frames;
    }

    pub fn compress_metadata(&self) -> Vec<GaplessMetadata> {
        lock(&self.state).compress_metadata.clone()
    }

    pub fn compress_open(&self) -> bool {
        lock(&self.state).compress_live
    }
}

impl AudioBackend for MemoryBackend {
    fn open_pcm(
        &self,
        card: u32,
        device: u32,
        direction: PcmDirection,
        flags: OpenFlags,
        config: &PcmConfig,
    ) -> Result<Box<dyn PcmDevice>, String> {
        let endpoint = PcmEndpoint::new(card, device);
        let mut state = lock(&self.state);
        if state.failing.contains(&endpoint) {
            return Err(super::error_fmt::backend_open_error(
                "memory",
                direction.as_str(),
                &endpoint.to_string(),
                "device not ready",
            ));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id, (endpoint, direction));
        state.opens.push(OpenRecord {
            endpoint,
            direction,
            flags,
            config: *config,
        });
        Ok(Box::new(MemoryPcm {
            id,
            endpoint,
            config: *config,
            state: self.state.clone(),
            hw_ptr: 0,
        }))
    }

    fn open_compress(
        &self,
        card: u32,
        device: u32,
        _config: &ComprConfig,
    ) -> Result<Box<dyn CompressDevice>, String> {
        let endpoint = PcmEndpoint::new(card, device);
        let mut state = lock(&self.state);
        if state.failing.contains(&endpoint) {
            return Err(super::error_fmt::backend_open_error(
                "memory",
                "compress",
                &endpoint.to_string(),
                "device not ready",
            ));
        }
        state.compress_live = true;
        Ok(Box::new(MemoryCompress {
            state: self.state.clone(),
        }))
    }

    fn open_mixer(&self, _card: u32) -> Result<Arc<dyn Mixer>, String> {
        Ok(self.mixer.clone())
    }

    fn open_route(
        &self,
        mixer: Arc<dyn Mixer>,
        _card: u32,
        xml_path: &Path,
    ) -> Result<Box<dyn AudioRoute>, String> {
        let mut state = lock(&self.state);
        if state.route_init_fails {
            return Err(format!(
                "Failed to init route from '{}'",
                xml_path.display()
            ));
        }
        if let Some(xml) = state.mixer_paths.clone() {
            return Ok(Box::new(MixerPaths::parse(mixer, &xml)?));
        }
        let missing = state.missing_route_inits > 0;
        if missing {
            state.missing_route_inits -= 1;
        }
        Ok(Box::new(MemoryRoute {
            state: self.state.clone(),
            missing,
        }))
    }

    fn read_text(&self, path: &Path) -> Result<String, String> {
        lock(&self.state)
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| format!("Failed to read '{}': not found", path.display()))
    }

    fn mmap_data_fd(
        &self,
        _card: u32,
        _device: u32,
        _direction: PcmDirection,
    ) -> Result<(i32, u32), String> {
        lock(&self.state)
            .mmap_fd
            .ok_or_else(|| "exclusive mmap buffer not available".to_string())
    }
}

struct MemoryRoute {
    state: Arc<Mutex<BackendState>>,
    missing: bool,
}

impl AudioRoute for MemoryRoute {
    fn apply_path(&self, name: &str) -> Result<(), String> {
        lock(&self.state)
            .route_ops
            .push(RouteOp::Apply(name.to_string()));
        Ok(())
    }

    fn reset_path(&self, name: &str) -> Result<(), String> {
        lock(&self.state)
            .route_ops
            .push(RouteOp::Reset(name.to_string()));
        Ok(())
    }

    fn update_mixer(&self) -> Result<(), String> {
        lock(&self.state).route_ops.push(RouteOp::Update);
        Ok(())
    }

    fn missing_controls(&self) -> bool {
        self.missing
    }
}

struct MemoryPcm {
    id: u64,
    endpoint: PcmEndpoint,
    config: PcmConfig,
    state: Arc<Mutex<BackendState>>,
    hw_ptr: u32,
}

impl Drop for MemoryPcm {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.live.remove(&self.id);
        state.closes += 1;
    }
}

impl PcmDevice for MemoryPcm {
    fn config(&self) -> &PcmConfig {
        &self.config
    }

    fn start(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, String> {
        *lock(&self.state).written.entry(self.endpoint).or_default() += data.len();
        Ok(data.len())
    }

    /// Fills captured frames with a per-channel constant (channel `c` reads `(c + 1) * 100`).
    fn read(&mut self, data: &mut [u8]) -> Result<usize, String> {
        let bps = self.config.format.bytes_per_sample() as usize;
        let channels = self.config.channels.max(1) as usize;
        for (i, sample) in data.chunks_exact_mut(bps).enumerate() {
            let value = ((i % channels) as i32 + 1) * 100;
            let bytes = match bps {
                2 => (value as i16).to_le_bytes().to_vec(),
                4 => (value << 16).to_le_bytes().to_vec(),
                _ => vec![0; bps],
            };
            sample.copy_from_slice(&bytes[..bps]);
        }
        Ok(data.len())
    }

    fn htimestamp(&mut self) -> Result<(u32, Duration), String> {
        let avail = lock(&self.state)
            .avail
            .get(&self.endpoint)
            .copied()
            .unwrap_or(self.config.buffer_frames());
        Ok((avail, now()))
    }

    fn mmap_begin(&mut self) -> Result<MmapRegion, String> {
        Ok(MmapRegion {
            offset: 0,
            frames: self.config.buffer_frames(),
        })
    }

    fn mmap_commit(&mut self, _offset: u32, frames: u32) -> Result<(), String> {
        self.hw_ptr = self.hw_ptr.wrapping_add(frames);
        Ok(())
    }

    fn mmap_hw_ptr(&mut self) -> Result<(u32, Duration), String> {
        Ok((self.hw_ptr, now()))
    }

    fn poll_fd(&self) -> Option<i32> {
        Some(100 + self.endpoint.device as i32)
    }
}

struct MemoryCompress {
    state: Arc<Mutex<BackendState>>,
}

impl Drop for MemoryCompress {
    fn drop(&mut self) {
        lock(&self.state).compress_live = false;
    }
}

impl CompressDevice for MemoryCompress {
    fn write(&mut self, data: &[u8]) -> Result<usize, String> {
        lock(&self.state).compress_written += data.len();
        Ok(data.len())
    }

    fn start(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn pause(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn resume(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn drain(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn set_nonblock(&mut self, _nonblock: bool) -> Result<(), String> {
        Ok(())
    }

    fn set_gapless_metadata(&mut self, meta: GaplessMetadata) -> Result<(), String> {
        lock(&self.state).compress_metadata.push(meta);
        Ok(())
    }

    fn tstamp(&mut self) -> Result<(u64, u32), String> {
        Ok((lock(&self.state).compress_frames, 48000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm_config::{ERAP_IN, endpoint};

    #[test]
    fn dropping_a_pcm_closes_it() {
        let backend = MemoryBackend::default();
        let pcm = backend
            .open_pcm(0, 15, PcmDirection::Capture, OpenFlags::MONOTONIC, &ERAP_IN)
            .unwrap();
        assert!(backend.is_open(endpoint::ERAP_IN, PcmDirection::Capture));
        drop(pcm);
        assert!(!backend.is_open(endpoint::ERAP_IN, PcmDirection::Capture));
        assert_eq!(backend.close_count(), 1);
    }

    #[test]
    fn failing_endpoints_refuse_to_open() {
        let backend = MemoryBackend::default();
        backend.fail_open(endpoint::ERAP_IN);
        assert!(
            backend
                .open_pcm(0, 15, PcmDirection::Capture, OpenFlags::MONOTONIC, &ERAP_IN)
                .is_err()
        );
        assert_eq!(backend.open_count(), 0);
    }
}
