use crate::hw::{AudioBackend, PcmDevice, PcmDirection};
use crate::pcm_config::{
    MMAP_PERIOD_COUNT_MAX, MMAP_PERIOD_COUNT_MIN, MMAP_PERIOD_SIZE, PcmConfig, PcmEndpoint,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

/// What the framework needs to drive an MMAP stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MmapBufferInfo {
    pub shared_memory_fd: i32,
    pub buffer_size_frames: u32,
    pub burst_size_frames: u32,
    /// The fd is the DMA buffer itself rather than a poll descriptor.
    pub exclusive: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MmapPosition {
    pub position_frames: u32,
    pub time: Duration,
}

/// Period count covering `min_size_frames`: doubled from the floor while it
/// stays below both the request and the ceiling.
pub fn mmap_period_count(period_size: u32, min_size_frames: u32) -> u32 {
    let period_size = period_size.max(1);
    let requested = min_size_frames.div_ceil(period_size);
    let mut count = MMAP_PERIOD_COUNT_MIN;
    while count < requested && count * 2 < MMAP_PERIOD_COUNT_MAX {
        count *= 2;
    }
    count
}

pub fn adjust_mmap_period_count(config: &mut PcmConfig, min_size_frames: u32) {
    config.period_count = mmap_period_count(config.period_size, min_size_frames);
    info!(
        "mmap period count {} for minimum {} frames",
        config.period_count, min_size_frames
    );
}

/// Begins the MMAP session on an opened PCM and resolves the buffer the
/// framework should map. Exclusive mode needs the DMA buffer fd; without it
/// the poll fd is handed out for shared mode.
pub fn setup_mmap(
    backend: &dyn AudioBackend,
    pcm: &mut dyn PcmDevice,
    endpoint: PcmEndpoint,
    direction: PcmDirection,
) -> Result<MmapBufferInfo, String> {
    pcm.mmap_begin()?;
    let config = *pcm.config();
    let buffer_frames = config.buffer_frames();
    let buffer_bytes = config.frames_to_bytes(buffer_frames);
    let mut info = MmapBufferInfo {
        shared_memory_fd: -1,
        buffer_size_frames: buffer_frames,
        burst_size_frames: config.period_size,
        exclusive: false,
    };
    match backend.mmap_data_fd(endpoint.card, endpoint.device, direction) {
        Ok((fd, size)) => {
            if size < buffer_bytes {
                error!("{endpoint} MMAP buffer size {size} below {buffer_bytes}");
                return Err(format!("{endpoint} MMAP buffer size not matching"));
            }
            info.shared_memory_fd = fd;
            info.exclusive = true;
        }
        Err(e) => {
            info!("{endpoint} MMAP exclusive mode not supported: {e}");
            info.shared_memory_fd = pcm
                .poll_fd()
                .ok_or_else(|| format!("{endpoint} has no poll fd"))?;
        }
    }
    pcm.mmap_commit(0, MMAP_PERIOD_SIZE)?;
    info!(
        "{endpoint} MMAP fd {} buffer {} burst {} exclusive {}",
        info.shared_memory_fd, info.buffer_size_frames, info.burst_size_frames, info.exclusive
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::OpenFlags;
    use crate::hw::memory::MemoryBackend;
    use crate::pcm_config::{MMAP_PLAYBACK, endpoint};

    #[test]
    fn period_count_doubles_to_cover_request() {
        assert_eq!(mmap_period_count(48, 0), 32);
        assert_eq!(mmap_period_count(48, 48 * 32), 32);
        assert_eq!(mmap_period_count(48, 48 * 33), 64);
        assert_eq!(mmap_period_count(48, 48 * 100), 128);
        assert_eq!(mmap_period_count(48, 48 * 10_000), 256);
    }

    #[test]
    fn shared_mode_falls_back_to_poll_fd() {
        let backend = MemoryBackend::default();
        let mut config = MMAP_PLAYBACK;
        adjust_mmap_period_count(&mut config, 48 * 40);
        let ep = endpoint::MMAP_PLAYBACK;
        let mut pcm = backend
            .open_pcm(ep.card, ep.device, PcmDirection::Playback, OpenFlags::MMAP, &config)
            .unwrap();
        let info = setup_mmap(&backend, pcm.as_mut(), ep, PcmDirection::Playback).unwrap();
        assert!(!info.exclusive);
        assert_eq!(info.shared_memory_fd, 102);
        assert_eq!(info.buffer_size_frames, 48 * 64);
        assert_eq!(info.burst_size_frames, 48);
    }

    #[test]
    fn exclusive_buffer_must_cover_ring() {
        let backend = MemoryBackend::default();
        let ep = endpoint::MMAP_PLAYBACK;
        let mut config = MMAP_PLAYBACK;
        adjust_mmap_period_count(&mut config, 0);
        let bytes = config.frames_to_bytes(config.buffer_frames());

        backend.set_mmap_fd(Some((7, bytes)));
        let mut pcm = backend
            .open_pcm(ep.card, ep.device, PcmDirection::Playback, OpenFlags::MMAP, &config)
            .unwrap();
        let info = setup_mmap(&backend, pcm.as_mut(), ep, PcmDirection::Playback).unwrap();
        assert!(info.exclusive);
        assert_eq!(info.shared_memory_fd, 7);

        backend.set_mmap_fd(Some((7, bytes - 1)));
        assert!(setup_mmap(&backend, pcm.as_mut(), ep, PcmDirection::Playback).is_err());
    }
}
