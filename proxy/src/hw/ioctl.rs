use nix::libc;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ComprBuffer {
    pub fragment_size: u32,
    pub fragments: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Codec {
    pub id: u32,
    pub ch_in: u32,
    pub ch_out: u32,
    pub sample_rate: u32,
    pub bit_rate: u32,
    pub rate_control: u32,
    pub profile: u32,
    pub level: u32,
    pub ch_mode: u32,
    pub format: u32,
    pub align: u32,
    pub options: [u32; 16],
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ComprParams {
    pub buffer: ComprBuffer,
    pub codec: Codec,
    pub no_wake_mode: u8,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ComprTstamp {
    pub byte_offset: u32,
    pub copied_total: u32,
    pub pcm_frames: u32,
    pub pcm_io_frames: u32,
    pub sampling_rate: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ComprMetadata {
    pub key: u32,
    pub value: [u32; 8],
}

pub const METADATA_ENCODER_PADDING: u32 = 1;
pub const METADATA_ENCODER_DELAY: u32 = 2;

pub const CODEC_PCM: u32 = 1;
pub const CODEC_MP3: u32 = 2;
pub const CODEC_AAC: u32 = 6;
pub const CODEC_FLAC: u32 = 10;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapFd {
    pub dir: i32,
    pub fd: i32,
    pub size: i32,
    pub actual_size: i32,
}

const SNDRV_COMPRESS_MAGIC: u8 = b'C';
const SNDRV_COMPRESS_SET_PARAMS: u8 = 0x12;
const SNDRV_COMPRESS_SET_METADATA: u8 = 0x14;
const SNDRV_COMPRESS_TSTAMP: u8 = 0x20;
const SNDRV_COMPRESS_PAUSE: u8 = 0x30;
const SNDRV_COMPRESS_RESUME: u8 = 0x31;
const SNDRV_COMPRESS_START: u8 = 0x32;
const SNDRV_COMPRESS_STOP: u8 = 0x33;
const SNDRV_COMPRESS_DRAIN: u8 = 0x34;

nix::ioctl_write_ptr!(
    compr_set_params,
    SNDRV_COMPRESS_MAGIC,
    SNDRV_COMPRESS_SET_PARAMS,
    ComprParams
);
nix::ioctl_write_ptr!(
    compr_set_metadata,
    SNDRV_COMPRESS_MAGIC,
    SNDRV_COMPRESS_SET_METADATA,
    ComprMetadata
);
nix::ioctl_read!(
    compr_tstamp,
    SNDRV_COMPRESS_MAGIC,
    SNDRV_COMPRESS_TSTAMP,
    ComprTstamp
);
nix::ioctl_none!(compr_pause, SNDRV_COMPRESS_MAGIC, SNDRV_COMPRESS_PAUSE);
nix::ioctl_none!(compr_resume, SNDRV_COMPRESS_MAGIC, SNDRV_COMPRESS_RESUME);
nix::ioctl_none!(compr_start, SNDRV_COMPRESS_MAGIC, SNDRV_COMPRESS_START);
nix::ioctl_none!(compr_stop, SNDRV_COMPRESS_MAGIC, SNDRV_COMPRESS_STOP);
nix::ioctl_none!(compr_drain, SNDRV_COMPRESS_MAGIC, SNDRV_COMPRESS_DRAIN);

const SNDRV_PCM_MAGIC: u8 = b'U';
const SNDRV_PCM_MMAP_DATA_FD: u8 = 0xd2;

nix::ioctl_readwrite!(
    pcm_mmap_data_fd,
    SNDRV_PCM_MAGIC,
    SNDRV_PCM_MMAP_DATA_FD,
    MmapFd
);

pub fn set_nonblock(fd: i32, nonblock: bool) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let flags = if nonblock {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
