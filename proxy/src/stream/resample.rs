//! Capture-side sample rate conversion. The resampler pulls hardware
//! periods from a [`FrameProvider`] as it needs them.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::info;

/// Source of interleaved, normalized frames at the hardware rate.
pub trait FrameProvider {
    /// Next chunk of interleaved frames. An empty chunk means the source is dry.
    fn next_frames(&mut self) -> Result<Vec<f32>, String>;
}

pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    from_rate: u32,
    to_rate: u32,
    pending_in: Vec<Vec<f32>>,
    pending_out: Vec<Vec<f32>>,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("channels", &self.channels)
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .finish()
    }
}

impl StreamResampler {
    pub fn new(
        from_rate: u32,
        to_rate: u32,
        channels: usize,
        chunk_frames: usize,
    ) -> Result<Self, String> {
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            2.0,
            params,
            chunk_frames.max(1),
            channels.max(1),
        )
        .map_err(|e| format!("Failed to create resampler: {e}"))?;
        info!("resampler created {from_rate} -> {to_rate} with {channels} channels");
        Ok(Self {
            inner,
            channels: channels.max(1),
            from_rate,
            to_rate,
            pending_in: vec![Vec::new(); channels.max(1)],
            pending_out: vec![Vec::new(); channels.max(1)],
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        self.pending_in.iter_mut().for_each(Vec::clear);
        self.pending_out.iter_mut().for_each(Vec::clear);
    }

    /// Produces exactly `frames` interleaved output frames unless the
    /// provider runs dry first.
    pub fn resample(
        &mut self,
        provider: &mut dyn FrameProvider,
        frames: usize,
    ) -> Result<Vec<f32>, String> {
        while self.pending_out[0].len() < frames {
            let needed = self.inner.input_frames_next();
            while self.pending_in[0].len() < needed {
                let chunk = provider.next_frames()?;
                if chunk.is_empty() {
                    return Ok(self.drain(frames));
                }
                for (i, sample) in chunk.into_iter().enumerate() {
                    self.pending_in[i % self.channels].push(sample);
                }
            }
            let input: Vec<&[f32]> = self.pending_in.iter().map(|ch| &ch[..needed]).collect();
            let output = self
                .inner
                .process(&input, None)
                .map_err(|e| format!("Failed to resample: {e}"))?;
            for (pending, produced) in self.pending_out.iter_mut().zip(output) {
                pending.extend(produced);
            }
            for ch in &mut self.pending_in {
                ch.drain(..needed);
            }
        }
        Ok(self.drain(frames))
    }

    fn drain(&mut self, frames: usize) -> Vec<f32> {
        let frames = frames.min(self.pending_out[0].len());
        let mut out = Vec::with_capacity(frames * self.channels);
        for i in 0..frames {
            for ch in &self.pending_out {
                out.push(ch[i]);
            }
        }
        for ch in &mut self.pending_out {
            ch.drain(..frames);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Periods {
        channels: usize,
        period: usize,
        left: usize,
    }

    impl FrameProvider for Periods {
        fn next_frames(&mut self) -> Result<Vec<f32>, String> {
            if self.left == 0 {
                return Ok(Vec::new());
            }
            self.left -= 1;
            Ok(vec![0.25; self.period * self.channels])
        }
    }

    #[test]
    fn downsamples_to_the_requested_frame_count() {
        let mut resampler = StreamResampler::new(48000, 16000, 2, 960).unwrap();
        let mut provider = Periods {
            channels: 2,
            period: 960,
            left: 100,
        };
        let out = resampler.resample(&mut provider, 320).unwrap();
        assert_eq!(out.len(), 320 * 2);
        let out = resampler.resample(&mut provider, 320).unwrap();
        assert_eq!(out.len(), 320 * 2);
    }

    #[test]
    fn dry_provider_returns_what_is_buffered() {
        let mut resampler = StreamResampler::new(48000, 44100, 1, 480).unwrap();
        let mut provider = Periods {
            channels: 1,
            period: 480,
            left: 0,
        };
        assert!(resampler.resample(&mut provider, 100).unwrap().is_empty());
    }
}
