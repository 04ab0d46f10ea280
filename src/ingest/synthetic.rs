//! Synthetic frame source (`stub://<frames>`).
//!
//! Produces a fixed number of small gradient frames. `stub://<frames>?uncounted` hides
//! the frame count, mimicking containers that do not report one.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Frame, VideoDecoder};

const SYNTHETIC_WIDTH: u32 = 64;
const SYNTHETIC_HEIGHT: u32 = 48;

pub struct SyntheticDecoder {
    total: u64,
    report_count: bool,
    produced: u64,
    released: Option<Arc<AtomicBool>>,
}

impl SyntheticDecoder {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            report_count: true,
            produced: 0,
            released: None,
        }
    }

    /// Parse the part after `stub://`.
    pub fn from_descriptor(descriptor: &str) -> Result<Self> {
        let (count, flags) = match descriptor.split_once('?') {
            Some((count, flags)) => (count, Some(flags)),
            None => (descriptor, None),
        };
        let total: u64 = count
            .trim()
            .parse()
            .map_err(|_| anyhow!("stub source needs a frame count, got {count:?}"))?;
        let mut decoder = Self::new(total);
        match flags {
            None => {}
            Some("uncounted") => decoder = decoder.uncounted(),
            Some(other) => return Err(anyhow!("unknown stub option {other:?}")),
        }
        Ok(decoder)
    }

    pub fn uncounted(mut self) -> Self {
        self.report_count = false;
        self
    }

    /// Flag raised when the decoder is dropped.
    pub fn with_release_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.released = Some(flag);
        self
    }

    fn render(&self) -> Vec<u8> {
        let len = (SYNTHETIC_WIDTH * SYNTHETIC_HEIGHT * 3) as usize;
        (0..len)
            .map(|i| ((i as u64 + self.produced * 7) % 256) as u8)
            .collect()
    }
}

impl VideoDecoder for SyntheticDecoder {
    fn frame_count(&self) -> Option<u64> {
        self.report_count.then_some(self.total)
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        if self.produced >= self.total {
            return Ok(None);
        }
        let pixels = self.render();
        self.produced += 1;
        Ok(Some(Frame::new(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, pixels)))
    }
}

impl Drop for SyntheticDecoder {
    fn drop(&mut self) {
        if let Some(flag) = &self.released {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_count_and_flags() -> Result<()> {
        assert_eq!(SyntheticDecoder::from_descriptor("12")?.frame_count(), Some(12));
        assert_eq!(SyntheticDecoder::from_descriptor("12?uncounted")?.frame_count(), None);
        assert!(SyntheticDecoder::from_descriptor("many").is_err());
        assert!(SyntheticDecoder::from_descriptor("4?loop").is_err());
        Ok(())
    }

    #[test]
    fn frames_are_rgb24() -> Result<()> {
        let mut decoder = SyntheticDecoder::new(1);
        let frame = decoder.read_next()?.expect("one frame");
        assert_eq!(
            frame.pixels.len(),
            (frame.width * frame.height * 3) as usize
        );
        assert!(decoder.read_next()?.is_none());
        Ok(())
    }

    #[test]
    fn drop_raises_release_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let decoder = SyntheticDecoder::new(5).with_release_flag(flag.clone());
        drop(decoder);
        assert!(flag.load(Ordering::SeqCst));
    }
}
