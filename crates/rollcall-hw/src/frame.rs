//! Frame type and pixel conversions.

use std::time::Instant;

/// A captured grayscale camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Shrink by an integer factor, averaging each `factor × factor` block.
    ///
    /// A factor of 0 or 1 returns a copy. Trailing rows/columns that do not
    /// fill a whole block are dropped.
    pub fn downscale(&self, factor: u32) -> Frame {
        if factor <= 1 {
            return self.clone();
        }
        let f = factor as usize;
        let (w, h) = (self.width as usize, self.height as usize);
        let (out_w, out_h) = ((w / f).max(1), (h / f).max(1));
        let block_w = f.min(w);
        let block_h = f.min(h);

        let mut data = Vec::with_capacity(out_w * out_h);
        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut sum = 0u32;
                let mut count = 0u32;
                for y in oy * f..(oy * f + block_h).min(h) {
                    let row = y * w;
                    for x in ox * f..(ox * f + block_w).min(w) {
                        if let Some(&p) = self.data.get(row + x) {
                            sum += p as u32;
                            count += 1;
                        }
                    }
                }
                data.push(if count > 0 { (sum / count) as u8 } else { 0 });
            }
        }

        Frame {
            data,
            width: out_w as u32,
            height: out_h as u32,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by keeping the Y samples.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        let yuyv: Vec<u8> = (0..16).collect();
        let gray = yuyv_to_grayscale(&yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_downscale_averages_blocks() {
        // 4x2 frame, factor 2 → 2x1
        let frame = Frame::new(vec![0, 4, 10, 10, 8, 12, 20, 40], 4, 2, 7);
        let small = frame.downscale(2);
        assert_eq!((small.width, small.height), (2, 1));
        assert_eq!(small.data, vec![6, 20]);
        assert_eq!(small.sequence, 7);
    }

    #[test]
    fn test_downscale_by_four() {
        let frame = Frame::new(vec![100u8; 640 * 480], 640, 480, 0);
        let small = frame.downscale(4);
        assert_eq!((small.width, small.height), (160, 120));
        assert_eq!(small.data.len(), 160 * 120);
        assert!(small.data.iter().all(|&p| p == 100));
    }

    #[test]
    fn test_downscale_factor_one_is_copy() {
        let frame = Frame::new(vec![1, 2, 3, 4], 2, 2, 0);
        assert_eq!(frame.downscale(1).data, frame.data);
        assert_eq!(frame.downscale(0).data, frame.data);
    }
}
