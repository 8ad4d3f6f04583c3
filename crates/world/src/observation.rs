use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Observations are RGB.
pub const CHANNELS: usize = 3;

/// Spatial size of one resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub height: usize,
    pub width: usize,
}

impl Resolution {
    #[must_use]
    pub const fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    #[must_use]
    pub const fn shape(self) -> [usize; 3] {
        [self.height, self.width, CHANNELS]
    }

    #[must_use]
    pub const fn byte_len(self) -> usize {
        self.height * self.width * CHANNELS
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.height == 0 || self.width == 0
    }

    /// True when `self` is at least as large as `other` on both axes.
    #[must_use]
    pub const fn covers(self, other: Resolution) -> bool {
        self.height >= other.height && self.width >= other.width
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One generated (or spawn) frame, `[height, width, 3]` row-major RGB bytes.
///
/// The pixel buffer is shared, so clones are cheap and an observation can sit
/// in several windows and the recorder at once without copying. There is no
/// way to mutate it after construction.
#[derive(Clone, PartialEq, Eq)]
pub struct Observation {
    data: Arc<[u8]>,
    resolution: Resolution,
}

impl Observation {
    /// Returns `None` when `data` does not hold exactly one frame of
    /// `resolution`.
    #[must_use]
    pub fn from_raw(resolution: Resolution, data: impl Into<Arc<[u8]>>) -> Option<Self> {
        let data = data.into();
        (data.len() == resolution.byte_len() && !resolution.is_empty())
            .then_some(Self { data, resolution })
    }

    #[must_use]
    pub fn filled(resolution: Resolution, rgb: [u8; 3]) -> Self {
        Self::from_fn(resolution, |_, _| rgb)
    }

    /// # Panics
    ///
    /// Panics if `resolution` is empty.
    #[must_use]
    pub fn from_fn(resolution: Resolution, mut pixel: impl FnMut(usize, usize) -> [u8; 3]) -> Self {
        assert!(!resolution.is_empty(), "observation resolution {resolution} is empty");
        let mut data = Vec::with_capacity(resolution.byte_len());
        for y in 0..resolution.height {
            for x in 0..resolution.width {
                data.extend_from_slice(&pixel(y, x));
            }
        }
        Self { data: data.into(), resolution }
    }

    #[must_use]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    #[must_use]
    pub fn shape(&self) -> [usize; 3] {
        self.resolution.shape()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// # Panics
    ///
    /// Panics if `(y, x)` lies outside the frame.
    #[must_use]
    pub fn pixel(&self, y: usize, x: usize) -> [u8; 3] {
        assert!(y < self.resolution.height && x < self.resolution.width);
        let i = (y * self.resolution.width + x) * CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Mean of all channel values, in `0.0..=255.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_intensity(&self) -> f32 {
        let sum: u64 = self.data.iter().map(|&v| u64::from(v)).sum();
        sum as f32 / self.data.len() as f32
    }

    /// `None` when `target` is empty.
    #[must_use]
    pub fn resize_nearest(&self, target: Resolution) -> Option<Self> {
        if target.is_empty() {
            return None;
        }
        if target == self.resolution {
            return Some(self.clone());
        }
        let src = self.resolution;
        Some(Self::from_fn(target, |y, x| {
            let sy = y * src.height / target.height;
            let sx = x * src.width / target.width;
            self.pixel(sy, sx)
        }))
    }

    /// Loads a PNG (any colour type) as RGB.
    ///
    /// # Errors
    ///
    /// Propagates decoding and I/O failures from `image`.
    pub fn load_png(path: &Path) -> image::ImageResult<Self> {
        let rgb = image::open(path)?.to_rgb8();
        let resolution = Resolution::new(rgb.height() as usize, rgb.width() as usize);
        Ok(Self { data: rgb.into_raw().into(), resolution })
    }

    /// # Errors
    ///
    /// Propagates encoding and I/O failures from `image`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn save_png(&self, path: &Path) -> image::ImageResult<()> {
        image::save_buffer(
            path,
            &self.data,
            self.resolution.width as u32,
            self.resolution.height as u32,
            image::ColorType::Rgb8,
        )
    }
}

impl fmt::Debug for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observation")
            .field("shape", &self.shape())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_checks_length() {
        let res = Resolution::new(2, 3);
        assert!(Observation::from_raw(res, vec![0u8; 18]).is_some());
        assert!(Observation::from_raw(res, vec![0u8; 17]).is_none());
        assert!(Observation::from_raw(Resolution::new(0, 3), Vec::<u8>::new()).is_none());
    }

    #[test]
    fn resize_nearest_repeats_pixels() {
        let small = Observation::from_fn(Resolution::new(1, 2), |_, x| [x as u8 * 100, 0, 0]);
        let big = small.resize_nearest(Resolution::new(2, 4)).unwrap();
        assert_eq!(big.shape(), [2, 4, 3]);
        assert_eq!(big.pixel(1, 0), [0, 0, 0]);
        assert_eq!(big.pixel(1, 1), [0, 0, 0]);
        assert_eq!(big.pixel(0, 2), [100, 0, 0]);
        assert_eq!(big.pixel(1, 3), [100, 0, 0]);
    }

    #[test]
    fn resizing_to_nothing_is_refused() {
        let obs = Observation::filled(Resolution::new(2, 2), [5, 5, 5]);
        assert!(obs.resize_nearest(Resolution::new(0, 4)).is_none());
        assert!(obs.resize_nearest(Resolution::new(3, 0)).is_none());
        assert_eq!(obs.resize_nearest(obs.resolution()), Some(obs.clone()));
    }

    #[test]
    #[should_panic(expected = "is empty")]
    fn from_fn_rejects_an_empty_resolution() {
        let _ = Observation::from_fn(Resolution::new(0, 3), |_, _| [0, 0, 0]);
    }

    #[test]
    fn clones_share_the_buffer() {
        let obs = Observation::filled(Resolution::new(4, 4), [1, 2, 3]);
        let copy = obs.clone();
        assert!(std::ptr::eq(obs.as_bytes(), copy.as_bytes()));
    }
}
