//! Compositing of dispersed class images
//!
//! [`CompositeAccumulator`] sums the per-class dispersed images and owns the
//! rule that the background is injected into exactly one of them: the first
//! populated class. The finished frame then has its reference pixels zeroed
//! and is cropped to the requested subarray.

use std::path::Path;

use ndarray::{s, Array2};
use shared::fits::{write_fits, HeaderCard, ImageHdu, ImagePayload};
use shared::FitsError;
use thiserror::Error;

use crate::config::{ConfigError, SubarrayBounds};
use crate::disperser::{DirectSeed, DispersedClassImage, DisperserError, SourceClass};

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("background was already injected into the {first} image; refusing to add it to the {second} image")]
    BackgroundInjectedTwice {
        first: SourceClass,
        second: SourceClass,
    },

    #[error("no source class has any sources, so the background would never be added")]
    NoPopulatedClass,

    #[error("dispersed images were added but the background was never injected")]
    BackgroundMissing,

    #[error("{class} image is {found:?} but the composite frame is {expected:?}")]
    ShapeMismatch {
        class: SourceClass,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error(transparent)]
    Disperser(#[from] DisperserError),
}

/// Running sum of dispersed class images
#[derive(Debug)]
pub struct CompositeAccumulator {
    sum: Array2<f64>,
    background_class: Option<SourceClass>,
    classes: Vec<SourceClass>,
}

impl CompositeAccumulator {
    pub fn new(frame: (usize, usize)) -> Self {
        Self {
            sum: Array2::zeros(frame),
            background_class: None,
            classes: Vec::new(),
        }
    }

    pub fn frame(&self) -> (usize, usize) {
        self.sum.dim()
    }

    /// True until the background has been injected
    pub fn needs_background(&self) -> bool {
        self.background_class.is_none()
    }

    /// Class whose image carries the background
    pub fn background_class(&self) -> Option<SourceClass> {
        self.background_class
    }

    /// Classes added so far, in order
    pub fn classes(&self) -> &[SourceClass] {
        &self.classes
    }

    /// Finalize `image` with the background
    ///
    /// Fails if the background has already gone into another image.
    pub fn inject_background(
        &mut self,
        image: &mut DispersedClassImage,
        background: &Array2<f64>,
    ) -> Result<(), CompositeError> {
        if let Some(first) = self.background_class {
            return Err(CompositeError::BackgroundInjectedTwice {
                first,
                second: image.class(),
            });
        }
        image.finalize(Some(background))?;
        self.background_class = Some(image.class());
        Ok(())
    }

    /// Add a class image to the sum, finalizing it without background if
    /// that has not happened yet
    pub fn add(&mut self, mut image: DispersedClassImage) -> Result<(), CompositeError> {
        if image.image().dim() != self.sum.dim() {
            return Err(CompositeError::ShapeMismatch {
                class: image.class(),
                expected: self.sum.dim(),
                found: image.image().dim(),
            });
        }
        if !image.is_finalized() {
            image.finalize(None)?;
        }
        self.classes.push(image.class());
        self.sum += image.image();
        Ok(())
    }

    /// The composite, in e-/s
    pub fn finish(self) -> Result<Array2<f64>, CompositeError> {
        if self.classes.is_empty() {
            return Err(CompositeError::NoPopulatedClass);
        }
        if self.background_class.is_none() {
            return Err(CompositeError::BackgroundMissing);
        }
        Ok(self.sum)
    }
}

/// Zero a border of `width` pixels on all four edges
pub fn zero_reference_pixels(image: &mut Array2<f64>, width: usize) {
    let (rows, cols) = image.dim();
    let rw = width.min(rows);
    let cw = width.min(cols);
    image.slice_mut(s![..rw, ..]).fill(0.0);
    image.slice_mut(s![rows - rw.., ..]).fill(0.0);
    image.slice_mut(s![.., ..cw]).fill(0.0);
    image.slice_mut(s![.., cols - cw..]).fill(0.0);
}

/// Crop to an inclusive subarray rectangle
pub fn crop_to_subarray<T: Clone>(
    image: &Array2<T>,
    bounds: &SubarrayBounds,
) -> Result<Array2<T>, ConfigError> {
    let (rows, cols) = image.dim();
    bounds.validate(rows, cols)?;
    Ok(image
        .slice(s![bounds.ystart..=bounds.yend, bounds.xstart..=bounds.xend])
        .to_owned())
}

/// Combined segmentation map on the frame
///
/// Seeds are placed the same way the disperser places them; where several
/// seeds label a pixel the first one wins.
pub fn merge_segmaps(frame: (usize, usize), seeds: &[&DirectSeed]) -> Array2<i32> {
    let mut merged = Array2::<i32>::zeros(frame);
    for seed in seeds {
        let Some(segmap) = seed.segmap() else {
            continue;
        };
        let (row_offset, col_offset) = seed.frame_offset(frame);
        for ((row, col), &id) in segmap.indexed_iter() {
            if id == 0 {
                continue;
            }
            let r = row as isize - row_offset;
            let c = col as isize - col_offset;
            if r < 0 || c < 0 || r as usize >= frame.0 || c as usize >= frame.1 {
                continue;
            }
            let slot = &mut merged[[r as usize, c as usize]];
            if *slot == 0 {
                *slot = id;
            }
        }
    }
    merged
}

/// Write the dispersed seed: header-only primary plus one image extension,
/// both tagged `UNITS = 'e/sec'`
pub fn write_dispersed_seed(path: &Path, image: &Array2<f64>) -> Result<(), FitsError> {
    write_fits(
        path,
        &[HeaderCard::text("UNITS", "e/sec")],
        &[ImageHdu::new("SCI", ImagePayload::F64(image))
            .with_card(HeaderCard::text("UNITS", "e/sec"))],
    )
}
