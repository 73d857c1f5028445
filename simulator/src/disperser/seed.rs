//! Direct (undispersed) seed images

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use shared::fits::{has_hdu, read_image, read_image_i32, HduRef};

use super::DisperserError;
use crate::instrument::pivot_wavelength_um;

/// Source classes rendered into separate seed images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceClass {
    PointSource,
    Galaxy,
    Extended,
}

impl SourceClass {
    /// Dispersal order
    pub const ALL: [SourceClass; 3] = [
        SourceClass::PointSource,
        SourceClass::Galaxy,
        SourceClass::Extended,
    ];

    /// Tag used in seed file names, e.g. `<stem>_ptsrc_seed_image.fits`
    pub fn file_tag(&self) -> &'static str {
        match self {
            SourceClass::PointSource => "ptsrc",
            SourceClass::Galaxy => "galaxy",
            SourceClass::Extended => "extended",
        }
    }
}

impl fmt::Display for SourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceClass::PointSource => "point source",
            SourceClass::Galaxy => "galaxy",
            SourceClass::Extended => "extended source",
        };
        write!(f, "{name}")
    }
}

/// Direct seed image for one source class in one filter
///
/// Pixel values are e-/s through `filter`. The segmentation map, when
/// present, labels each pixel with the id of the source that dominates it
/// (0 for none).
#[derive(Debug, Clone)]
pub struct DirectSeed {
    class: SourceClass,
    filter: String,
    image: Array2<f64>,
    segmap: Option<Array2<i32>>,
}

impl DirectSeed {
    pub fn new(
        class: SourceClass,
        filter: &str,
        image: Array2<f64>,
        segmap: Option<Array2<i32>>,
    ) -> Result<Self, DisperserError> {
        if let Some(seg) = &segmap {
            if seg.dim() != image.dim() {
                return Err(DisperserError::SegmapShapeMismatch {
                    expected: image.dim(),
                    found: seg.dim(),
                });
            }
        }
        Ok(Self {
            class,
            filter: filter.to_uppercase(),
            image,
            segmap,
        })
    }

    /// Read the `SCI` extension and, if present, the `SEGMAP` extension
    pub fn load<P: AsRef<Path>>(
        path: P,
        class: SourceClass,
        filter: &str,
    ) -> Result<Self, DisperserError> {
        let path = path.as_ref();
        let image = read_image(path, HduRef::Name("SCI"))?;
        let segmap = if has_hdu(path, "SEGMAP")? {
            Some(read_image_i32(path, HduRef::Name("SEGMAP"))?)
        } else {
            None
        };
        Self::new(class, filter, image, segmap)
    }

    pub fn class(&self) -> SourceClass {
        self.class
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn image(&self) -> &Array2<f64> {
        &self.image
    }

    pub fn segmap(&self) -> Option<&Array2<i32>> {
        self.segmap.as_ref()
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.image.dim()
    }

    pub fn pivot_um(&self) -> Option<f64> {
        pivot_wavelength_um(&self.filter)
    }

    /// Whether any pixel carries signal
    pub fn is_populated(&self) -> bool {
        self.image.iter().any(|v| v.is_finite() && *v > 0.0)
    }

    /// Segmentation id at a pixel, 0 without a segmentation map
    pub fn source_id(&self, row: usize, col: usize) -> i32 {
        self.segmap
            .as_ref()
            .and_then(|seg| seg.get((row, col)).copied())
            .unwrap_or(0)
    }

    /// Rows and columns to subtract from a seed pixel to place it on a frame
    ///
    /// Seeds larger than the frame are centred on it.
    pub fn frame_offset(&self, frame: (usize, usize)) -> (isize, isize) {
        centred_offset(self.shape(), frame)
    }
}

/// Offset that centres an array of `shape` on a frame of `frame`
pub fn centred_offset(shape: (usize, usize), frame: (usize, usize)) -> (isize, isize) {
    (
        (shape.0 as isize - frame.0 as isize) / 2,
        (shape.1 as isize - frame.1 as isize) / 2,
    )
}

/// Standard seed file name for a class next to the output products
pub fn seed_file_name(stem: &str, class: SourceClass) -> PathBuf {
    PathBuf::from(format!("{stem}_{}_seed_image.fits", class.file_tag()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::fits::{write_fits, ImageHdu, ImagePayload};
    use tempfile::TempDir;

    #[test]
    fn test_populated() {
        let mut image = Array2::<f64>::zeros((5, 5));
        let empty = DirectSeed::new(SourceClass::Galaxy, "F150W", image.clone(), None).unwrap();
        assert!(!empty.is_populated());

        image[[2, 2]] = 3.0;
        let seed = DirectSeed::new(SourceClass::Galaxy, "f150w", image, None).unwrap();
        assert!(seed.is_populated());
        assert_eq!(seed.filter(), "F150W");
        assert_eq!(seed.pivot_um(), Some(1.5));
        assert_eq!(seed.source_id(2, 2), 0);
    }

    #[test]
    fn test_segmap_shape_checked() {
        let image = Array2::<f64>::zeros((5, 5));
        let segmap = Array2::<i32>::zeros((4, 5));
        let err =
            DirectSeed::new(SourceClass::PointSource, "F444W", image, Some(segmap)).unwrap_err();
        assert!(matches!(err, DisperserError::SegmapShapeMismatch { .. }));
    }

    #[test]
    fn test_centring_offset() {
        assert_eq!(centred_offset((64, 64), (64, 64)), (0, 0));
        assert_eq!(centred_offset((80, 70), (64, 64)), (8, 3));
    }

    #[test]
    fn test_load_with_segmap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(seed_file_name("obs", SourceClass::PointSource));
        assert!(path.ends_with("obs_ptsrc_seed_image.fits"));

        let mut image = Array2::<f64>::zeros((8, 6));
        image[[4, 3]] = 12.5;
        let mut segmap = Array2::<i32>::zeros((8, 6));
        segmap[[4, 3]] = 7;
        write_fits(
            &path,
            &[],
            &[
                ImageHdu::new("SCI", ImagePayload::F64(&image)),
                ImageHdu::new("SEGMAP", ImagePayload::I32(&segmap)),
            ],
        )
        .unwrap();

        let seed = DirectSeed::load(&path, SourceClass::PointSource, "F444W").unwrap();
        assert_eq!(seed.shape(), (8, 6));
        assert_eq!(seed.source_id(4, 3), 7);
        assert_eq!(seed.image()[[4, 3]], 12.5);
    }
}
