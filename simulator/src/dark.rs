//! Dark-current products handed to exposure assembly

use std::path::{Path, PathBuf};

use ndarray::{s, Array2, Array3};
use shared::fits::{read_cube, HduRef};
use shared::FitsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DarkError {
    #[error("an override dark was requested with an empty path list")]
    EmptyOverride,

    #[error("dark {path} has no groups")]
    NoGroups { path: PathBuf },

    #[error("dark {path} frames are {found:?} but the seed is {expected:?}")]
    ShapeMismatch {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error(transparent)]
    Fits(#[from] FitsError),
}

/// A prepared dark ramp, (groups, rows, cols) in ADU
#[derive(Debug, Clone)]
pub struct DarkProduct {
    source: PathBuf,
    data: Array3<f64>,
}

impl DarkProduct {
    /// Read the `SCI` extension; a 2D image is a single group
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DarkError> {
        let path = path.as_ref();
        let data = read_cube(path, HduRef::Name("SCI"))?;
        Self::new(path, data)
    }

    pub fn new(source: &Path, data: Array3<f64>) -> Result<Self, DarkError> {
        if data.shape()[0] == 0 {
            return Err(DarkError::NoGroups {
                path: source.to_path_buf(),
            });
        }
        Ok(Self {
            source: source.to_path_buf(),
            data,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn groups(&self) -> usize {
        self.data.shape()[0]
    }

    /// (rows, cols) of each group
    pub fn frame_shape(&self) -> (usize, usize) {
        (self.data.shape()[1], self.data.shape()[2])
    }

    /// Group `g` as an owned frame
    pub fn group(&self, g: usize) -> Array2<f64> {
        self.data.slice(s![g, .., ..]).to_owned()
    }

    /// Fail unless each group matches `shape`
    pub fn check_shape(&self, shape: (usize, usize)) -> Result<(), DarkError> {
        if self.frame_shape() == shape {
            Ok(())
        } else {
            Err(DarkError::ShapeMismatch {
                path: self.source.clone(),
                expected: shape,
                found: self.frame_shape(),
            })
        }
    }
}

/// Dark input for exposure assembly
#[derive(Debug, Clone)]
pub enum DarkInput {
    /// One dark product already read into memory
    Prepared(DarkProduct),
    /// Several dark files, each assembled into its own exposure segment
    Files(Vec<PathBuf>),
}

/// Interpret caller-supplied override darks
///
/// A single path is read immediately; several are passed through unchanged.
pub fn resolve_override(paths: &[PathBuf]) -> Result<DarkInput, DarkError> {
    match paths {
        [] => Err(DarkError::EmptyOverride),
        [single] => Ok(DarkInput::Prepared(DarkProduct::load(single)?)),
        several => Ok(DarkInput::Files(several.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::fits::{write_fits, ImageHdu, ImagePayload};
    use tempfile::TempDir;

    #[test]
    fn test_single_override_is_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dark.fits");
        let cube = Array3::from_shape_fn((3, 4, 5), |(g, _, _)| g as f64);
        write_fits(&path, &[], &[ImageHdu::new("SCI", ImagePayload::Cube(&cube))]).unwrap();

        let DarkInput::Prepared(dark) = resolve_override(&[path.clone()]).unwrap() else {
            panic!("expected a prepared dark");
        };
        assert_eq!(dark.groups(), 3);
        assert_eq!(dark.frame_shape(), (4, 5));
        assert_eq!(dark.group(2)[[1, 1]], 2.0);
        assert!(dark.check_shape((4, 5)).is_ok());
        assert!(matches!(
            dark.check_shape((5, 4)).unwrap_err(),
            DarkError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_2d_dark_is_one_group() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dark2d.fits");
        let frame = Array2::from_elem((4, 4), 7.0);
        write_fits(&path, &[], &[ImageHdu::new("SCI", ImagePayload::F64(&frame))]).unwrap();

        let dark = DarkProduct::load(&path).unwrap();
        assert_eq!(dark.groups(), 1);
        assert_eq!(dark.group(0), frame);
    }

    #[test]
    fn test_several_overrides_pass_through() {
        let paths = vec![PathBuf::from("a.fits"), PathBuf::from("b.fits")];
        let DarkInput::Files(files) = resolve_override(&paths).unwrap() else {
            panic!("expected a file list");
        };
        assert_eq!(files, paths);
        assert!(matches!(resolve_override(&[]).unwrap_err(), DarkError::EmptyOverride));
    }

    #[test]
    fn test_unreadable_override_propagates() {
        let err = resolve_override(&[PathBuf::from("/nonexistent/dark.fits")]).unwrap_err();
        assert!(matches!(err, DarkError::Fits(_)));
    }
}
