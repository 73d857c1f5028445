//! FITS file I/O utilities for simulator products
//!
//! Reads float images out of named or numbered HDUs and writes multi-extension
//! files with a header-only primary HDU, which is the layout every WFSS product
//! uses (dispersed seeds, background images, source stamps, ramps).
//!
//! Arrays are kept in FITS storage order: row 0 of the ndarray is the first
//! row written to disk. Reference files produced by other tools use the same
//! convention, so no vertical flip is applied.

use fitsio::errors::Error as FitsioError;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use ndarray::{Array2, Array3, ArrayD, Ix2, Ix3};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during FITS file operations
#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error on {path}: {source}")]
    Fits {
        path: PathBuf,
        #[source]
        source: FitsioError,
    },

    #[error("HDU {hdu} in {path} is not a {expected}D image (found {found} axes)")]
    Dimensionality {
        path: PathBuf,
        hdu: String,
        expected: usize,
        found: usize,
    },
}

/// Selects an HDU either by position or by EXTNAME
#[derive(Debug, Clone, Copy)]
pub enum HduRef<'a> {
    Index(usize),
    Name(&'a str),
}

impl std::fmt::Display for HduRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HduRef::Index(idx) => write!(f, "#{idx}"),
            HduRef::Name(name) => write!(f, "'{name}'"),
        }
    }
}

/// Value of a header keyword
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Text(String),
    Real(f64),
    Integer(i64),
}

/// A single header keyword/value pair
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderCard {
    pub key: String,
    pub value: HeaderValue,
}

impl HeaderCard {
    pub fn text(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: HeaderValue::Text(value.to_string()),
        }
    }

    pub fn real(key: &str, value: f64) -> Self {
        Self {
            key: key.to_string(),
            value: HeaderValue::Real(value),
        }
    }

    pub fn integer(key: &str, value: i64) -> Self {
        Self {
            key: key.to_string(),
            value: HeaderValue::Integer(value),
        }
    }
}

/// Image data to be written into an extension
#[derive(Debug, Clone, Copy)]
pub enum ImagePayload<'a> {
    /// Double precision 2D image
    F64(&'a Array2<f64>),
    /// 32-bit integer 2D image (segmentation maps)
    I32(&'a Array2<i32>),
    /// Double precision cube, (groups, rows, cols)
    Cube(&'a Array3<f64>),
}

impl ImagePayload<'_> {
    fn dimensions(&self) -> Vec<usize> {
        match self {
            ImagePayload::F64(arr) => arr.shape().to_vec(),
            ImagePayload::I32(arr) => arr.shape().to_vec(),
            ImagePayload::Cube(arr) => arr.shape().to_vec(),
        }
    }

    fn image_type(&self) -> ImageType {
        match self {
            ImagePayload::F64(_) | ImagePayload::Cube(_) => ImageType::Double,
            ImagePayload::I32(_) => ImageType::Long,
        }
    }
}

/// An image extension: EXTNAME, data and extra header cards
#[derive(Debug, Clone)]
pub struct ImageHdu<'a> {
    pub extname: String,
    pub data: ImagePayload<'a>,
    pub cards: Vec<HeaderCard>,
}

impl<'a> ImageHdu<'a> {
    pub fn new(extname: &str, data: ImagePayload<'a>) -> Self {
        Self {
            extname: extname.to_string(),
            data,
            cards: Vec::new(),
        }
    }

    pub fn with_card(mut self, card: HeaderCard) -> Self {
        self.cards.push(card);
        self
    }
}

fn fits_err(path: &Path) -> impl FnOnce(FitsioError) -> FitsError + '_ {
    move |source| FitsError::Fits {
        path: path.to_path_buf(),
        source,
    }
}

fn write_card(
    fptr: &mut FitsFile,
    hdu: &fitsio::hdu::FitsHdu,
    card: &HeaderCard,
) -> Result<(), FitsioError> {
    match &card.value {
        HeaderValue::Text(text) => hdu.write_key(fptr, &card.key, text.as_str()),
        HeaderValue::Real(value) => hdu.write_key(fptr, &card.key, *value),
        HeaderValue::Integer(value) => hdu.write_key(fptr, &card.key, *value),
    }
}

/// Write a FITS file with a header-only primary HDU followed by image extensions
///
/// Any existing file at `path` is overwritten.
///
/// # Arguments
/// * `path` - Output path
/// * `primary_cards` - Keywords for the (data-less) primary header
/// * `extensions` - Image extensions, written in order
pub fn write_fits<P: AsRef<Path>>(
    path: P,
    primary_cards: &[HeaderCard],
    extensions: &[ImageHdu<'_>],
) -> Result<(), FitsError> {
    let path = path.as_ref();
    let mut fptr = FitsFile::create(path)
        .overwrite()
        .open()
        .map_err(fits_err(path))?;

    let primary = fptr.primary_hdu().map_err(fits_err(path))?;
    for card in primary_cards {
        write_card(&mut fptr, &primary, card).map_err(fits_err(path))?;
    }

    for ext in extensions {
        let dimensions = ext.data.dimensions();
        let description = ImageDescription {
            data_type: ext.data.image_type(),
            dimensions: &dimensions,
        };
        let hdu = fptr
            .create_image(ext.extname.clone(), &description)
            .map_err(fits_err(path))?;

        match ext.data {
            ImagePayload::F64(arr) => {
                let flat: Vec<f64> = arr.iter().copied().collect();
                hdu.write_image(&mut fptr, &flat).map_err(fits_err(path))?;
            }
            ImagePayload::I32(arr) => {
                let flat: Vec<i32> = arr.iter().copied().collect();
                hdu.write_image(&mut fptr, &flat).map_err(fits_err(path))?;
            }
            ImagePayload::Cube(arr) => {
                let flat: Vec<f64> = arr.iter().copied().collect();
                hdu.write_image(&mut fptr, &flat).map_err(fits_err(path))?;
            }
        }

        for card in &ext.cards {
            write_card(&mut fptr, &hdu, card).map_err(fits_err(path))?;
        }
    }

    log::debug!(
        "Wrote {} with {} image extension(s)",
        path.display(),
        extensions.len()
    );
    Ok(())
}

/// Read an image HDU of any dimensionality as double precision
pub fn read_array<P: AsRef<Path>>(path: P, hdu: HduRef<'_>) -> Result<ArrayD<f64>, FitsError> {
    let path = path.as_ref();
    let mut fptr = FitsFile::open(path).map_err(fits_err(path))?;
    let fits_hdu = match hdu {
        HduRef::Index(idx) => fptr.hdu(idx),
        HduRef::Name(name) => fptr.hdu(name),
    }
    .map_err(fits_err(path))?;

    fits_hdu
        .read_image::<ArrayD<f64>>(&mut fptr)
        .map_err(fits_err(path))
}

/// Read a 2D image HDU as double precision
pub fn read_image<P: AsRef<Path>>(path: P, hdu: HduRef<'_>) -> Result<Array2<f64>, FitsError> {
    let path = path.as_ref();
    let data = read_array(path, hdu)?;
    let found = data.ndim();
    data.into_dimensionality::<Ix2>()
        .map_err(|_| FitsError::Dimensionality {
            path: path.to_path_buf(),
            hdu: hdu.to_string(),
            expected: 2,
            found,
        })
}

/// Read a 2D or 3D image HDU as a cube; a 2D image becomes a single plane
pub fn read_cube<P: AsRef<Path>>(path: P, hdu: HduRef<'_>) -> Result<Array3<f64>, FitsError> {
    let path = path.as_ref();
    let data = read_array(path, hdu)?;
    let found = data.ndim();
    let dimensionality_err = || FitsError::Dimensionality {
        path: path.to_path_buf(),
        hdu: hdu.to_string(),
        expected: 3,
        found,
    };

    match found {
        2 => {
            let plane = data
                .into_dimensionality::<Ix2>()
                .map_err(|_| dimensionality_err())?;
            Ok(plane.insert_axis(ndarray::Axis(0)))
        }
        3 => data
            .into_dimensionality::<Ix3>()
            .map_err(|_| dimensionality_err()),
        _ => Err(dimensionality_err()),
    }
}

/// Read an integer-valued 2D image (such as a segmentation map)
pub fn read_image_i32<P: AsRef<Path>>(path: P, hdu: HduRef<'_>) -> Result<Array2<i32>, FitsError> {
    Ok(read_image(path, hdu)?.mapv(|v| v.round() as i32))
}

/// Check whether an HDU with the given EXTNAME exists
pub fn has_hdu<P: AsRef<Path>>(path: P, name: &str) -> Result<bool, FitsError> {
    let path = path.as_ref();
    let mut fptr = FitsFile::open(path).map_err(fits_err(path))?;
    Ok(fptr.hdu(name).is_ok())
}

/// Read a string keyword, returning None when the keyword is absent
pub fn read_key_string<P: AsRef<Path>>(
    path: P,
    hdu: HduRef<'_>,
    key: &str,
) -> Result<Option<String>, FitsError> {
    let path = path.as_ref();
    let mut fptr = FitsFile::open(path).map_err(fits_err(path))?;
    let fits_hdu = match hdu {
        HduRef::Index(idx) => fptr.hdu(idx),
        HduRef::Name(name) => fptr.hdu(name),
    }
    .map_err(fits_err(path))?;
    Ok(fits_hdu.read_key::<String>(&mut fptr, key).ok())
}

/// Read an integer keyword, returning None when the keyword is absent
pub fn read_key_i64<P: AsRef<Path>>(
    path: P,
    hdu: HduRef<'_>,
    key: &str,
) -> Result<Option<i64>, FitsError> {
    let path = path.as_ref();
    let mut fptr = FitsFile::open(path).map_err(fits_err(path))?;
    let fits_hdu = match hdu {
        HduRef::Index(idx) => fptr.hdu(idx),
        HduRef::Name(name) => fptr.hdu(name),
    }
    .map_err(fits_err(path))?;
    Ok(fits_hdu.read_key::<i64>(&mut fptr, key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip_named_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("roundtrip.fits");

        let image = Array2::from_shape_fn((3, 5), |(y, x)| (y * 10 + x) as f64 + 0.5);
        write_fits(
            &path,
            &[HeaderCard::text("UNITS", "e/sec")],
            &[ImageHdu::new("SCI", ImagePayload::F64(&image))
                .with_card(HeaderCard::text("UNITS", "e/sec"))],
        )
        .unwrap();

        let read = read_image(&path, HduRef::Name("SCI")).unwrap();
        assert_eq!(read.dim(), (3, 5));
        assert_relative_eq!(read[[2, 4]], 24.5, epsilon = 1e-12);
        assert_relative_eq!(read[[0, 1]], 1.5, epsilon = 1e-12);

        let by_index = read_image(&path, HduRef::Index(1)).unwrap();
        assert_eq!(by_index, read);
    }

    #[test]
    fn test_header_cards_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cards.fits");
        let image = Array2::<f64>::zeros((2, 2));

        write_fits(
            &path,
            &[HeaderCard::text("UNITS", "e/s")],
            &[ImageHdu::new("BACKGRND", ImagePayload::F64(&image))
                .with_card(HeaderCard::text("UNITS", "e/s"))
                .with_card(HeaderCard::integer("FFSIZE", 64))],
        )
        .unwrap();

        let primary_units = read_key_string(&path, HduRef::Index(0), "UNITS").unwrap();
        assert_eq!(primary_units.as_deref(), Some("e/s"));
        let ext_units = read_key_string(&path, HduRef::Name("BACKGRND"), "UNITS").unwrap();
        assert_eq!(ext_units.as_deref(), Some("e/s"));
        let missing = read_key_string(&path, HduRef::Name("BACKGRND"), "NOPE").unwrap();
        assert!(missing.is_none());

        let size = read_key_i64(&path, HduRef::Name("BACKGRND"), "FFSIZE").unwrap();
        assert_eq!(size, Some(64));
        assert!(read_key_i64(&path, HduRef::Index(0), "FFSIZE")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_segmap_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("segmap.fits");
        let mut segmap = Array2::<i32>::zeros((4, 4));
        segmap[[1, 2]] = 7;
        segmap[[3, 0]] = 12;

        write_fits(&path, &[], &[ImageHdu::new("SEGMAP", ImagePayload::I32(&segmap))]).unwrap();

        assert!(has_hdu(&path, "SEGMAP").unwrap());
        assert!(!has_hdu(&path, "SCI").unwrap());
        let read = read_image_i32(&path, HduRef::Name("SEGMAP")).unwrap();
        assert_eq!(read, segmap);
    }

    #[test]
    fn test_cube_and_plane_reading() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cube.fits");
        let cube = Array3::from_shape_fn((3, 2, 2), |(g, _, _)| g as f64);
        let plane = Array2::from_elem((2, 2), 4.0);

        write_fits(
            &path,
            &[],
            &[
                ImageHdu::new("CUBE", ImagePayload::Cube(&cube)),
                ImageHdu::new("PLANE", ImagePayload::F64(&plane)),
            ],
        )
        .unwrap();

        let read_cube_data = read_cube(&path, HduRef::Name("CUBE")).unwrap();
        assert_eq!(read_cube_data.dim(), (3, 2, 2));
        assert_relative_eq!(read_cube_data[[2, 1, 1]], 2.0);

        let promoted = read_cube(&path, HduRef::Name("PLANE")).unwrap();
        assert_eq!(promoted.dim(), (1, 2, 2));

        let err = read_image(&path, HduRef::Name("CUBE")).unwrap_err();
        assert!(matches!(
            err,
            FitsError::Dimensionality {
                expected: 2,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let result = read_image(dir.path().join("absent.fits"), HduRef::Index(1));
        assert!(matches!(result, Err(FitsError::Fits { .. })));
    }
}
