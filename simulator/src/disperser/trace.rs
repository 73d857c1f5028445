//! Grism trace geometry and order sensitivities
//!
//! A grism configuration is a YAML file named
//! `<INSTRUMENT>_<crossing>_<dmode>.yaml` in the instrument's grism directory,
//! e.g. `NIRCAM_F444W_modA_R.yaml` or `NIRISS_F150W_GR150R.yaml`:
//!
//! ```yaml
//! filter_throughput:
//!   wavelengths: [3.8, 5.1]
//!   values: [0.45, 0.45]
//! orders:
//!   - name: "+1"
//!     dispx: [0.0, 400.0]      # x offset polynomial in t, ascending powers
//!     dispy: [0.0, 2.0]        # y offset polynomial in t
//!     displ: [3.8, 1.3]        # wavelength (micron) polynomial in t
//!     sensitivity:             # electrons per photon
//!       wavelengths: [3.8, 5.1]
//!       values: [0.3, 0.3]
//! ```
//!
//! The trace parameter `t` runs over [0, 1]. Offsets are in detector pixels
//! relative to the direct-image position of the source.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::DisperserError;
use crate::algo::misc::polyval;
use crate::config::DataRoot;
use crate::instrument::{DispersionMode, Instrument};
use crate::photometry::throughput::{Throughput, ThroughputTable};

/// Trace samples per detector pixel of arc length
pub const SAMPLES_PER_PIXEL: f64 = 2.0;

/// Chords used to measure the arc length of a trace
const ARC_LENGTH_SEGMENTS: usize = 256;

#[derive(Debug, Deserialize)]
struct GrismConfigFile {
    filter_throughput: ThroughputTable,
    orders: Vec<OrderEntry>,
}

#[derive(Debug, Deserialize)]
struct OrderEntry {
    name: String,
    dispx: Vec<f64>,
    dispy: Vec<f64>,
    displ: Vec<f64>,
    sensitivity: ThroughputTable,
}

/// One point along a trace
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceSample {
    /// Column offset from the direct position, pixels
    pub dx: f64,
    /// Row offset from the direct position, pixels
    pub dy: f64,
    /// Wavelength in microns
    pub wavelength: f64,
    /// Wavelength interval covered by the sample, microns
    pub dlambda: f64,
    /// Order sensitivity at `wavelength`, electrons per photon
    pub sensitivity: f64,
}

/// A single diffraction order
#[derive(Debug, Clone)]
pub struct TraceOrder {
    name: String,
    dispx: Vec<f64>,
    dispy: Vec<f64>,
    displ: Vec<f64>,
    sensitivity: Throughput,
}

impl TraceOrder {
    pub fn new(
        name: &str,
        dispx: Vec<f64>,
        dispy: Vec<f64>,
        displ: Vec<f64>,
        sensitivity: Throughput,
    ) -> Self {
        Self {
            name: name.to_string(),
            dispx,
            dispy,
            displ,
            sensitivity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sensitivity(&self) -> &Throughput {
        &self.sensitivity
    }

    /// (dx, dy) at trace parameter `t`
    pub fn offset(&self, t: f64) -> (f64, f64) {
        (polyval(&self.dispx, t), polyval(&self.dispy, t))
    }

    pub fn wavelength(&self, t: f64) -> f64 {
        polyval(&self.displ, t)
    }

    /// Length of the trace in pixels
    pub fn arc_length(&self) -> f64 {
        let mut length = 0.0;
        let mut prev = self.offset(0.0);
        for i in 1..=ARC_LENGTH_SEGMENTS {
            let next = self.offset(i as f64 / ARC_LENGTH_SEGMENTS as f64);
            length += (next.0 - prev.0).hypot(next.1 - prev.1);
            prev = next;
        }
        length
    }

    /// Sample the trace in half-pixel steps
    ///
    /// Sample `i` of `n` sits at the midpoint `t = (i + 0.5) / n` and covers
    /// the wavelength interval between `t = i / n` and `t = (i + 1) / n`.
    pub fn samples(&self) -> Vec<TraceSample> {
        // Tolerance keeps rounding noise in the arc length from adding a sample
        let n = (SAMPLES_PER_PIXEL * self.arc_length() - 1e-6).ceil().max(1.0) as usize;
        (0..n)
            .map(|i| {
                let t = (i as f64 + 0.5) / n as f64;
                let (dx, dy) = self.offset(t);
                let wavelength = self.wavelength(t);
                let dlambda = (self.wavelength((i + 1) as f64 / n as f64)
                    - self.wavelength(i as f64 / n as f64))
                .abs();
                TraceSample {
                    dx,
                    dy,
                    wavelength,
                    dlambda,
                    sensitivity: self.sensitivity.at(wavelength),
                }
            })
            .collect()
    }
}

/// Trace geometry and throughputs for one crossing filter and dispersion mode
#[derive(Debug, Clone)]
pub struct GrismConfig {
    path: PathBuf,
    filter_throughput: Throughput,
    orders: Vec<TraceOrder>,
}

impl GrismConfig {
    /// `<INSTRUMENT>_<crossing>_<dmode>.yaml`
    pub fn file_name(
        instrument: Instrument,
        crossing_filter: &str,
        mode: &DispersionMode,
    ) -> String {
        format!(
            "{}_{}_{}.yaml",
            instrument.name().to_uppercase(),
            crossing_filter.to_uppercase(),
            mode.name()
        )
    }

    /// Full path of the configuration under a data root
    pub fn locate(data_root: &DataRoot, crossing_filter: &str, mode: &DispersionMode) -> PathBuf {
        data_root
            .grism_dir(mode.instrument)
            .join(Self::file_name(mode.instrument, crossing_filter, mode))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DisperserError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| DisperserError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, path)
    }

    /// Parse configuration text; `path` is only used in error messages
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, DisperserError> {
        let file: GrismConfigFile =
            serde_yml::from_str(text).map_err(|source| DisperserError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        if file.orders.is_empty() {
            return Err(DisperserError::NoOrders(path.to_path_buf()));
        }

        let filter_throughput = Throughput::try_from(file.filter_throughput).map_err(|source| {
            DisperserError::FilterThroughput {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let mut orders = Vec::with_capacity(file.orders.len());
        for entry in file.orders {
            for (field, coefficients) in [
                ("dispx", &entry.dispx),
                ("dispy", &entry.dispy),
                ("displ", &entry.displ),
            ] {
                if coefficients.is_empty() {
                    return Err(DisperserError::EmptyPolynomial {
                        path: path.to_path_buf(),
                        order: entry.name.clone(),
                        field,
                    });
                }
            }
            let sensitivity = Throughput::try_from(entry.sensitivity).map_err(|source| {
                DisperserError::OrderThroughput {
                    path: path.to_path_buf(),
                    order: entry.name.clone(),
                    source,
                }
            })?;
            orders.push(TraceOrder::new(
                &entry.name,
                entry.dispx,
                entry.dispy,
                entry.displ,
                sensitivity,
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            filter_throughput,
            orders,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Direct-imaging throughput of the crossing filter
    pub fn filter_throughput(&self) -> &Throughput {
        &self.filter_throughput
    }

    pub fn orders(&self) -> &[TraceOrder] {
        &self.orders
    }

    /// Orders to disperse: all of them by default, or the named subset
    pub fn select_orders(
        &self,
        names: Option<&[String]>,
    ) -> Result<Vec<&TraceOrder>, DisperserError> {
        let Some(names) = names else {
            return Ok(self.orders.iter().collect());
        };
        names
            .iter()
            .map(|name| {
                self.orders
                    .iter()
                    .find(|order| order.name == *name)
                    .ok_or_else(|| DisperserError::UnknownOrder {
                        order: name.clone(),
                        available: self
                            .orders
                            .iter()
                            .map(|order| order.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::instrument::{DispersionAxis, Module};
    use approx::assert_relative_eq;

    /// Two-order configuration dispersing along +x over 1.3-1.7 micron
    pub(crate) const SIMPLE_CONFIG: &str = r#"
filter_throughput:
  wavelengths: [1.3, 1.7]
  values: [0.5, 0.5]
orders:
  - name: "+1"
    dispx: [5.0, 20.0]
    dispy: [0.0]
    displ: [1.3, 0.4]
    sensitivity:
      wavelengths: [1.2, 1.8]
      values: [0.5, 0.5]
  - name: "0"
    dispx: [-3.0]
    dispy: [0.0]
    displ: [1.3, 0.4]
    sensitivity:
      wavelengths: [1.2, 1.8]
      values: [0.05, 0.05]
"#;

    pub(crate) fn simple_config() -> GrismConfig {
        GrismConfig::from_yaml(SIMPLE_CONFIG, Path::new("simple.yaml")).unwrap()
    }

    #[test]
    fn test_file_names() {
        let nircam = DispersionMode {
            instrument: Instrument::NirCam,
            module: Module::A,
            axis: DispersionAxis::Row,
        };
        assert_eq!(
            GrismConfig::file_name(Instrument::NirCam, "f444w", &nircam),
            "NIRCAM_F444W_modA_R.yaml"
        );
        let niriss = DispersionMode {
            instrument: Instrument::Niriss,
            module: Module::N,
            axis: DispersionAxis::Column,
        };
        assert_eq!(
            GrismConfig::file_name(Instrument::Niriss, "F150W", &niriss),
            "NIRISS_F150W_GR150C.yaml"
        );
    }

    #[test]
    fn test_parse_and_sample() {
        let config = simple_config();
        assert_eq!(config.orders().len(), 2);
        assert_relative_eq!(config.filter_throughput().at(1.5), 0.5);

        let first = &config.orders()[0];
        assert_relative_eq!(first.arc_length(), 20.0, epsilon = 1e-9);
        let samples = first.samples();
        assert_eq!(samples.len(), 40);
        assert_relative_eq!(samples[0].dx, 5.0 + 20.0 * 0.5 / 40.0, epsilon = 1e-12);
        let total: f64 = samples.iter().map(|s| s.dlambda).sum();
        assert_relative_eq!(total, 0.4, epsilon = 1e-12);
        assert!(samples.iter().all(|s| s.sensitivity == 0.5));
    }

    #[test]
    fn test_zero_length_trace_single_sample() {
        let config = simple_config();
        let zeroth = &config.orders()[1];
        let samples = zeroth.samples();
        assert_eq!(samples.len(), 1);
        assert_relative_eq!(samples[0].dlambda, 0.4, epsilon = 1e-12);
        assert_relative_eq!(samples[0].dx, -3.0);
    }

    #[test]
    fn test_order_selection() {
        let config = simple_config();
        assert_eq!(config.select_orders(None).unwrap().len(), 2);

        let names = vec!["+1".to_string()];
        let selected = config.select_orders(Some(&names)).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), "+1");

        let names = vec!["+2".to_string()];
        let err = config.select_orders(Some(&names)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("+2") && msg.contains("+1, 0"), "{msg}");
    }

    #[test]
    fn test_no_orders_rejected() {
        let text = "filter_throughput: {wavelengths: [1.0, 2.0], values: [1.0, 1.0]}\norders: []\n";
        let err = GrismConfig::from_yaml(text, Path::new("empty.yaml")).unwrap_err();
        assert!(matches!(err, DisperserError::NoOrders(_)));
    }
}
