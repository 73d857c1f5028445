//! Dispersal of one source class onto the detector frame

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use ndarray::{s, Array2};
use shared::fits::{write_fits, HeaderCard, ImageHdu, ImagePayload};

use super::seed::{centred_offset, DirectSeed, SourceClass};
use super::sed::SedCatalog;
use super::trace::{GrismConfig, TraceOrder, TraceSample};
use super::DisperserError;
use crate::algo::misc::interp_clamped;
use crate::background::ResolvedBackground;
use crate::logging::RunLog;
use crate::photometry::spectrum::SampledSpectrum;
use crate::photometry::throughput::Throughput;

/// Per-order, per-sample deposit weights for a unit direct rate
type OrderWeights = Vec<Vec<f64>>;

/// Disperses direct seeds through the selected trace orders
pub struct ClassDisperser<'a> {
    filter_throughput: &'a Throughput,
    orders: Vec<(&'a TraceOrder, Vec<TraceSample>)>,
    frame: (usize, usize),
    seds: Option<&'a SedCatalog>,
    extrapolate_sed: bool,
    collect_stamps: bool,
    log: RunLog,
}

impl<'a> ClassDisperser<'a> {
    /// # Arguments
    /// * `grism` - Trace configuration for the crossing filter and mode
    /// * `order_names` - Orders to use, all of them when `None`
    /// * `frame` - Full-frame (rows, cols) of the dispersed image
    pub fn new(
        grism: &'a GrismConfig,
        order_names: Option<&[String]>,
        frame: (usize, usize),
        log: RunLog,
    ) -> Result<Self, DisperserError> {
        let orders: Vec<_> = grism
            .select_orders(order_names)?
            .into_iter()
            .map(|order| (order, order.samples()))
            .collect();
        for (order, samples) in &orders {
            log.debug(format_args!(
                "Order {} sampled at {} points",
                order.name(),
                samples.len()
            ));
        }
        Ok(Self {
            filter_throughput: grism.filter_throughput(),
            orders,
            frame,
            seds: None,
            extrapolate_sed: true,
            collect_stamps: false,
            log,
        })
    }

    /// Use per-source SEDs, holding end values outside their coverage when
    /// `extrapolate` is set
    pub fn with_seds(mut self, seds: Option<&'a SedCatalog>, extrapolate: bool) -> Self {
        self.seds = seds;
        self.extrapolate_sed = extrapolate;
        self
    }

    /// Keep each source's dispersed signal for a stamps file
    pub fn with_stamps(mut self, collect: bool) -> Self {
        self.collect_stamps = collect;
        self
    }

    pub fn frame(&self) -> (usize, usize) {
        self.frame
    }

    /// Deposit weights for a photon density, normalized through the direct
    /// throughput. `None` when the density integrates to zero.
    fn order_weights<F>(&self, density: F) -> Option<OrderWeights>
    where
        F: Fn(f64) -> f64,
    {
        let norm = self.filter_throughput.integrate(&density);
        if !(norm.is_finite() && norm > 0.0) {
            return None;
        }
        Some(
            self.orders
                .iter()
                .map(|(_, samples)| {
                    samples
                        .iter()
                        .map(|s| density(s.wavelength) * s.sensitivity * s.dlambda / norm)
                        .collect()
                })
                .collect(),
        )
    }

    /// Photon density of an SED given as f_lambda
    fn sed_weights(&self, sed: &SampledSpectrum) -> Option<OrderWeights> {
        let extrapolate = self.extrapolate_sed;
        self.order_weights(|w| sed.sample(w, extrapolate).max(0.0) * w)
    }

    /// Disperse one class
    ///
    /// `seeds[0]` supplies the direct rates and must be rendered through the
    /// crossing filter. Further seeds of the same class in other filters are
    /// only used to shape pixels without an SED.
    pub fn disperse(
        &self,
        class: SourceClass,
        seeds: &[DirectSeed],
    ) -> Result<DispersedClassImage, DisperserError> {
        let primary = seeds.first().ok_or(DisperserError::NoSeeds(class))?;
        for seed in &seeds[1..] {
            if seed.shape() != primary.shape() {
                return Err(DisperserError::SeedShapeMismatch {
                    class,
                    expected: primary.shape(),
                    found: seed.shape(),
                });
            }
        }

        let mut colours: Vec<(f64, &DirectSeed)> = seeds
            .iter()
            .filter_map(|seed| seed.pivot_um().map(|pivot| (pivot, seed)))
            .collect();
        colours.sort_by(|a, b| a.0.total_cmp(&b.0));
        colours.dedup_by(|a, b| a.0 == b.0);
        let pivots: Vec<f64> = colours.iter().map(|(pivot, _)| *pivot).collect();
        let use_colours = colours.len() >= 2;

        let flat = self.order_weights(|_| 1.0);
        let mut sed_cache: HashMap<i32, Option<OrderWeights>> = HashMap::new();
        let mut stamps: BTreeMap<i32, HashMap<(usize, usize), f64>> = BTreeMap::new();
        let mut image = Array2::<f64>::zeros(self.frame);
        let (row_offset, col_offset) = primary.frame_offset(self.frame);
        let (mut dispersed, mut skipped, mut from_sed) = (0usize, 0usize, 0usize);

        for ((row, col), &rate) in primary.image().indexed_iter() {
            if !(rate.is_finite() && rate > 0.0) {
                continue;
            }
            let id = primary.source_id(row, col);
            let sed = match (id, self.seds) {
                (0, _) | (_, None) => None,
                (id, Some(catalog)) => catalog.get(id),
            };

            let pixel_weights;
            let weights = if let Some(sed) = sed {
                from_sed += 1;
                sed_cache
                    .entry(id)
                    .or_insert_with(|| self.sed_weights(sed))
                    .as_ref()
            } else if use_colours {
                let rates: Vec<f64> = colours
                    .iter()
                    .map(|(_, seed)| seed.image()[[row, col]].max(0.0))
                    .collect();
                pixel_weights = self.order_weights(|w| interp_clamped(w, &pivots, &rates));
                pixel_weights.as_ref()
            } else {
                flat.as_ref()
            };
            let Some(weights) = weights else {
                skipped += 1;
                continue;
            };

            let y = row as f64 - row_offset as f64;
            let x = col as f64 - col_offset as f64;
            let mut stamp = (self.collect_stamps && id != 0).then(|| stamps.entry(id).or_default());
            for ((_, samples), order_weights) in self.orders.iter().zip(weights) {
                for (sample, weight) in samples.iter().zip(order_weights) {
                    let value = rate * weight;
                    if value == 0.0 {
                        continue;
                    }
                    for (r, c, frac) in bilinear(y + sample.dy, x + sample.dx, self.frame) {
                        image[[r, c]] += value * frac;
                        if let Some(stamp) = stamp.as_mut() {
                            *stamp.entry((r, c)).or_insert(0.0) += value * frac;
                        }
                    }
                }
            }
            dispersed += 1;
        }

        self.log.info(format_args!(
            "Dispersed {dispersed} {class} pixels ({from_sed} with SEDs, {skipped} skipped with no usable spectrum) through {} order(s)",
            self.orders.len()
        ));

        Ok(DispersedClassImage {
            class,
            image,
            stamps: stamps
                .into_iter()
                .filter_map(|(id, pixels)| SourceStamp::from_pixels(class, id, &pixels))
                .collect(),
            background_included: false,
            finalized: false,
        })
    }

    /// Background on the frame, ready to be injected into one class image
    ///
    /// `seed_shape` is the footprint of the direct seeds, which bounds where
    /// sky light can enter the grism.
    pub fn background_frame(
        &self,
        background: &ResolvedBackground,
        seed_shape: (usize, usize),
    ) -> Result<Array2<f64>, DisperserError> {
        match background {
            ResolvedBackground::Image(image) => {
                if image.dim() != self.frame {
                    return Err(DisperserError::BackgroundShapeMismatch {
                        expected: self.frame,
                        found: image.dim(),
                    });
                }
                Ok(image.clone())
            }
            ResolvedBackground::Spectrum(spectrum) => {
                Ok(self.disperse_background_1d(spectrum, seed_shape))
            }
        }
    }

    /// Disperse a uniform sky spectrum (photons/s/micron/pixel)
    ///
    /// Each trace sample shifts the whole seed footprint by its rounded
    /// offset; a pixel receives the sample's signal when the shifted
    /// footprint covers it. The rectangles are accumulated in a difference
    /// table and integrated with a 2D prefix sum.
    pub fn disperse_background_1d(
        &self,
        spectrum: &SampledSpectrum,
        seed_shape: (usize, usize),
    ) -> Array2<f64> {
        let (rows, cols) = self.frame;
        let (row_offset, col_offset) = centred_offset(seed_shape, self.frame);
        let mut table = Array2::<f64>::zeros((rows + 1, cols + 1));

        for (order, samples) in &self.orders {
            let mut level = 0.0;
            for sample in samples {
                let weight = spectrum.at(sample.wavelength) * sample.sensitivity * sample.dlambda;
                if weight == 0.0 {
                    continue;
                }
                level += weight;
                let shift_r = sample.dy.round() as isize - row_offset;
                let shift_c = sample.dx.round() as isize - col_offset;
                let (r0, r1) = clip_span(shift_r, seed_shape.0, rows);
                let (c0, c1) = clip_span(shift_c, seed_shape.1, cols);
                if r0 >= r1 || c0 >= c1 {
                    continue;
                }
                table[[r0, c0]] += weight;
                table[[r0, c1]] -= weight;
                table[[r1, c0]] -= weight;
                table[[r1, c1]] += weight;
            }
            self.log.info(format_args!(
                "Background level through order {}: {level:.4} e/s/pixel",
                order.name()
            ));
        }

        for r in 0..=rows {
            for c in 1..=cols {
                table[[r, c]] += table[[r, c - 1]];
            }
        }
        for r in 1..=rows {
            for c in 0..=cols {
                table[[r, c]] += table[[r - 1, c]];
            }
        }
        table.slice(s![..rows, ..cols]).to_owned()
    }
}

/// `[start, start + len)` clipped to `[0, limit)`
fn clip_span(start: isize, len: usize, limit: usize) -> (usize, usize) {
    let lo = start.clamp(0, limit as isize) as usize;
    let hi = (start + len as isize).clamp(0, limit as isize) as usize;
    (lo, hi)
}

/// Bilinear split of a point onto the pixels of a frame
///
/// Pixel centres sit on integer coordinates. Pixels off the frame are dropped.
fn bilinear(y: f64, x: f64, frame: (usize, usize)) -> impl Iterator<Item = (usize, usize, f64)> {
    let (y0, x0) = (y.floor(), x.floor());
    let (fy, fx) = (y - y0, x - x0);
    [
        (0.0, 0.0, (1.0 - fy) * (1.0 - fx)),
        (0.0, 1.0, (1.0 - fy) * fx),
        (1.0, 0.0, fy * (1.0 - fx)),
        (1.0, 1.0, fy * fx),
    ]
    .into_iter()
    .filter_map(move |(dy, dx, frac)| {
        let (r, c) = (y0 + dy, x0 + dx);
        let inside = frac > 0.0
            && r >= 0.0
            && c >= 0.0
            && (r as usize) < frame.0
            && (c as usize) < frame.1;
        inside.then_some((r as usize, c as usize, frac))
    })
}

/// Dispersed signal of one source, cropped to its bounding box
#[derive(Debug, Clone)]
pub struct SourceStamp {
    pub class: SourceClass,
    pub id: i32,
    pub xstart: usize,
    pub ystart: usize,
    pub data: Array2<f64>,
}

impl SourceStamp {
    fn from_pixels(
        class: SourceClass,
        id: i32,
        pixels: &HashMap<(usize, usize), f64>,
    ) -> Option<Self> {
        let ystart = pixels.keys().map(|(r, _)| *r).min()?;
        let yend = pixels.keys().map(|(r, _)| *r).max()?;
        let xstart = pixels.keys().map(|(_, c)| *c).min()?;
        let xend = pixels.keys().map(|(_, c)| *c).max()?;
        let mut data = Array2::zeros((yend - ystart + 1, xend - xstart + 1));
        for (&(r, c), &value) in pixels {
            data[[r - ystart, c - xstart]] = value;
        }
        Some(Self {
            class,
            id,
            xstart,
            ystart,
            data,
        })
    }

    /// Extension name, `SRC<id>`
    pub fn extname(&self) -> String {
        format!("SRC{}", self.id)
    }
}

/// Write stamps as one image extension per source
pub fn write_source_stamps(path: &Path, stamps: &[SourceStamp]) -> Result<(), DisperserError> {
    let extensions: Vec<ImageHdu<'_>> = stamps
        .iter()
        .map(|stamp| {
            ImageHdu::new(&stamp.extname(), ImagePayload::F64(&stamp.data))
                .with_card(HeaderCard::integer("XSTART", stamp.xstart as i64))
                .with_card(HeaderCard::integer("YSTART", stamp.ystart as i64))
                .with_card(HeaderCard::text("SRCCLASS", stamp.class.file_tag()))
                .with_card(HeaderCard::text("UNITS", "e/sec"))
        })
        .collect();
    write_fits(path, &[HeaderCard::integer("NSOURCES", stamps.len() as i64)], &extensions)?;
    Ok(())
}

/// Dispersed image of one source class on the full frame
#[derive(Debug, Clone)]
pub struct DispersedClassImage {
    class: SourceClass,
    image: Array2<f64>,
    stamps: Vec<SourceStamp>,
    background_included: bool,
    finalized: bool,
}

impl DispersedClassImage {
    pub fn class(&self) -> SourceClass {
        self.class
    }

    pub fn image(&self) -> &Array2<f64> {
        &self.image
    }

    pub fn into_image(self) -> Array2<f64> {
        self.image
    }

    pub fn stamps(&self) -> &[SourceStamp] {
        &self.stamps
    }

    pub fn background_included(&self) -> bool {
        self.background_included
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Complete the image, adding `background` if given
    ///
    /// May only be called once.
    pub fn finalize(&mut self, background: Option<&Array2<f64>>) -> Result<(), DisperserError> {
        if self.finalized {
            return Err(DisperserError::AlreadyFinalized(self.class));
        }
        if let Some(background) = background {
            if background.dim() != self.image.dim() {
                return Err(DisperserError::BackgroundShapeMismatch {
                    expected: self.image.dim(),
                    found: background.dim(),
                });
            }
            self.image += background;
            self.background_included = true;
        }
        self.finalized = true;
        Ok(())
    }
}
