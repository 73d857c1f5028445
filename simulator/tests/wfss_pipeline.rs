//! End-to-end runs of the WFSS pipeline against a small synthetic data root

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use approx::assert_relative_eq;
use ndarray::Array2;
use shared::fits::{
    read_cube, read_image, write_fits, HduRef, HeaderCard, ImageHdu, ImagePayload,
};
use tempfile::TempDir;
use wfss_simulator::collaborators::{
    CollaboratorError, LinearRampGenerator, OverrideOnlyDarkPreparer, PrerenderedSeedGenerator,
    SedRequest, FULL_FRAME_TIME_S,
};
use wfss_simulator::composite::zero_reference_pixels;
use wfss_simulator::background::ReferenceImageBackground;
use wfss_simulator::disperser::seed::seed_file_name;
use wfss_simulator::disperser::{ClassDisperser, DirectSeed, GrismConfig};
use wfss_simulator::instrument::{
    NIRISS_GAIN, NIRISS_GRISM_THROUGHPUT_FACTOR, REFERENCE_PIXEL_WIDTH,
};
use wfss_simulator::{
    Collaborators, ConfigError, PipelineError, PipelineStage, RunLog, SedSynthesizer,
    SimulationOptions, SourceClass, WfssSimulation,
};

const FRAME: usize = 64;
// Direct-image rate in ADU/s
const BACKGROUND_RATE: &str = "2.0";
// Seed file stems follow Output.file of each document
const WFSS_STEM: &str = "obs_wfss_uncal";
const IMAGING_STEM: &str = "obs_imaging_uncal";

const GRISM_CONFIG: &str = r#"
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

fn niriss_yaml(
    mode: &str,
    filter: &str,
    pupil: &str,
    bkgdrate: &str,
    output_dir: &Path,
) -> String {
    format!(
        "Inst:\n  instrument: niriss\n  mode: {mode}\n\
         Readout:\n  array_name: NIS_CEN\n  filter: {filter}\n  pupil: {pupil}\n\
         Output:\n  file: obs_{mode}_uncal.fits\n  directory: {}\n  grism_source_image: false\n\
         simSignals:\n  bkgdrate: {bkgdrate}\n  pointsource: stars.cat\n\
         \x20 galaxyListFile: None\n  extended: None\n\
         Telescope:\n  ra: 53.1\n  dec: -27.8\n",
        output_dir.display()
    )
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let grism_dir = dir.path().join("data/niriss/GRISM_NIRISS");
        fs::create_dir_all(&grism_dir).unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();
        fs::write(grism_dir.join("NIRISS_F150W_GR150R.yaml"), GRISM_CONFIG).unwrap();

        let reference = Array2::from_shape_fn((FRAME, FRAME), |(r, c)| {
            if (r + c) % 2 == 0 {
                4.0
            } else {
                6.0
            }
        });
        write_fits(
            grism_dir.join("f150w_gr150r_medium_background.fits"),
            &[],
            &[ImageHdu::new("BACKGRND", ImagePayload::F64(&reference))],
        )
        .unwrap();
        Self { dir }
    }

    fn data_root(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn out(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    fn write_param(&self, name: &str, text: &str) -> PathBuf {
        let path = self.out().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn write_seed(&self, stem: &str, class: SourceClass, pixels: &[((usize, usize), f64, i32)]) {
        let mut image = Array2::<f64>::zeros((FRAME, FRAME));
        let mut segmap = Array2::<i32>::zeros((FRAME, FRAME));
        for ((r, c), value, id) in pixels {
            image[[*r, *c]] = *value;
            segmap[[*r, *c]] = *id;
        }
        let path = self.out().join(seed_file_name(stem, class));
        write_fits(
            path,
            &[],
            &[
                ImageHdu::new("SCI", ImagePayload::F64(&image))
                    .with_card(HeaderCard::integer("FFSIZE", FRAME as i64)),
                ImageHdu::new("SEGMAP", ImagePayload::I32(&segmap)),
            ],
        )
        .unwrap();
    }

    fn write_dark(&self, name: &str, level: f64) -> PathBuf {
        let path = self.out().join(name);
        let dark = Array2::from_elem((FRAME, FRAME), level);
        write_fits(&path, &[], &[ImageHdu::new("SCI", ImagePayload::F64(&dark))]).unwrap();
        path
    }

    fn load_seed(&self, stem: &str, class: SourceClass) -> DirectSeed {
        DirectSeed::load(self.out().join(seed_file_name(stem, class)), class, "F150W").unwrap()
    }
}

#[derive(Clone, Default)]
struct CountingSedSynthesizer {
    calls: Arc<AtomicUsize>,
}

impl SedSynthesizer for CountingSedSynthesizer {
    fn make_all_spectra(
        &self,
        _request: &SedRequest<'_>,
    ) -> Result<Option<PathBuf>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

fn collaborators(simulation: &WfssSimulation, seds: CountingSedSynthesizer) -> Collaborators {
    let log = RunLog::new("wfss-pipeline-test");
    Collaborators {
        seed_generator: Box::new(PrerenderedSeedGenerator::new(simulation.config(), log.clone())),
        sed_synthesizer: Box::new(seds),
        dark_preparer: Box::new(OverrideOnlyDarkPreparer),
        observation: Box::new(LinearRampGenerator::new(FULL_FRAME_TIME_S, log)),
    }
}

#[test]
fn test_niriss_run_composites_every_class_once() {
    let fixture = Fixture::new();
    let out = fixture.out();
    let wfss = fixture.write_param(
        "wfss.yaml",
        &niriss_yaml("wfss", "GR150R", "F150W", "medium", &out),
    );
    let imaging = fixture.write_param(
        "imaging.yaml",
        &niriss_yaml("imaging", "CLEAR", "F150W", "medium", &out),
    );
    fixture.write_seed(WFSS_STEM, SourceClass::PointSource, &[((30, 10), 100.0, 3)]);
    fixture.write_seed(WFSS_STEM, SourceClass::Extended, &[((40, 20), 50.0, 8)]);
    let dark = fixture.write_dark("dark.fits", 1.0);

    let mut options = SimulationOptions::new(vec![wfss, imaging], fixture.data_root());
    options.override_dark = Some(vec![dark]);
    let seds = CountingSedSynthesizer::default();
    let simulation = WfssSimulation::new(options).unwrap();
    let collaborators = collaborators(&simulation, seds.clone());
    let mut simulation = simulation.with_collaborators(collaborators);

    let output = simulation.create().unwrap();
    assert_eq!(simulation.stage(), PipelineStage::Done);
    assert!(out.join("tmp_update_to_wfss_mode_imaging.yaml").is_file());
    assert_eq!(seds.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        output.metadata.classes,
        vec![SourceClass::PointSource, SourceClass::Extended]
    );

    // Rebuild the expected composite from the same pieces
    let grism = GrismConfig::load(
        fixture
            .data_root()
            .join("niriss/GRISM_NIRISS/NIRISS_F150W_GR150R.yaml"),
    )
    .unwrap();
    let disperser =
        ClassDisperser::new(&grism, None, (FRAME, FRAME), RunLog::new("expected")).unwrap();
    let ptsrc = fixture.load_seed(WFSS_STEM, SourceClass::PointSource);
    let extended = fixture.load_seed(WFSS_STEM, SourceClass::Extended);
    let target = ReferenceImageBackground::new(simulation.config(), RunLog::new("expected"))
        .target_rate(grism.filter_throughput())
        .unwrap();
    assert!(target > 0.0);

    let mut expected = disperser
        .disperse(SourceClass::PointSource, &[ptsrc])
        .unwrap()
        .into_image()
        + disperser
            .disperse(SourceClass::Extended, &[extended])
            .unwrap()
            .image();
    for ((r, c), v) in expected.indexed_iter_mut() {
        let reference = if (r + c) % 2 == 0 { 4.0 } else { 6.0 };
        *v += reference * target / 5.0;
    }
    zero_reference_pixels(&mut expected, REFERENCE_PIXEL_WIDTH);

    assert_eq!(output.seed.dim(), (FRAME, FRAME));
    for ((r, c), value) in output.seed.indexed_iter() {
        assert_relative_eq!(value * NIRISS_GAIN, expected[[r, c]], epsilon = 1e-9);
    }
    assert_eq!(output.seed[[0, 0]], 0.0);
    assert_eq!(output.segmap[[30, 10]], 3);
    assert_eq!(output.segmap[[40, 20]], 8);

    let background_file = output.background_file.clone().unwrap();
    let background = read_image(&background_file, HduRef::Name("BACKGRND")).unwrap();
    assert_relative_eq!(background.mean().unwrap(), target, epsilon = 1e-9);

    let dispersed = output.dispersed_seed_file.clone().unwrap();
    assert!(dispersed.is_file());

    assert_eq!(output.exposures, vec![out.join("obs_wfss_uncal.fits")]);
    let ramp = read_cube(&output.exposures[0], HduRef::Name("SCI")).unwrap();
    assert_eq!(ramp.shape(), &[1, FRAME, FRAME]);
    assert_relative_eq!(
        ramp[[0, 30, 20]],
        1.0 + output.seed[[30, 20]] * FULL_FRAME_TIME_S,
        epsilon = 1e-9
    );

    assert!(matches!(
        simulation.create().unwrap_err(),
        PipelineError::AlreadyRun(PipelineStage::Done)
    ));
}

#[test]
fn test_several_darks_make_segments() {
    let fixture = Fixture::new();
    let out = fixture.out();
    let wfss = fixture.write_param(
        "wfss.yaml",
        &niriss_yaml("wfss", "GR150R", "F150W", BACKGROUND_RATE, &out),
    );
    fixture.write_seed(WFSS_STEM, SourceClass::Galaxy, &[((20, 20), 10.0, 1)]);
    let darks = vec![
        fixture.write_dark("dark_a.fits", 0.0),
        fixture.write_dark("dark_b.fits", 5.0),
    ];

    let mut options = SimulationOptions::new(vec![wfss], fixture.data_root());
    options.override_dark = Some(darks);
    options.save_dispersed_seed = false;
    let output = WfssSimulation::new(options).unwrap().create().unwrap();

    assert_eq!(output.metadata.classes, vec![SourceClass::Galaxy]);
    assert!(output.dispersed_seed_file.is_none());
    let background =
        read_image(output.background_file.unwrap(), HduRef::Name("BACKGRND")).unwrap();
    assert_relative_eq!(
        background.mean().unwrap(),
        2.0 * NIRISS_GAIN * NIRISS_GRISM_THROUGHPUT_FACTOR,
        epsilon = 1e-9
    );
    assert_eq!(
        output.exposures,
        vec![
            out.join("obs_wfss_uncal_seg001.fits"),
            out.join("obs_wfss_uncal_seg002.fits")
        ]
    );
    let second = read_cube(&output.exposures[1], HduRef::Name("SCI")).unwrap();
    assert_relative_eq!(
        second[[0, 32, 32]],
        5.0 + output.seed[[32, 32]] * FULL_FRAME_TIME_S,
        epsilon = 1e-9
    );
}

#[test]
fn test_imaging_seed_alone_does_not_disperse_a_class() {
    let fixture = Fixture::new();
    let out = fixture.out();
    let wfss = fixture.write_param(
        "wfss.yaml",
        &niriss_yaml("wfss", "GR150R", "F150W", BACKGROUND_RATE, &out),
    );
    let imaging = fixture.write_param(
        "imaging.yaml",
        &niriss_yaml("imaging", "CLEAR", "F200W", BACKGROUND_RATE, &out),
    );
    fixture.write_seed(WFSS_STEM, SourceClass::Extended, &[((40, 20), 50.0, 8)]);
    fixture.write_seed(IMAGING_STEM, SourceClass::PointSource, &[((30, 10), 100.0, 3)]);
    let dark = fixture.write_dark("dark.fits", 0.0);

    let mut options = SimulationOptions::new(vec![wfss, imaging], fixture.data_root());
    options.override_dark = Some(vec![dark]);
    options.create_continuum_seds = false;
    options.save_dispersed_seed = false;
    let seds = CountingSedSynthesizer::default();
    let simulation = WfssSimulation::new(options).unwrap();
    let collaborators = collaborators(&simulation, seds.clone());
    let mut simulation = simulation.with_collaborators(collaborators);

    let output = simulation.create().unwrap();
    assert_eq!(output.metadata.classes, vec![SourceClass::Extended]);
    assert_eq!(seds.calls.load(Ordering::SeqCst), 0);
    assert_eq!(output.segmap[[30, 10]], 0);
    assert_eq!(output.segmap[[40, 20]], 8);
}

#[test]
fn test_missing_seeds_fail_the_run() {
    let fixture = Fixture::new();
    let out = fixture.out();
    let wfss = fixture.write_param(
        "wfss.yaml",
        &niriss_yaml("wfss", "GR150R", "F150W", BACKGROUND_RATE, &out),
    );

    let mut simulation =
        WfssSimulation::new(SimulationOptions::new(vec![wfss], fixture.data_root())).unwrap();
    let err = simulation.create().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Collaborator(CollaboratorError::NoSeedImages { .. })
    ));
    assert_eq!(simulation.stage(), PipelineStage::Failed);
}

#[test]
fn test_unknown_crossing_filter_is_rejected() {
    let fixture = Fixture::new();
    let out = fixture.out();
    let wfss = fixture.write_param(
        "wfss.yaml",
        &niriss_yaml("wfss", "GR150R", "F999X", "medium", &out),
    );

    let err = WfssSimulation::new(SimulationOptions::new(vec![wfss], fixture.data_root()))
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::Config(ConfigError::InvalidValue { .. })));
}

#[test]
fn test_two_wfss_documents_are_rejected() {
    let fixture = Fixture::new();
    let out = fixture.out();
    let first = fixture.write_param(
        "a.yaml",
        &niriss_yaml("wfss", "GR150R", "F150W", "low", &out),
    );
    let second = fixture.write_param(
        "b.yaml",
        &niriss_yaml("wfss", "GR150C", "F150W", "high", &out),
    );

    let options = SimulationOptions::new(vec![first, second], fixture.data_root());
    let err = WfssSimulation::new(options).err().unwrap();
    assert!(matches!(
        err,
        PipelineError::Config(ConfigError::MultipleWfssParamFiles { .. })
    ));
    assert!(!out.join("tmp_update_to_wfss_mode_b.yaml").exists());
}
