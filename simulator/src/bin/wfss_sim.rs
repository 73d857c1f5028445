//! Command-line driver for WFSS seed simulation
//!
//! Takes one WFSS parameter file plus any imaging/pom files covering other
//! filters, disperses the pre-rendered seeds and writes the seed products
//! and ramps next to the WFSS output.
//!
//! ```text
//! WFSS_SIM_DATA=/data/wfss wfss_sim obs_wfss.yaml obs_f150w.yaml --override-dark dark.fits
//! ```

use std::path::PathBuf;

use clap::Parser;
use wfss_simulator::config::DATA_ROOT_ENV;
use wfss_simulator::{SimulationOptions, WfssSimulation};

#[derive(Parser, Debug)]
#[command(
    name = "wfss_sim",
    about = "Simulate a WFSS exposure from direct seed images",
    long_about = None
)]
struct Args {
    /// Parameter files; exactly one must be in wfss mode
    #[arg(required = true)]
    param_files: Vec<PathBuf>,

    /// Reference data directory (grism configs, subarray tables, backgrounds)
    #[arg(long, env = DATA_ROOT_ENV)]
    data_root: PathBuf,

    /// SED file for the catalog sources (single parameter file only)
    #[arg(long)]
    sed_file: Option<PathBuf>,

    /// Catalog column used to normalize the SEDs
    #[arg(long)]
    sed_normalizing_column: Option<String>,

    /// Where to save the combined SED file
    #[arg(long)]
    final_sed_file: Option<PathBuf>,

    /// Do not save the dispersed seed image
    #[arg(long)]
    no_dispersed_seed: bool,

    /// Dispersed seed image path (defaults next to the WFSS output)
    #[arg(long)]
    dispersed_seed_file: Option<PathBuf>,

    /// Save per-source dispersed stamps to this file
    #[arg(long)]
    source_stamps_file: Option<PathBuf>,

    /// Zero SEDs outside their wavelength coverage instead of holding end values
    #[arg(long)]
    no_extrapolate_sed: bool,

    /// Pre-made dark file(s); several produce one exposure segment each
    #[arg(long, num_args = 1..)]
    override_dark: Option<Vec<PathBuf>>,

    /// Seed every parameter file instead of synthesizing continuum SEDs
    #[arg(long)]
    no_continuum_seds: bool,

    /// Trace orders to disperse (default: all in the grism config)
    #[arg(long, value_delimiter = ',')]
    orders: Option<Vec<String>>,
}

impl Args {
    fn into_options(self) -> SimulationOptions {
        let mut options = SimulationOptions::new(self.param_files, self.data_root);
        options.sed_file = self.sed_file;
        options.sed_normalizing_column = self.sed_normalizing_column;
        options.final_sed_file = self.final_sed_file;
        options.save_dispersed_seed = !self.no_dispersed_seed;
        options.dispersed_seed_file = self.dispersed_seed_file;
        options.source_stamps_file = self.source_stamps_file;
        options.extrapolate_sed = !self.no_extrapolate_sed;
        options.override_dark = self.override_dark;
        options.create_continuum_seds = !self.no_continuum_seds;
        options.orders = self.orders;
        options
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut simulation = WfssSimulation::new(args.into_options())?;
    let output = simulation.create()?;

    let (rows, cols) = output.seed.dim();
    println!(
        "Seed {}x{} in {} for {} ({} class(es))",
        cols,
        rows,
        output.metadata.units,
        output.metadata.aperture,
        output.metadata.classes.len()
    );
    if let Some(path) = &output.dispersed_seed_file {
        println!("Dispersed seed: {}", path.display());
    }
    if let Some(path) = &output.background_file {
        println!("Background image: {}", path.display());
    }
    for path in &output.exposures {
        println!("Exposure: {}", path.display());
    }
    Ok(())
}
