//! Command line options and the validated analysis parameters.

use std::path::PathBuf;

use getopts::{Matches, Options};

use crate::error::{Error, Result};
use crate::odds::UndefinedPolicy;
use crate::regions::RegionMode;

#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub brain_path: PathBuf,
    pub output_file: String,
    pub n_folds: usize,
    pub resample: f64,
    pub frac_sample: f64,
    pub radius: f64,
    /// Parsed and reported only; it does not enter the computation.
    pub tf_idf: f64,
    pub output_summary: bool,
    pub mode: RegionMode,
    pub coordinates: PathBuf,
    pub features: PathBuf,
    pub ontology: Option<PathBuf>,
    pub template: Option<PathBuf>,
    pub undefined: UndefinedPolicy,
}

impl Params {
    pub fn new(brain_path: impl Into<PathBuf>, output_file: impl Into<String>) -> Params {
        Params {
            brain_path: brain_path.into(),
            output_file: output_file.into(),
            n_folds: 150,
            resample: 1.0,
            frac_sample: 0.7,
            radius: 4.0,
            tf_idf: 1e-3,
            output_summary: false,
            mode: RegionMode::Deterministic,
            coordinates: PathBuf::from("./database.txt"),
            features: PathBuf::from("./features.txt"),
            ontology: None,
            template: None,
            undefined: UndefinedPolicy::Omit,
        }
    }

    /// Builds the parameters from parsed options. Missing required options are
    /// configuration errors.
    pub fn from_matches(matches: &Matches) -> Result<Params> {
        let brain_path = matches.opt_str("brain_path").ok_or_else(|| {
            Error::config("You need to provide a nifti image using the --brain_path argument")
        })?;
        let output_file = matches.opt_str("output_file").ok_or_else(|| {
            Error::config("You need to provide a name for the output file using the --output_file argument")
        })?;

        let mut params = Params::new(brain_path, output_file);
        if let Some(v) = matches.opt_str("n_folds") {
            params.n_folds = parse_value("n_folds", &v)?;
        }
        if let Some(v) = matches.opt_str("resample") {
            params.resample = parse_value("resample", &v)?;
        }
        if let Some(v) = matches.opt_str("frac_sample") {
            params.frac_sample = parse_value("frac_sample", &v)?;
        }
        if let Some(v) = matches.opt_str("radius") {
            params.radius = parse_value("radius", &v)?;
        }
        if let Some(v) = matches.opt_str("tfIdf") {
            params.tf_idf = parse_value("tfIdf", &v)?;
        }
        params.output_summary = matches.opt_present("output_summary");
        if matches.opt_present("probabilistic") {
            params.mode = RegionMode::Probabilistic;
        }
        if let Some(v) = matches.opt_str("coordinates") {
            params.coordinates = PathBuf::from(v);
        }
        if let Some(v) = matches.opt_str("features") {
            params.features = PathBuf::from(v);
        }
        params.ontology = matches.opt_str("ontology").map(PathBuf::from);
        params.template = matches.opt_str("template").map(PathBuf::from);
        if let Some(v) = matches.opt_str("undefined") {
            params.undefined = v.parse()?;
        }

        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_folds == 0 {
            return Err(Error::config("n_folds must be at least 1"));
        }
        if !(self.frac_sample > 0.0 && self.frac_sample <= 1.0) {
            return Err(Error::config(format!(
                "frac_sample must be in (0, 1], got {}",
                self.frac_sample
            )));
        }
        if !(self.radius > 0.0) {
            return Err(Error::config(format!("radius must be positive, got {}", self.radius)));
        }
        if !(self.resample > 0.0) {
            return Err(Error::config(format!("resample must be positive, got {}", self.resample)));
        }
        if self.output_file.is_empty() {
            return Err(Error::config("output_file must not be empty"));
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("invalid value '{}' for --{}", value, name)))
}

pub fn options() -> Options {
    let mut opts = Options::new();
    opts.optopt("", "brain_path", "path to a 3D or 4D nifti map of the regions to analyse [required]", "FILE");
    opts.optopt("", "output_file", "stem of the output csv files [required]", "NAME");
    opts.optopt("", "n_folds", "number of random study subsamples (default 150)", "N");
    opts.optopt("", "resample", "voxel size in mm of the reference template (default 1)", "MM");
    opts.optopt("", "frac_sample", "fraction of the studies drawn per fold (default 0.7)", "FRAC");
    opts.optopt("", "radius", "distance in voxels below which a peak lands in a region (default 4)", "VOXELS");
    opts.optopt("", "tfIdf", "tf-idf threshold, reported but not used (default 1e-3)", "VALUE");
    opts.optflag("", "output_summary", "also write mean/std/skew per term");
    opts.optflag("", "probabilistic", "treat map values as membership probabilities");
    opts.optopt("", "coordinates", "peak table with id, x, y, z columns (default ./database.txt)", "FILE");
    opts.optopt("", "features", "term-study associations, long or wide (default ./features.txt)", "FILE");
    opts.optopt("", "ontology", "label/topConcept table used to filter and tag terms [optional]", "FILE");
    opts.optopt("", "template", "nifti image defining the reference grid [optional]", "FILE");
    opts.optopt("", "undefined", "rows with an undefined odds ratio: omit or nan (default omit)", "POLICY");
    opts.optflag("h", "help", "print this help menu");
    opts
}
