use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use clap::{parser::ValueSource, ArgMatches, FromArgMatches, Parser};
use serde::{Deserialize, Serialize};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Value},
    Figment,
};

use flate2::write::GzEncoder;
use flate2::Compression;

use thiserror::Error;

use mzdata::io::{
    infer_format, infer_from_path,
    mzml::{MzMLReaderType, MzMLWriterType},
    MassSpectrometryFormat, RestartableGzDecoder, StreamingSpectrumIterator,
};
use mzdata::meta::{
    custom_software_name, DataProcessing, DataProcessingAction, ProcessingMethod, Software,
};
use mzdata::params::Param;
use mzdata::prelude::*;

use tracing::{debug, info, warn};

use mzcalibrate::{
    CalibrationEngine, CalibrationFailure, CalibrationParams, CalibrationReport, ExtractionParams,
    IonKind, ModificationTable,
};
use mzpeaks::Tolerance;
use mzcalibrate::peptide::PeptideError;

use crate::args::{non_negative_float, probability, ArgIonKind};
use crate::identifications::read_identifications;
use crate::spectra::LoadedRun;
use crate::types::{CPeak, DPeak, SpectrumType};

#[derive(Debug, Error)]
pub enum MZCalibratorError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("The input file {0} does not exist")]
    InputFileMissing(PathBuf),
    #[error("The input file format for {0} was either unknown or not supported ({1:?})")]
    FormatUnknownOrNotSupportedError(String, MassSpectrometryFormat),
    #[error("The output file format for {0} was either unknown or not supported ({1:?})")]
    OutputFormatUnknownOrNotSupportedError(String, MassSpectrometryFormat),
    #[error("Failed to read identifications: {0}")]
    IdentificationReadError(
        #[source]
        #[from]
        csv::Error,
    ),
    #[error("Failed to parse the configuration: {0}")]
    ConfigurationError(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error("Failed to parse the command line: {0}")]
    ArgumentError(
        #[source]
        #[from]
        clap::Error,
    ),
    #[error("Failed to write the calibration report: {0}")]
    ReportError(
        #[source]
        #[from]
        serde_json::Error,
    ),
    #[error("Failed to write the effective configuration: {0}")]
    ConfigurationWriteError(
        #[source]
        #[from]
        toml::ser::Error,
    ),
    #[error("Failed to build the thread pool: {0}")]
    ThreadPoolError(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
    #[error("Invalid modification: {0}")]
    ModificationError(
        #[source]
        #[from]
        PeptideError,
    ),
    #[error("Calibration failed: {0}")]
    CalibrationFailed(
        #[source]
        #[from]
        CalibrationFailure,
    ),
}

/// Mass calibration of mass spectrometry files.
///
/// Read an mzML file and the peptide-spectrum matches identified from it, learn how the
/// observed m/z of matched peaks deviates from theory, and write out an mzML file with
/// corrected MS1 and MSn peaks and precursor m/z values.
#[derive(Parser, Debug, Clone, Deserialize, Serialize)]
#[command(author, version)]
pub struct MZCalibrator {
    /// The path to read the input spectra from
    #[arg()]
    pub input_file: PathBuf,

    /// A tab-separated table of peptide-spectrum matches for the input file
    #[arg()]
    pub identifications_file: PathBuf,

    /// The path to write the calibrated spectra to.
    ///
    /// Defaults to `<input stem>-calib.mzML` beside the input file. The output format is
    /// inferred from the path, and `.gz` paths are gzip compressed.
    #[arg(short = 'o', long = "output-file")]
    pub output_file: Option<PathBuf>,

    /// The path to write the JSON calibration report to.
    ///
    /// Defaults to the output path with a `.json` extension.
    #[arg(short = 'j', long = "report-file")]
    pub report_file: Option<PathBuf>,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzcalibrator.toml` in the working directory.
    /// Environment variables prefixed with `MZCALIBRATOR_` will be read too.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(
        short='t',
        long="threads",
        default_value_t=-1,
    )]
    pub threads: i32,

    /// The precursor mass error tolerance, in PPM
    #[arg(
        short = 'p',
        long = "precursor-tolerance",
        default_value_t = 10.0,
        value_parser = non_negative_float
    )]
    pub precursor_tolerance: f64,

    /// The product ion mass error tolerance, in PPM
    #[arg(
        short = 'f',
        long = "product-tolerance",
        default_value_t = 25.0,
        value_parser = non_negative_float
    )]
    pub product_tolerance: f64,

    /// The minimum number of isotopic peaks matched for an MS1 training point
    #[arg(long = "min-ms1-isotopes", default_value_t = 3)]
    pub min_ms1_isotopic_peaks: usize,

    /// The minimum number of isotopic peaks matched for an MS2 training point
    #[arg(long = "min-ms2-isotopes", default_value_t = 2)]
    pub min_ms2_isotopic_peaks: usize,

    /// The minimum number of fragments an identification must match before its precursor is
    /// searched for in MS1 spectra
    #[arg(short = 'n', long = "min-fragments", default_value_t = 10)]
    pub min_fragments: usize,

    /// The fragment ion series to match
    #[arg(
        short = 'i',
        long = "ion-types",
        value_enum,
        value_delimiter = ',',
        default_values = ["b", "y"]
    )]
    pub ion_types: Vec<ArgIonKind>,

    /// Only use identifications with a q-value at or below this threshold
    #[arg(
        short = 'q',
        long = "max-q-value",
        default_value_t = 0.01,
        value_parser = probability
    )]
    pub max_q_value: f64,

    /// Follow the linear calibration rounds with random forest calibration rounds
    #[arg(long = "forest")]
    pub forest: bool,

    /// The seed for the random number generator used to split and fit training data
    #[arg(long = "seed", default_value_t = 42)]
    pub seed: u64,

    /// The largest number of rounds either calibration phase may run
    #[arg(long = "max-rounds", default_value_t = 20)]
    pub max_rounds: usize,

    /// Fit the calibration and write the report without writing calibrated spectra
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Additional modifications by name and elemental formula, e.g. `"Label 13C(6)" = "C[13]6 C-6"`.
    ///
    /// These can only be given in a configuration file.
    #[arg(skip)]
    #[serde(default)]
    pub modifications: BTreeMap<String, String>,
}

fn strip_extensions(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

impl MZCalibrator {
    /// Build the effective configuration, layering defaults, `mzcalibrator.toml`, the
    /// `--config-file`, `MZCALIBRATOR_` environment variables and then the arguments that
    /// were given explicitly on the command line.
    pub fn configure(matches: &ArgMatches) -> Result<Self, MZCalibratorError> {
        let args = Self::from_arg_matches(matches)?;
        let mut config = Figment::from(Serialized::defaults(&args))
            .merge(Toml::file("mzcalibrator.toml"));
        if let Some(path) = args.config_file.as_ref() {
            config = config.merge(Toml::file_exact(path));
        }
        config = config.merge(Env::prefixed("MZCALIBRATOR_"));

        let explicit: Dict = Value::serialize(&args)?
            .into_dict()
            .unwrap_or_default()
            .into_iter()
            .filter(|(key, _)| {
                matches.try_get_raw(key).is_ok()
                    && matches.value_source(key) == Some(ValueSource::CommandLine)
            })
            .collect();
        config = config.merge(Serialized::defaults(explicit));
        Ok(config.extract()?)
    }

    pub fn output_path(&self) -> PathBuf {
        match self.output_file.as_ref() {
            Some(path) => path.clone(),
            None => self
                .input_file
                .with_file_name(format!("{}-calib.mzML", strip_extensions(&self.input_file))),
        }
    }

    pub fn report_path(&self) -> PathBuf {
        match self.report_file.as_ref() {
            Some(path) => path.clone(),
            None => {
                let output = self.output_path();
                output.with_file_name(format!("{}.json", strip_extensions(&output)))
            }
        }
    }

    fn config_output_path(&self) -> PathBuf {
        let report = self.report_path();
        report.with_file_name(format!("{}.toml", strip_extensions(&report)))
    }

    pub fn calibration_params(&self) -> CalibrationParams {
        let extraction = ExtractionParams {
            ms1_tolerance: Tolerance::PPM(self.precursor_tolerance),
            ms2_tolerance: Tolerance::PPM(self.product_tolerance),
            min_ms1_isotopic_peaks: self.min_ms1_isotopic_peaks,
            min_ms2_isotopic_peaks: self.min_ms2_isotopic_peaks,
            min_fragments_per_identification: self.min_fragments,
            fragment_kinds: self.ion_types.iter().copied().map(IonKind::from).collect(),
            ..Default::default()
        };
        CalibrationParams {
            extraction,
            do_forest: self.forest,
            seed: self.seed,
            max_rounds: self.max_rounds,
        }
    }

    /// The built-in modifications plus any configured ones
    pub fn modification_table(&self) -> Result<ModificationTable, PeptideError> {
        let mut table = ModificationTable::default();
        for (name, formula) in self.modifications.iter() {
            table.insert_formula(name, formula)?;
        }
        Ok(table)
    }

    fn create_threadpool(&self) -> Result<rayon::ThreadPool, MZCalibratorError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()?.into()
        };
        debug!("Using {} cores", num_threads);
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?)
    }

    fn make_software(&self) -> Software {
        let mut sw = Software::default();
        let name = custom_software_name("mzcalibrator");
        sw.add_param(name);
        sw.id = "mzcalibrator".to_string();
        sw.version = option_env!("CARGO_PKG_VERSION")
            .unwrap_or("unknown")
            .to_string();
        sw
    }

    fn make_processing_method(&self) -> ProcessingMethod {
        let mut processing = ProcessingMethod::default();
        processing.software_reference = "mzcalibrator".to_string();
        processing.add_param(DataProcessingAction::MZCalibration.as_param_const().into());
        processing.add_param(Param::new_key_value(
            "precursor_tolerance_ppm",
            self.precursor_tolerance.to_string(),
        ));
        processing.add_param(Param::new_key_value(
            "product_tolerance_ppm",
            self.product_tolerance.to_string(),
        ));
        processing.add_param(Param::new_key_value(
            "min_ms1_isotopic_peaks",
            self.min_ms1_isotopic_peaks.to_string(),
        ));
        processing.add_param(Param::new_key_value(
            "min_ms2_isotopic_peaks",
            self.min_ms2_isotopic_peaks.to_string(),
        ));
        for kind in self.ion_types.iter() {
            processing.add_param(Param::new_key_value("ion_type", kind.to_string()));
        }
        if self.forest {
            processing.add_param(Param::new_key_value("random_forest", "true"))
        }
        processing.order = i8::MAX;
        processing
    }

    fn update_data_processing<T: MSDataFileMetadata>(&self, source: &mut T) {
        let sw_id = {
            let mut sw = self.make_software();
            let stem = sw.id.clone();
            let mut i = 0;
            let mut query = stem.clone();
            while source.softwares().iter().any(|s| s.id == query) {
                i += 1;
                query = format!("{stem}_{i}");
            }
            sw.id = query.clone();
            source.softwares_mut().push(sw);
            query
        };
        if source.data_processings().is_empty() {
            let mut method = self.make_processing_method();
            method.order = 0;
            method.software_reference = sw_id.clone();
            let mut dp = DataProcessing::default();
            let dp_id = "DP1_mzcalibrator".to_string();
            dp.id = dp_id.clone();
            dp.push(method);
            source.data_processings_mut().push(dp);
            if let Some(descr) = source.run_description_mut() {
                descr.default_data_processing_id = Some(dp_id.clone());
            }
        } else {
            for dp in source.data_processings_mut().iter_mut() {
                let last_step = dp
                    .iter()
                    .max_by(|a, b| a.order.cmp(&b.order))
                    .map(|m| m.order)
                    .unwrap_or(-1);
                let mut method = self.make_processing_method();
                method.order = last_step.saturating_add(1);
                method.software_reference = sw_id.clone();
                dp.push(method)
            }
        }
    }

    pub fn main(&self) -> Result<CalibrationReport, MZCalibratorError> {
        info!(
            "mzcalibrator v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file.display());
        info!("Identifications: {}", self.identifications_file.display());
        if self.dry_run {
            info!("Dry run, calibrated spectra will not be written");
        } else {
            info!("Output: {}", self.output_path().display());
        }
        self.create_threadpool()?.install(|| self.reader_then())
    }

    fn reader_then(&self) -> Result<CalibrationReport, MZCalibratorError> {
        if !self.input_file.exists() {
            return Err(MZCalibratorError::InputFileMissing(self.input_file.clone()));
        }
        let (ms_format, compressed) = infer_format(&self.input_file)?;
        debug!("Detected {ms_format:?} from path (compressed? {compressed})");
        match ms_format {
            MassSpectrometryFormat::MzML => {
                if compressed {
                    let fh = RestartableGzDecoder::new(io::BufReader::new(fs::File::open(
                        &self.input_file,
                    )?));
                    let reader = StreamingSpectrumIterator::new(
                        MzMLReaderType::<_, CPeak, DPeak>::new(fh),
                    );
                    self.calibrate_then(reader)
                } else {
                    let reader =
                        MzMLReaderType::<_, CPeak, DPeak>::open_path(self.input_file.clone())?;
                    self.calibrate_then(reader)
                }
            }
            _ => Err(MZCalibratorError::FormatUnknownOrNotSupportedError(
                self.input_file.display().to_string(),
                ms_format,
            )),
        }
    }

    fn calibrate_then<R: Iterator<Item = SpectrumType> + MSDataFileMetadata>(
        &self,
        mut reader: R,
    ) -> Result<CalibrationReport, MZCalibratorError> {
        let modifications = self.modification_table()?;
        let identifications = read_identifications(&self.identifications_file, self.max_q_value)?;

        let start = Instant::now();
        let mut spectra: Vec<SpectrumType> = reader.by_ref().collect();
        let mut run = LoadedRun::from_spectra(&mut spectra);
        let ms1_count = run.scans.iter().filter(|s| s.is_ms1()).count();
        info!("MS1 Spectra: {}", ms1_count);
        info!("MSn Spectra: {}", run.len() - ms1_count);
        info!("Read Time: {:0.3?}", start.elapsed());

        let identifications = run.resolve_scan_numbers(identifications);
        let engine =
            CalibrationEngine::new(self.calibration_params()).with_modifications(modifications);
        let result = engine.run(&mut run.scans, &identifications);
        info!("Calibration Time: {:0.3?}", start.elapsed());

        let report = match result {
            Ok(report) => report,
            Err(failure) => {
                self.write_report(&failure.report)?;
                return Err(failure.into());
            }
        };
        info!("MS1 Function: {}", report.ms1_function);
        info!("MS2 Function: {}", report.ms2_function);
        self.write_report(&report)?;

        if !self.dry_run {
            self.writer_then(&reader, spectra, &run)?;
        }
        let elapsed = start.elapsed();
        info!("Total Elapsed Time: {:0.3?}", elapsed);
        Ok(report)
    }

    fn write_report(&self, report: &CalibrationReport) -> Result<(), MZCalibratorError> {
        let report_path = self.report_path();
        let handle = io::BufWriter::new(fs::File::create(&report_path)?);
        serde_json::to_writer_pretty(handle, report)?;
        info!("Report written to {}", report_path.display());

        let config_path = self.config_output_path();
        fs::write(&config_path, toml::to_string_pretty(self)?)?;
        debug!("Configuration written to {}", config_path.display());
        Ok(())
    }

    fn writer_then<R: MSDataFileMetadata>(
        &self,
        reader: &R,
        spectra: Vec<SpectrumType>,
        run: &LoadedRun,
    ) -> Result<(), MZCalibratorError> {
        let output_file = self.output_path();
        let (ms_format, compressed) = infer_from_path(&output_file);
        match ms_format {
            MassSpectrometryFormat::MzML => {
                let handle = io::BufWriter::new(fs::File::create(&output_file)?);
                if compressed {
                    let encoder = GzEncoder::new(handle, Compression::best());
                    let mut writer = MzMLWriterType::<_, CPeak, DPeak>::new(encoder);
                    writer.copy_metadata_from(reader);
                    self.update_data_processing(&mut writer);
                    writer.set_spectrum_count(spectra.len() as u64);
                    write_spectra(writer, spectra, run)?;
                } else {
                    let mut writer = MzMLWriterType::<_, CPeak, DPeak>::new(handle);
                    writer.copy_metadata_from(reader);
                    self.update_data_processing(&mut writer);
                    writer.set_spectrum_count(spectra.len() as u64);
                    write_spectra(writer, spectra, run)?;
                }
            }
            _ => {
                return Err(MZCalibratorError::OutputFormatUnknownOrNotSupportedError(
                    output_file.to_string_lossy().to_string(),
                    ms_format,
                ))
            }
        }
        Ok(())
    }
}

fn write_spectra<W: SpectrumWriter<CPeak, DPeak>>(
    mut writer: W,
    spectra: Vec<SpectrumType>,
    run: &LoadedRun,
) -> io::Result<()> {
    let mut untouched = 0usize;
    for (i, mut spectrum) in spectra.into_iter().enumerate() {
        if !run.write_back(i, &mut spectrum) {
            untouched += 1;
        }
        writer.write(&spectrum)?;
    }
    if untouched > 0 {
        warn!("{untouched} spectra were written without calibration");
    }
    writer.close()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_default_paths() {
        let args = MZCalibrator::parse_from(["mzcalibrator", "data/run.mzML.gz", "psms.tsv"]);
        assert_eq!(args.output_path(), PathBuf::from("data/run-calib.mzML"));
        assert_eq!(args.report_path(), PathBuf::from("data/run-calib.json"));
        assert_eq!(args.config_output_path(), PathBuf::from("data/run-calib.toml"));
    }

    #[test]
    fn test_calibration_params() {
        let args = MZCalibrator::parse_from([
            "mzcalibrator",
            "run.mzML",
            "psms.tsv",
            "-p",
            "5",
            "-i",
            "b,y,c",
            "--forest",
        ]);
        let params = args.calibration_params();
        assert_eq!(params.extraction.ms1_tolerance, Tolerance::PPM(5.0));
        assert_eq!(params.extraction.ms2_tolerance, Tolerance::PPM(25.0));
        assert_eq!(
            params.extraction.fragment_kinds,
            vec![IonKind::B, IonKind::Y, IonKind::C]
        );
        assert!(params.do_forest);
        assert_eq!(params.max_rounds, 20);
    }

    #[test]
    fn test_command_line_overrides_defaults() {
        let matches = MZCalibrator::command()
            .try_get_matches_from(["mzcalibrator", "run.mzML", "psms.tsv", "-t", "2"])
            .unwrap();
        let args = MZCalibrator::configure(&matches).unwrap();
        assert_eq!(args.threads, 2);
        assert_eq!(args.max_q_value, 0.01);
        assert_eq!(args.ion_types, vec![ArgIonKind::B, ArgIonKind::Y]);
    }

    #[test]
    fn test_configured_modifications() {
        let mut args = MZCalibrator::parse_from(["mzcalibrator", "run.mzML", "psms.tsv"]);
        assert!(args.modifications.is_empty());
        args.modifications
            .insert("Label 13C(6)".to_string(), "C[13]6 C-6".to_string());
        let table = args.modification_table().unwrap();
        assert!(table.get("Common Fixed:Label 13C(6) on K").is_some());
        assert!(table.get("Oxidation").is_some());

        args.modifications
            .insert("Broken".to_string(), "Xx?".to_string());
        assert!(args.modification_table().is_err());
    }

    #[test]
    fn test_strip_extensions() {
        assert_eq!(strip_extensions(Path::new("a/b.mzML")), "b");
        assert_eq!(strip_extensions(Path::new("b.mzML.gz")), "b");
        assert_eq!(strip_extensions(Path::new("b")), "b");
    }
}
