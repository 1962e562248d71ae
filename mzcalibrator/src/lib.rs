mod args;
mod driver;
mod identifications;
mod spectra;
mod types;

pub use args::ArgIonKind;
pub use driver::{MZCalibrator, MZCalibratorError};
pub use identifications::{read_identifications, read_identifications_from, PSMFilterSummary};
pub use spectra::LoadedRun;
