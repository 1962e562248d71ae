use std::fmt::Display;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use mzcalibrate::IonKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgIonKind {
    B,
    Y,
    C,
    /// z+1 ions
    Z,
}

impl From<ArgIonKind> for IonKind {
    fn from(value: ArgIonKind) -> Self {
        match value {
            ArgIonKind::B => IonKind::B,
            ArgIonKind::Y => IonKind::Y,
            ArgIonKind::C => IonKind::C,
            ArgIonKind::Z => IonKind::ZDot,
        }
    }
}

impl Display for ArgIonKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", IonKind::from(*self))
    }
}

pub(crate) fn non_negative_float(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value < 0.0 || !value.is_finite() {
        Err(format!("`{s}` is not a non-negative number"))
    } else {
        Ok(value)
    }
}

pub(crate) fn probability(s: &str) -> Result<f64, String> {
    let value = non_negative_float(s)?;
    if value > 1.0 {
        Err(format!("`{s}` is greater than one"))
    } else {
        Ok(value)
    }
}
