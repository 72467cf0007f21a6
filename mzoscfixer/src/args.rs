use mzpeaks::Tolerance;
use serde::{de, Deserialize, Deserializer, Serialize};

use mzoscfix::phase::DEFAULT_POLYNOMIAL_DEGREE;

pub fn non_negative_float_f64(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value < 0.0 || value.is_nan() {
        Err(format!("`{s}` is less than zero"))
    } else {
        Ok(value)
    }
}

fn check_unit_interval(value: f64) -> Result<f64, String> {
    if !(0.0..=1.0).contains(&value) {
        Err(format!("`{value}` is not between zero and one"))
    } else {
        Ok(value)
    }
}

/// Parse a fraction in `[0, 1]`
pub fn unit_interval_f64(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    check_unit_interval(value)
}

/// Read a fraction in `[0, 1]` from a configuration source
pub fn deserialize_unit_interval<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = f64::deserialize(deserializer)?;
    check_unit_interval(value).map_err(de::Error::custom)
}

/// Parse a mass error tolerance written as `<value>ppm`, `<value>da` or a bare
/// `<value>` in Daltons.
pub fn parse_tolerance(s: &str) -> Result<Tolerance, String> {
    let text = s.trim().to_lowercase();
    let (value, is_ppm) = if let Some(v) = text.strip_suffix("ppm") {
        (v, true)
    } else if let Some(v) = text.strip_suffix("da") {
        (v, false)
    } else {
        (text.as_str(), false)
    };
    let value = non_negative_float_f64(value.trim())
        .map_err(|e| format!("Failed to parse tolerance {s}: {e}"))?;
    if is_ppm {
        Ok(Tolerance::PPM(value))
    } else {
        Ok(Tolerance::Da(value))
    }
}

/// Render a [`Tolerance`] in the form [`parse_tolerance`] reads
pub fn format_tolerance(tolerance: &Tolerance) -> String {
    match tolerance {
        Tolerance::PPM(v) => format!("{v}ppm"),
        Tolerance::Da(v) => format!("{v}da"),
    }
}

/// (De)serialize a [`Tolerance`] as the text [`parse_tolerance`] reads. A bare number
/// is read as Daltons, matching the command line.
pub mod tolerance_serde {
    use std::fmt;

    use mzpeaks::Tolerance;
    use serde::{de, Deserializer, Serializer};

    use super::{format_tolerance, parse_tolerance};

    pub fn serialize<S: Serializer>(tolerance: &Tolerance, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_tolerance(tolerance))
    }

    struct ToleranceVisitor;

    impl de::Visitor<'_> for ToleranceVisitor {
        type Value = Tolerance;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a mass tolerance like \"10ppm\", \"0.1da\" or a number of Daltons")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            parse_tolerance(v).map_err(E::custom)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            parse_tolerance(&v.to_string()).map_err(E::custom)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            parse_tolerance(&v.to_string()).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            parse_tolerance(&v.to_string()).map_err(E::custom)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Tolerance, D::Error> {
        deserializer.deserialize_any(ToleranceVisitor)
    }
}

/// Parameters that are rarely changed and only settable from a configuration file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningParams {
    /// The degree of the polynomial smoothing the reference frequency track
    pub polynomial_degree: usize,
    /// Only peaks at least this intense are considered as detection candidates
    pub intensity_floor: f64,
    /// The number of decimal places candidate masses are rounded to
    pub decimal_precision: u32,
}

impl Default for TuningParams {
    fn default() -> Self {
        Self {
            polynomial_degree: DEFAULT_POLYNOMIAL_DEGREE,
            intensity_floor: 1.0,
            decimal_precision: 2,
        }
    }
}
