//! Scalar-unit parsing and normalization
//!
//! TOSCA scalar-units are strings of the form `"<number> <unit>"` (the
//! whitespace is optional). Each unit family normalizes to a canonical base
//! so that comparison and range checks operate on plain numbers: size to
//! bytes, time to seconds, frequency to Hz, bitrate to bits per second.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitFamily {
    Size,
    Time,
    Frequency,
    Bitrate,
}

impl UnitFamily {
    /// Map a TOSCA property type name to its unit family.
    pub fn from_type_name(name: &str) -> Option<UnitFamily> {
        match name {
            "scalar-unit.size" => Some(UnitFamily::Size),
            "scalar-unit.time" => Some(UnitFamily::Time),
            "scalar-unit.frequency" => Some(UnitFamily::Frequency),
            "scalar-unit.bitrate" => Some(UnitFamily::Bitrate),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            UnitFamily::Size => "scalar-unit.size",
            UnitFamily::Time => "scalar-unit.time",
            UnitFamily::Frequency => "scalar-unit.frequency",
            UnitFamily::Bitrate => "scalar-unit.bitrate",
        }
    }

    fn units(&self) -> &'static [(&'static str, f64)] {
        match self {
            UnitFamily::Size => &[
                ("B", 1.0),
                ("kB", 1_000.0),
                ("KiB", 1_024.0),
                ("MB", 1_000_000.0),
                ("MiB", 1_048_576.0),
                ("GB", 1_000_000_000.0),
                ("GiB", 1_073_741_824.0),
                ("TB", 1_000_000_000_000.0),
                ("TiB", 1_099_511_627_776.0),
            ],
            UnitFamily::Time => &[
                ("d", 86_400.0),
                ("h", 3_600.0),
                ("m", 60.0),
                ("s", 1.0),
                ("ms", 0.001),
                ("us", 0.000_001),
                ("ns", 0.000_000_001),
            ],
            UnitFamily::Frequency => &[
                ("Hz", 1.0),
                ("kHz", 1_000.0),
                ("MHz", 1_000_000.0),
                ("GHz", 1_000_000_000.0),
            ],
            UnitFamily::Bitrate => &[
                ("bps", 1.0),
                ("Kbps", 1_000.0),
                ("Kibps", 1_024.0),
                ("Mbps", 1_000_000.0),
                ("Mibps", 1_048_576.0),
                ("Gbps", 1_000_000_000.0),
                ("Gibps", 1_073_741_824.0),
                ("Tbps", 1_000_000_000_000.0),
                ("Tibps", 1_099_511_627_776.0),
            ],
        }
    }

    /// Case-insensitive unit lookup returning canonical casing and factor.
    fn lookup(&self, unit: &str) -> Option<(&'static str, f64)> {
        self.units()
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(unit))
            .copied()
    }
}

impl fmt::Display for UnitFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A magnitude plus a recognized unit suffix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarUnit {
    pub magnitude: f64,
    pub unit: String,
    pub family: UnitFamily,
}

impl ScalarUnit {
    /// Parse `"10 GB"`, `"500ms"`, etc. for a known family.
    pub fn parse(family: UnitFamily, text: &str) -> Result<ScalarUnit, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(|| format!("\"{}\" has no unit (expected {})", text, family))?;
        let (number_part, unit_part) = text.split_at(split);
        let magnitude: f64 = number_part
            .trim()
            .parse()
            .map_err(|_| format!("\"{}\" is not a valid {} value", text, family))?;
        let unit_part = unit_part.trim();
        let (unit, _) = family.lookup(unit_part).ok_or_else(|| {
            format!(
                "unrecognized unit \"{}\" for {} (valid: {})",
                unit_part,
                family,
                family
                    .units()
                    .iter()
                    .map(|(u, _)| *u)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })?;
        Ok(ScalarUnit {
            magnitude,
            unit: unit.to_string(),
            family,
        })
    }

    /// Magnitude converted to the family's canonical base.
    pub fn normalized(&self) -> f64 {
        let factor = self
            .family
            .lookup(&self.unit)
            .map(|(_, f)| f)
            .unwrap_or(1.0);
        self.magnitude * factor
    }

    /// Canonical textual form: magnitude without trailing zeros plus the
    /// recognized unit, single-space separated.
    pub fn canonical(&self) -> String {
        let mag = if self.magnitude.fract() == 0.0 && self.magnitude.abs() < 1e15 {
            format!("{}", self.magnitude as i64)
        } else {
            format!("{}", self.magnitude)
        };
        format!("{} {}", mag, self.unit)
    }
}

impl fmt::Display for ScalarUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Normalize a raw property value of a scalar-unit type to its base
/// magnitude, for comparisons inside the constraint engine.
pub fn normalized_value(family: UnitFamily, raw: &crate::value::Value) -> Result<f64, String> {
    match raw {
        crate::value::Value::String(s) => Ok(ScalarUnit::parse(family, s)?.normalized()),
        // A bare number is taken as already being in the base unit.
        crate::value::Value::Integer(i) => Ok(*i as f64),
        crate::value::Value::Float(f) => Ok(*f),
        other => Err(format!(
            "expected a {} string, got {}",
            family,
            other.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_round_trip() {
        let su = ScalarUnit::parse(UnitFamily::Size, "10 GB").unwrap();
        assert_eq!(su.normalized(), 10_000_000_000.0);
        assert_eq!(su.canonical(), "10 GB");
    }

    #[test]
    fn test_whitespace_optional_and_case_insensitive() {
        let su = ScalarUnit::parse(UnitFamily::Size, "4mb").unwrap();
        assert_eq!(su.unit, "MB");
        assert_eq!(su.normalized(), 4_000_000.0);
    }

    #[test]
    fn test_binary_prefix() {
        let su = ScalarUnit::parse(UnitFamily::Size, "1 GiB").unwrap();
        assert_eq!(su.normalized(), 1_073_741_824.0);
    }

    #[test]
    fn test_time_units() {
        assert_eq!(
            ScalarUnit::parse(UnitFamily::Time, "500 ms").unwrap().normalized(),
            0.5
        );
        assert_eq!(
            ScalarUnit::parse(UnitFamily::Time, "2 h").unwrap().normalized(),
            7200.0
        );
    }

    #[test]
    fn test_frequency_and_bitrate() {
        assert_eq!(
            ScalarUnit::parse(UnitFamily::Frequency, "2.4 GHz")
                .unwrap()
                .normalized(),
            2_400_000_000.0
        );
        assert_eq!(
            ScalarUnit::parse(UnitFamily::Bitrate, "100 Mbps")
                .unwrap()
                .normalized(),
            100_000_000.0
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(ScalarUnit::parse(UnitFamily::Size, "GB").is_err());
        assert!(ScalarUnit::parse(UnitFamily::Size, "10 parsecs").is_err());
        assert!(ScalarUnit::parse(UnitFamily::Time, "fast").is_err());
    }

    #[test]
    fn test_fractional_canonical() {
        let su = ScalarUnit::parse(UnitFamily::Time, "1.5s").unwrap();
        assert_eq!(su.canonical(), "1.5 s");
    }
}
