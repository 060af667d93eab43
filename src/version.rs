//! Template definition versions and the TOSCA `version` primitive

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The `tosca_definitions_version` values the parser ships support for.
pub const MAIN_TEMPLATE_VERSIONS: &[&str] = &[
    "tosca_simple_yaml_1_0",
    "tosca_simple_yaml_1_1",
    "tosca_simple_yaml_1_2",
    "tosca_simple_yaml_1_3",
];

/// A recognized `tosca_definitions_version`: one of the four Simple Profile
/// releases or a registered profile extension identified by its string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToscaVersion {
    Simple1_0,
    Simple1_1,
    Simple1_2,
    Simple1_3,
    Extension(String),
}

impl ToscaVersion {
    /// Resolve a version selector. Extension strings are only accepted when
    /// they appear in `registered_extensions`.
    pub fn resolve(selector: &str, registered_extensions: &[String]) -> Option<ToscaVersion> {
        match selector {
            "tosca_simple_yaml_1_0" => Some(ToscaVersion::Simple1_0),
            "tosca_simple_yaml_1_1" => Some(ToscaVersion::Simple1_1),
            "tosca_simple_yaml_1_2" => Some(ToscaVersion::Simple1_2),
            "tosca_simple_yaml_1_3" => Some(ToscaVersion::Simple1_3),
            other if registered_extensions.iter().any(|e| e == other) => {
                Some(ToscaVersion::Extension(other.to_string()))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ToscaVersion::Simple1_0 => "tosca_simple_yaml_1_0",
            ToscaVersion::Simple1_1 => "tosca_simple_yaml_1_1",
            ToscaVersion::Simple1_2 => "tosca_simple_yaml_1_2",
            ToscaVersion::Simple1_3 => "tosca_simple_yaml_1_3",
            ToscaVersion::Extension(s) => s,
        }
    }
}

impl fmt::Display for ToscaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value of the TOSCA `version` property type:
/// `major.minor[.fix[.qualifier[-build]]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionValue {
    pub major: u32,
    pub minor: u32,
    pub fix: Option<u32>,
    pub qualifier: Option<String>,
    pub build: Option<u32>,
}

impl VersionValue {
    pub fn parse(text: &str) -> Result<VersionValue, String> {
        let err = || format!("\"{}\" is not a valid version", text);
        let (base, build) = match text.rsplit_once('-') {
            Some((base, build)) => (base, Some(build.parse::<u32>().map_err(|_| err())?)),
            None => (text, None),
        };
        let mut parts = base.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(err)?;
        let minor = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(err)?;
        let fix = match parts.next() {
            Some(p) => Some(p.parse().map_err(|_| err())?),
            None => None,
        };
        let qualifier = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return Err(err());
        }
        if build.is_some() && qualifier.is_none() {
            return Err(err());
        }
        Ok(VersionValue {
            major,
            minor,
            fix,
            qualifier,
            build,
        })
    }
}

impl PartialOrd for VersionValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionValue {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.fix.unwrap_or(0))
            .cmp(&(other.major, other.minor, other.fix.unwrap_or(0)))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
            .then_with(|| self.build.cmp(&other.build))
    }
}

impl fmt::Display for VersionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(fix) = self.fix {
            write!(f, ".{}", fix)?;
        }
        if let Some(q) = &self.qualifier {
            write!(f, ".{}", q)?;
        }
        if let Some(b) = self.build {
            write!(f, "-{}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_main_versions() {
        for v in MAIN_TEMPLATE_VERSIONS {
            assert!(ToscaVersion::resolve(v, &[]).is_some(), "{} must resolve", v);
        }
        assert!(ToscaVersion::resolve("tosca_simple_yaml_2_0", &[]).is_none());
    }

    #[test]
    fn test_resolve_extension() {
        let exts = vec!["tosca_simple_profile_for_nfv_1_0_0".to_string()];
        assert_eq!(
            ToscaVersion::resolve("tosca_simple_profile_for_nfv_1_0_0", &exts),
            Some(ToscaVersion::Extension(
                "tosca_simple_profile_for_nfv_1_0_0".into()
            ))
        );
        assert!(ToscaVersion::resolve("tosca_simple_profile_for_nfv_1_0_0", &[]).is_none());
    }

    #[test]
    fn test_version_value_parse() {
        let v = VersionValue::parse("1.2.0.alpha-10").unwrap();
        assert_eq!(v.major, 1);
        assert_eq!(v.fix, Some(0));
        assert_eq!(v.qualifier.as_deref(), Some("alpha"));
        assert_eq!(v.build, Some(10));
        assert_eq!(v.to_string(), "1.2.0.alpha-10");
    }

    #[test]
    fn test_version_value_ordering() {
        let a = VersionValue::parse("1.2").unwrap();
        let b = VersionValue::parse("1.10").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_version_value_rejects() {
        assert!(VersionValue::parse("1").is_err());
        assert!(VersionValue::parse("a.b").is_err());
        assert!(VersionValue::parse("1.2-3").is_err());
    }
}
