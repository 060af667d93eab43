//! Error types and the diagnostic sink for the TOSCA parser
//!
//! Components never print or panic on template problems; they report
//! diagnostics into a [`DiagnosticSink`] and continue best-effort. Only a
//! small set of conditions (unresolvable imports, derivation cycles,
//! unsupported versions) abort a stage outright.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

/// Top-level error type for operations that cannot continue.
#[derive(Error, Debug)]
pub enum ToscaError {
    #[error("template version \"{version}\" is not supported (valid versions: {valid})")]
    UnsupportedVersion { version: String, valid: String },

    #[error("import of \"{reference}\" failed: {reason}")]
    Import { reference: String, reason: String },

    #[error("type derivation cycle through \"{type_name}\"")]
    TypeCycle { type_name: String },

    #[error("input document is not usable: {0}")]
    BadInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type ToscaResult<T> = Result<T, ToscaError>;

/// Classification of a diagnostic, matching the parser's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DiagnosticKind {
    SchemaError,
    UnsupportedVersionError,
    ImportError,
    TypeCycleError,
    DuplicateTypeError,
    UnknownTypeError,
    IncompatibleDerivationError,
    UnknownFieldError,
    MissingRequiredFieldError,
    MissingRequiredInputError,
    ConstraintViolation,
    TypeMismatchError,
    InvalidScalarUnitError,
    AmbiguousTargetError,
    NoMatchError,
    OccurrenceError,
    FunctionEvaluationError,
    UnknownFunctionError,
    SubstitutionMappingError,
    Deprecated,
}

impl DiagnosticKind {
    /// Stable token used in rendered reports.
    pub fn token(&self) -> &'static str {
        match self {
            Self::SchemaError => "schema-error",
            Self::UnsupportedVersionError => "unsupported-version",
            Self::ImportError => "import-error",
            Self::TypeCycleError => "type-cycle",
            Self::DuplicateTypeError => "duplicate-type",
            Self::UnknownTypeError => "unknown-type",
            Self::IncompatibleDerivationError => "incompatible-derivation",
            Self::UnknownFieldError => "unknown-field",
            Self::MissingRequiredFieldError => "missing-required-field",
            Self::MissingRequiredInputError => "missing-required-input",
            Self::ConstraintViolation => "constraint-violation",
            Self::TypeMismatchError => "type-mismatch",
            Self::InvalidScalarUnitError => "invalid-scalar-unit",
            Self::AmbiguousTargetError => "ambiguous-target",
            Self::NoMatchError => "no-match",
            Self::OccurrenceError => "occurrence-error",
            Self::FunctionEvaluationError => "function-evaluation",
            Self::UnknownFunctionError => "unknown-function",
            Self::SubstitutionMappingError => "substitution-mapping",
            Self::Deprecated => "deprecated",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Where a diagnostic points to in the source document set.
///
/// Line and column are only available when the tree supplier retained them;
/// the document `path` (slash-joined keys from the root) is always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub path: String,
}

impl SourceLocation {
    pub fn at_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn in_file(file: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            line: None,
            column: None,
            path: path.into(),
        }
    }

    /// Extend the document path with one more segment.
    pub fn join(&self, segment: &str) -> Self {
        let mut loc = self.clone();
        if loc.path.is_empty() {
            loc.path = segment.to_string();
        } else {
            loc.path = format!("{}/{}", loc.path, segment);
        }
        loc
    }

    fn sort_key(&self) -> (&str, u32, u32, &str) {
        (
            self.file.as_deref().unwrap_or(""),
            self.line.unwrap_or(0),
            self.column.unwrap_or(0),
            &self.path,
        )
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => {
                write!(f, "{}:{}:{}", file, line, self.column.unwrap_or(0))?
            }
            (Some(file), None) => write!(f, "{}", file)?,
            (None, _) => {}
        }
        if !self.path.is_empty() {
            if self.file.is_some() {
                write!(f, " ")?;
            }
            write!(f, "({})", self.path)?;
        }
        Ok(())
    }
}

/// A single finding produced during parsing, elaboration or evaluation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub location: SourceLocation,
    pub related: Vec<SourceLocation>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            location,
            related: Vec::new(),
        }
    }

    pub fn warning(
        kind: DiagnosticKind,
        message: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            message: message.into(),
            location,
            related: Vec::new(),
        }
    }

    pub fn with_related(mut self, location: SourceLocation) -> Self {
        self.related.push(location);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.kind, self.message)?;
        let loc = self.location.to_string();
        if !loc.is_empty() {
            write!(f, " at {}", loc)?;
        }
        Ok(())
    }
}

/// Collector for diagnostics across all parsing stages.
///
/// Components push findings and keep going; callers inspect the collected
/// list at the end. In strict mode the first error-severity diagnostic
/// makes [`DiagnosticSink::should_abort`] return true so the driver can
/// short-circuit.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
    strict: bool,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            diagnostics: Vec::new(),
            strict: true,
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Record a diagnostic. Exact duplicates are dropped so that repeated
    /// validation passes over the same node do not multiply findings.
    pub fn report(&mut self, diagnostic: Diagnostic) {
        if !self.diagnostics.contains(&diagnostic) {
            tracing::debug!(kind = %diagnostic.kind, "{}", diagnostic.message);
            self.diagnostics.push(diagnostic);
        }
    }

    pub fn error(
        &mut self,
        kind: DiagnosticKind,
        message: impl Into<String>,
        location: SourceLocation,
    ) {
        self.report(Diagnostic::error(kind, message, location));
    }

    pub fn warning(
        &mut self,
        kind: DiagnosticKind,
        message: impl Into<String>,
        location: SourceLocation,
    ) {
        self.report(Diagnostic::warning(kind, message, location));
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    /// True when a strict-mode caller should stop at the current stage.
    pub fn should_abort(&self) -> bool {
        self.strict && self.has_errors()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Drain into the user-visible list, sorted by (file, line, column)
    /// with the document path as tie-breaker.
    pub fn into_sorted(mut self) -> Vec<Diagnostic> {
        self.diagnostics
            .sort_by(|a, b| match a.location.sort_key().cmp(&b.location.sort_key()) {
                Ordering::Equal => a.message.cmp(&b.message),
                other => other,
            });
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_collects_and_dedups() {
        let mut sink = DiagnosticSink::new();
        let loc = SourceLocation::at_path("topology_template/inputs/cpus");
        sink.error(DiagnosticKind::ConstraintViolation, "value 3 not allowed", loc.clone());
        sink.error(DiagnosticKind::ConstraintViolation, "value 3 not allowed", loc);
        assert_eq!(sink.error_count(), 1);
        assert!(sink.has_errors());
    }

    #[test]
    fn test_strict_mode_aborts() {
        let mut sink = DiagnosticSink::strict();
        assert!(!sink.should_abort());
        sink.warning(
            DiagnosticKind::Deprecated,
            "old name",
            SourceLocation::default(),
        );
        assert!(!sink.should_abort());
        sink.error(
            DiagnosticKind::UnknownFieldError,
            "bad field",
            SourceLocation::default(),
        );
        assert!(sink.should_abort());
    }

    #[test]
    fn test_sorted_output() {
        let mut sink = DiagnosticSink::new();
        sink.error(
            DiagnosticKind::UnknownFieldError,
            "later",
            SourceLocation::in_file("b.yaml", "x"),
        );
        sink.error(
            DiagnosticKind::UnknownFieldError,
            "earlier",
            SourceLocation::in_file("a.yaml", "y"),
        );
        let sorted = sink.into_sorted();
        assert_eq!(sorted[0].message, "earlier");
        assert_eq!(sorted[1].message, "later");
    }

    #[test]
    fn test_location_display() {
        let loc = SourceLocation {
            file: Some("template.yaml".into()),
            line: Some(12),
            column: Some(3),
            path: "node_templates/server".into(),
        };
        assert_eq!(loc.to_string(), "template.yaml:12:3 (node_templates/server)");
    }
}
