//! Structured diagnostics and the central reporter
//!
//! The legality checker and the instantiation engine both report through a
//! [`DiagnosticSink`]. The [`Reporter`] accumulates diagnostics instead of
//! failing on the first one, tags each with the type currently being
//! processed, and applies the cumulative verbosity threshold. Every
//! diagnostic that passes the threshold is also emitted through `tracing`.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::statement::{SourceLoc, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Note,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Note => write!(f, "NOTE"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Cumulative verbosity threshold: each level hides everything the previous
/// one hides plus one more severity. Fatal messages always pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    #[default]
    All,
    Warnings,
    Errors,
    FatalOnly,
}

impl WarningLevel {
    pub fn admits(self, severity: Severity) -> bool {
        let min = match self {
            WarningLevel::All => Severity::Note,
            WarningLevel::Warnings => Severity::Warning,
            WarningLevel::Errors => Severity::Error,
            WarningLevel::FatalOnly => Severity::Fatal,
        };
        severity == Severity::Fatal || severity >= min
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticCode {
    /// Legality checker rule, by rule name.
    Lint(&'static str),
    NameConflict,
    TypeResolution,
    ArityMismatch,
    IllegalContext,
    StructuralMismatch,
    AlreadyComplete,
    UndefinedName,
    InvalidRelation,
    Evaluation,
    Units,
    External,
    Method,
    Library,
    Other,
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticCode::Lint(rule) => write!(f, "{}", rule),
            DiagnosticCode::NameConflict => write!(f, "NAME_CONFLICT"),
            DiagnosticCode::TypeResolution => write!(f, "TYPE_RESOLUTION"),
            DiagnosticCode::ArityMismatch => write!(f, "ARITY_MISMATCH"),
            DiagnosticCode::IllegalContext => write!(f, "ILLEGAL_CONTEXT"),
            DiagnosticCode::StructuralMismatch => write!(f, "STRUCTURAL_MISMATCH"),
            DiagnosticCode::AlreadyComplete => write!(f, "ALREADY_COMPLETE"),
            DiagnosticCode::UndefinedName => write!(f, "UNDEFINED_NAME"),
            DiagnosticCode::InvalidRelation => write!(f, "INVALID_RELATION"),
            DiagnosticCode::Evaluation => write!(f, "EVALUATION"),
            DiagnosticCode::Units => write!(f, "UNITS"),
            DiagnosticCode::External => write!(f, "EXTERNAL"),
            DiagnosticCode::Method => write!(f, "METHOD"),
            DiagnosticCode::Library => write!(f, "LIBRARY"),
            DiagnosticCode::Other => write!(f, "OTHER"),
        }
    }
}

/// Where a diagnostic points: the enclosing type, the offending statement
/// and, during instantiation, the instance being built.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosticLocation {
    pub type_name: Option<String>,
    pub statement: Option<&'static str>,
    pub loc: Option<SourceLoc>,
    pub instance: Option<String>,
}

impl DiagnosticLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn at_statement(mut self, stmt: &Statement) -> Self {
        self.statement = Some(stmt.keyword());
        self.loc = Some(stmt.loc.clone());
        self
    }

    pub fn in_instance(mut self, path: impl Into<String>) -> Self {
        self.instance = Some(path.into());
        self
    }
}

impl fmt::Display for DiagnosticLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(t) = &self.type_name {
            parts.push(format!("type '{}'", t));
        }
        if let Some(i) = &self.instance {
            parts.push(format!("instance '{}'", i));
        }
        match (self.statement, &self.loc) {
            (Some(s), Some(loc)) => parts.push(format!("{} statement at {}", s, loc)),
            (Some(s), None) => parts.push(format!("{} statement", s)),
            (None, Some(loc)) => parts.push(loc.to_string()),
            (None, None) => {}
        }
        if parts.is_empty() {
            write!(f, "<unknown location>")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    pub location: DiagnosticLocation,
}

impl Diagnostic {
    pub fn new(severity: Severity, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            location: DiagnosticLocation::new(),
        }
    }

    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    pub fn note(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Note, code, message)
    }

    pub fn at(mut self, location: DiagnosticLocation) -> Self {
        self.location = location;
        self
    }

    pub fn with_statement(mut self, stmt: &Statement) -> Self {
        self.location = self.location.at_statement(stmt);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {}] at {}: {}",
            self.severity, self.code, self.location, self.message
        )
    }
}

pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reporter {
    entries: Vec<Diagnostic>,
    level: WarningLevel,
    type_context: Option<String>,
    suppressed: usize,
}

impl Reporter {
    pub fn new(level: WarningLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn level(&self) -> WarningLevel {
        self.level
    }

    pub fn set_level(&mut self, level: WarningLevel) {
        self.level = level;
    }

    /// Set the type that subsequent diagnostics are attributed to.
    pub fn set_type_context(&mut self, type_name: impl Into<String>) {
        self.type_context = Some(type_name.into());
    }

    pub fn clear_type_context(&mut self) {
        self.type_context = None;
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(Diagnostic::is_error)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Diagnostics dropped by the verbosity threshold.
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn by_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.code == code)
    }

    pub fn worst(&self) -> Option<Severity> {
        self.entries.iter().map(|d| d.severity).max()
    }

    pub fn merge(&mut self, other: Reporter) {
        self.entries.extend(other.entries);
        self.suppressed += other.suppressed;
    }

    /// Take the accumulated diagnostics, leaving the reporter empty.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }

    pub fn format_summary(&self) -> String {
        if self.entries.is_empty() {
            return "No diagnostics".to_string();
        }

        let mut by_code: IndexMap<DiagnosticCode, Vec<&Diagnostic>> = IndexMap::new();
        for entry in &self.entries {
            by_code.entry(entry.code).or_default().push(entry);
        }

        let mut lines = Vec::new();
        lines.push(format!("Found {} diagnostic(s):", self.entries.len()));
        lines.push(String::new());

        for (code, entries) in by_code {
            lines.push(format!("## {} ({}):", code, entries.len()));
            for entry in entries.iter().take(10) {
                lines.push(format!("  - {}", entry));
            }
            if entries.len() > 10 {
                lines.push(format!("  ... and {} more", entries.len() - 10));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }

    pub fn format_compact(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DiagnosticSink for Reporter {
    fn report(&mut self, mut diagnostic: Diagnostic) {
        if diagnostic.location.type_name.is_none() {
            diagnostic.location.type_name = self.type_context.clone();
        }
        if !self.level.admits(diagnostic.severity) {
            self.suppressed += 1;
            return;
        }
        match diagnostic.severity {
            Severity::Note => info!("{}", diagnostic),
            Severity::Warning => warn!("{}", diagnostic),
            Severity::Error | Severity::Fatal => error!("{}", diagnostic),
        }
        self.entries.push(diagnostic);
    }
}

impl fmt::Display for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_cumulative() {
        let mut reporter = Reporter::new(WarningLevel::Errors);
        reporter.report(Diagnostic::note(DiagnosticCode::Other, "style"));
        reporter.report(Diagnostic::warning(DiagnosticCode::Other, "careful"));
        reporter.report(Diagnostic::error(DiagnosticCode::NameConflict, "dup"));
        assert_eq!(reporter.count(), 1);
        assert_eq!(reporter.suppressed(), 2);
        assert!(reporter.has_errors());
    }

    #[test]
    fn test_fatal_never_suppressed() {
        let mut reporter = Reporter::new(WarningLevel::FatalOnly);
        reporter.report(Diagnostic::error(DiagnosticCode::Other, "hidden"));
        reporter.report(Diagnostic::new(
            Severity::Fatal,
            DiagnosticCode::Library,
            "type contains itself",
        ));
        assert_eq!(reporter.count(), 1);
        assert_eq!(reporter.worst(), Some(Severity::Fatal));
    }

    #[test]
    fn test_type_context_applied() {
        let mut reporter = Reporter::new(WarningLevel::All);
        reporter.set_type_context("flash");
        reporter.report(Diagnostic::error(DiagnosticCode::UndefinedName, "no 'T'"));
        reporter.clear_type_context();
        reporter.report(Diagnostic::error(DiagnosticCode::UndefinedName, "no 'P'"));
        let entries = reporter.entries();
        assert_eq!(entries[0].location.type_name.as_deref(), Some("flash"));
        assert_eq!(entries[1].location.type_name, None);
        assert_eq!(reporter.by_code(DiagnosticCode::UndefinedName).count(), 2);
    }

    #[test]
    fn test_summary_groups_by_code() {
        let mut reporter = Reporter::new(WarningLevel::All);
        for i in 0..12 {
            reporter.report(Diagnostic::error(
                DiagnosticCode::Lint("ILLEGAL_FNAME"),
                format!("use {}", i),
            ));
        }
        let summary = reporter.format_summary();
        assert!(summary.contains("Found 12 diagnostic(s)"));
        assert!(summary.contains("## ILLEGAL_FNAME (12):"));
        assert!(summary.contains("... and 2 more"));
    }

    #[test]
    fn test_location_display() {
        let stmt = Statement::is_a(&["x"], "real").at(SourceLoc::new("m.a4c", 3));
        let d = Diagnostic::error(DiagnosticCode::NameConflict, "'x' already defined")
            .at(DiagnosticLocation::new().in_type("m"))
            .with_statement(&stmt);
        assert_eq!(
            d.to_string(),
            "[ERROR NAME_CONFLICT] at type 'm', IS_A statement at m.a4c:3: 'x' already defined"
        );
    }
}
