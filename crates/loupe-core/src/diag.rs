//! Diagnostics model: stable codes, severities and source ranges.
//!
//! Every analyzer in the engine reports problems as [`Diagnostic`] values.
//! The code set is part of the public contract: consumers and tests key off
//! the string codes, so codes are never renamed or renumbered, only added.
//!
//! Code families:
//! - `call-*`: call-binding validation (argument/parameter matching)
//! - `entity-*`: entity-registry consistency
//! - `domain-*`: structured query ("domain") expression validation
//! - `field-*`: field cross-reference validation

use serde::{Deserialize, Serialize};

use crate::graph::Span;

// ============================================================================
// Severity
// ============================================================================

/// Diagnostic severity, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

// ============================================================================
// Stable Codes
// ============================================================================

/// Stable diagnostic codes.
///
/// The string form (see [`DiagCode::as_str`]) is the wire-facing identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagCode {
    // Call binding
    /// More positional arguments than positional slots, no varargs to spill to.
    CallTooManyPositional,
    /// Keyword argument names no parameter, no kwargs to spill to.
    CallUnexpectedKeyword,
    /// Required positional parameter received no value.
    CallMissingArgument,
    /// Required keyword-only parameter received no value.
    CallMissingKeywordArgument,
    /// Keyword argument names a positional-only parameter.
    CallPositionalOnlyByKeyword,
    /// Positional argument appears after a keyword argument.
    CallPositionalAfterKeyword,

    // Entity registry
    /// Registry lookup names no registered entity.
    EntityUnknown,
    /// A second unrelated base registration of an already-registered name.
    EntityDuplicate,
    /// Registered name attribute is missing or not a string literal.
    EntityInvalidName,
    /// Extension of a name that is never base-registered.
    EntityUnknownExtension,

    // Domain expressions
    /// Domain argument resolves to something that is not a list.
    DomainNotAList,
    /// Condition tuple does not have 2 or 3 elements.
    DomainConditionArity,
    /// Condition operator is not in the comparison/membership whitelist.
    DomainInvalidOperator,
    /// Logical operator has fewer operands than its arity requires.
    DomainOperatorArity,
    /// Logical operator written as a bare word (`and`/`or`/`not`).
    DomainInvalidOperatorSpelling,
    /// Field path segment does not resolve on the subject entity.
    DomainUnknownField,
    /// Trailing attribute on a temporal field is not a calendar decomposition.
    DomainUnknownDateAttribute,
    /// Trailing attribute on a non-relational, non-temporal field.
    DomainAttributeOnScalar,

    // Field cross-references
    /// Declared inverse member does not resolve on the target entity.
    FieldInverseNotFound,
    /// `related=` dotted path does not resolve on the owning entity.
    FieldRelatedPathNotFound,
    /// `related=` path resolves to a field of a different kind.
    FieldRelatedTypeMismatch,
    /// Named compute/inverse/search accessor does not resolve to a method.
    FieldAccessorNotFound,
    /// Dependency-decorator path does not resolve on the owning entity.
    FieldUnknownDependency,
}

impl DiagCode {
    /// Stable string form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagCode::CallTooManyPositional => "call-too-many-positional",
            DiagCode::CallUnexpectedKeyword => "call-unexpected-keyword",
            DiagCode::CallMissingArgument => "call-missing-argument",
            DiagCode::CallMissingKeywordArgument => "call-missing-keyword-argument",
            DiagCode::CallPositionalOnlyByKeyword => "call-positional-only-by-keyword",
            DiagCode::CallPositionalAfterKeyword => "call-positional-after-keyword",
            DiagCode::EntityUnknown => "entity-unknown",
            DiagCode::EntityDuplicate => "entity-duplicate",
            DiagCode::EntityInvalidName => "entity-invalid-name",
            DiagCode::EntityUnknownExtension => "entity-unknown-extension",
            DiagCode::DomainNotAList => "domain-not-a-list",
            DiagCode::DomainConditionArity => "domain-condition-arity",
            DiagCode::DomainInvalidOperator => "domain-invalid-operator",
            DiagCode::DomainOperatorArity => "domain-operator-arity",
            DiagCode::DomainInvalidOperatorSpelling => "domain-invalid-operator-spelling",
            DiagCode::DomainUnknownField => "domain-unknown-field",
            DiagCode::DomainUnknownDateAttribute => "domain-unknown-date-attribute",
            DiagCode::DomainAttributeOnScalar => "domain-attribute-on-scalar",
            DiagCode::FieldInverseNotFound => "field-inverse-not-found",
            DiagCode::FieldRelatedPathNotFound => "field-related-path-not-found",
            DiagCode::FieldRelatedTypeMismatch => "field-related-type-mismatch",
            DiagCode::FieldAccessorNotFound => "field-accessor-not-found",
            DiagCode::FieldUnknownDependency => "field-unknown-dependency",
        }
    }

    /// Default severity for this code.
    ///
    /// Ordering violations and spelling problems are warnings (the runtime
    /// tolerates some of them); everything else is an error.
    pub fn default_severity(&self) -> Severity {
        match self {
            DiagCode::CallPositionalAfterKeyword => Severity::Warning,
            DiagCode::DomainInvalidOperatorSpelling => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl std::fmt::Display for DiagCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Diagnostic
// ============================================================================

/// A single analyzer finding: stable code, severity, range and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagCode,
    pub severity: Severity,
    pub range: Span,
    pub message: String,
}

impl Diagnostic {
    /// Create a diagnostic with the code's default severity.
    pub fn new(code: DiagCode, range: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            severity: code.default_severity(),
            range,
            message: message.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
