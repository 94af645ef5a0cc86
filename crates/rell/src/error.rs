//! Non-local exits: raised errors, labeled throws, halts, and quits.
//!
//! Every evaluator path returns `RunResult<T>`; the error arm is the single
//! transport for all four exit flavors. Raised errors (`fail`) unwind to the
//! nearest trap; throws unwind to a label-matching catch; halts and quits
//! are reserved exits that ordinary catchers do not intercept. Panics are
//! not represented here: they are process aborts that bypass traps.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString, IntoStaticStr};

use crate::{resource::ResourceError, value::Value};

/// Result alias threaded through the evaluator.
pub type RunResult<T> = Result<T, RunError>;

/// Stable error identifiers, rendered in kebab case.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorId {
    /// A word had no value.
    NoValue,
    /// A word had no binding at all.
    NotBound,
    /// A throw reached the outermost driver uncaught.
    NoCatch,
    /// A refinement in a path is not a refinement of the action.
    BadRefine,
    /// An argument was missing from the feed.
    NeedNonEnd,
    /// An argument failed its parameter's typeset.
    ExpectArg,
    /// A value had the wrong type for an operation.
    InvalidType,
    /// An argument value was out of the operation's domain.
    InvalidArg,
    /// A path could not be picked through.
    InvalidPath,
    /// Series access past the tail.
    PastEnd,
    /// Series index out of range.
    OutOfRange,
    /// Mutation of a protected or frozen series.
    Locked,
    /// Expansion of a fixed-size series.
    FixedSize,
    /// Access through a series whose owning frame has ended.
    Inaccessible,
    /// Division by zero.
    ZeroDivide,
    /// Arithmetic overflow.
    Overflow,
    /// A make was given an unusable spec.
    BadMake,
    /// Specialization target is not an action.
    BadSpecializee,
    /// A partially specialized refinement is missing arguments.
    PartialSpecialization,
    /// Scanner rejected the source text.
    Syntax,
    /// A resource limit tripped.
    ResourceLimit,
    /// Compression envelope was malformed.
    BadCompression,
    /// A port driver reported a failure.
    PortFault,
    /// Catch-all for host-raised errors.
    User,
}

/// The payload of a raised error: identity, rendered message, provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub id: ErrorId,
    pub message: String,
    /// Molded fragment of source near the raising construct.
    pub near: Option<String>,
    /// File/line carried by the raising array, when it had provenance.
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl ErrorData {
    #[must_use]
    pub fn new(id: ErrorId, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
            near: None,
            file: None,
            line: None,
        }
    }
}

/// One in-flight non-local exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunError {
    /// A raised error, unwinding to the nearest trap.
    Fail(Box<ErrorData>),
    /// A labeled throw. The label is blank for plain `throw`, a word for
    /// `throw/name`, and a frame value for `return`, whose identity
    /// distinguishes returns from different invocations.
    Throw { label: Value, value: Value },
    /// The halt signal fired; only the outermost driver stops this.
    Halt,
    /// Interpreter shutdown with an exit value; only a quit catcher or the
    /// driver stops this.
    Quit(Value),
}

impl RunError {
    #[must_use]
    pub fn fail(id: ErrorId, message: impl Into<String>) -> Self {
        Self::Fail(Box::new(ErrorData::new(id, message)))
    }

    /// Attaches source provenance if the error does not have any yet.
    #[must_use]
    pub fn with_location(self, file: Option<&str>, line: Option<u32>, near: Option<String>) -> Self {
        match self {
            Self::Fail(mut data) => {
                if data.file.is_none() {
                    data.file = file.map(str::to_owned);
                    data.line = line;
                }
                if data.near.is_none() {
                    data.near = near;
                }
                Self::Fail(data)
            }
            other => other,
        }
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        Self::fail(ErrorId::ResourceLimit, err.to_string())
    }
}

/// Host-facing error report, produced at the driver boundary.
///
/// Kept separate from the internal error plumbing so the public surface
/// stays stable while the evaluator's exit machinery evolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub id: String,
    pub message: String,
    pub near: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl ErrorReport {
    #[must_use]
    pub fn from_data(data: &ErrorData) -> Self {
        Self {
            id: data.id.to_string(),
            message: data.message.clone(),
            near: data.near.clone(),
            file: data.file.clone(),
            line: data.line,
        }
    }

    /// The report for an uncaught throw surfacing at the driver.
    #[must_use]
    pub fn no_catch() -> Self {
        Self {
            id: ErrorId::NoCatch.to_string(),
            message: "no catch for throw".to_owned(),
            near: None,
            file: None,
            line: None,
        }
    }

    #[must_use]
    pub fn halted() -> Self {
        Self {
            id: "halt".to_owned(),
            message: "halted by request".to_owned(),
            near: None,
            file: None,
            line: None,
        }
    }
}

impl Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "** error [{}]: {}", self.id, self.message)?;
        if let Some(near) = &self.near {
            write!(f, "\n** near: {near}")?;
        }
        if let Some(file) = &self.file {
            write!(f, "\n** where: {file}")?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ErrorReport {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_ids_render_kebab_case() {
        assert_eq!(ErrorId::NoValue.to_string(), "no-value");
        assert_eq!(ErrorId::ZeroDivide.to_string(), "zero-divide");
        assert_eq!("bad-refine".parse::<ErrorId>().unwrap(), ErrorId::BadRefine);
    }

    #[test]
    fn with_location_does_not_overwrite() {
        let err = RunError::fail(ErrorId::NoValue, "x has no value")
            .with_location(Some("a.r"), Some(3), None)
            .with_location(Some("b.r"), Some(9), None);
        let RunError::Fail(data) = err else {
            panic!("expected Fail");
        };
        assert_eq!(data.file.as_deref(), Some("a.r"));
        assert_eq!(data.line, Some(3));
    }

    #[test]
    fn report_display_format() {
        let mut data = ErrorData::new(ErrorId::ZeroDivide, "cannot divide by zero");
        data.near = Some("1 / 0".to_owned());
        let report = ErrorReport::from_data(&data);
        let text = report.to_string();
        assert!(text.contains("** error [zero-divide]"));
        assert!(text.contains("** near: 1 / 0"));
    }
}
