//! Executor error types
//!
//! Error codes:
//! - AERO_EXECUTION_FAILED (ERROR)
//! - AERO_PLAN_SELECTION_FAILED (ERROR)
//! - AERO_EXECUTOR_KILLED (ERROR)
//! - AERO_BAD_GEOMETRY (ERROR)
//! - AERO_INVARIANT_VIOLATION (FATAL)

use std::fmt;

/// Severity levels for executor errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Query failed but the engine is healthy
    Error,
    /// An internal invariant broke; the stage tree must not be reused
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Executor error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorErrorCode {
    /// General execution failure
    AeroExecutionFailed,
    /// Every candidate plan failed during the trial period
    AeroPlanSelectionFailed,
    /// The executor was killed by the surrounding system
    AeroExecutorKilled,
    /// Malformed or out-of-range geometry in a proximity search
    AeroBadGeometry,
    /// Stage protocol misuse detected at runtime (FATAL)
    AeroInvariantViolation,
}

impl ExecutorErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorErrorCode::AeroExecutionFailed => "AERO_EXECUTION_FAILED",
            ExecutorErrorCode::AeroPlanSelectionFailed => "AERO_PLAN_SELECTION_FAILED",
            ExecutorErrorCode::AeroExecutorKilled => "AERO_EXECUTOR_KILLED",
            ExecutorErrorCode::AeroBadGeometry => "AERO_BAD_GEOMETRY",
            ExecutorErrorCode::AeroInvariantViolation => "AERO_INVARIANT_VIOLATION",
        }
    }

    /// Parses a string code back into an error code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "AERO_EXECUTION_FAILED" => Some(ExecutorErrorCode::AeroExecutionFailed),
            "AERO_PLAN_SELECTION_FAILED" => Some(ExecutorErrorCode::AeroPlanSelectionFailed),
            "AERO_EXECUTOR_KILLED" => Some(ExecutorErrorCode::AeroExecutorKilled),
            "AERO_BAD_GEOMETRY" => Some(ExecutorErrorCode::AeroBadGeometry),
            "AERO_INVARIANT_VIOLATION" => Some(ExecutorErrorCode::AeroInvariantViolation),
            _ => None,
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            ExecutorErrorCode::AeroInvariantViolation => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for ExecutorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Executor error type with full context
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorError {
    /// Error code
    code: ExecutorErrorCode,
    /// Human-readable message
    message: String,
}

impl ExecutorError {
    /// Create an error with an explicit code
    pub fn new(code: ExecutorErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create an execution failed error
    pub fn execution_failed(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::AeroExecutionFailed, reason)
    }

    /// Create a plan selection error
    pub fn plan_selection_failed(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::AeroPlanSelectionFailed, reason)
    }

    /// Create a killed error
    pub fn killed(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::AeroExecutorKilled, reason)
    }

    /// Create a geometry error
    pub fn bad_geometry(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::AeroBadGeometry, reason)
    }

    /// Create an invariant violation error (FATAL)
    pub fn invariant_violation(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::AeroInvariantViolation, reason)
    }

    /// Returns the error code
    pub fn code(&self) -> ExecutorErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns whether this error reports an external kill
    pub fn is_killed(&self) -> bool {
        self.code == ExecutorErrorCode::AeroExecutorKilled
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for ExecutorError {}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;
