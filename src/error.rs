//! Error types for the VEC-MAC GEMM harness

use thiserror::Error;

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Harness errors
///
/// Nothing is retried: every variant is either a misconfiguration or a
/// defect in the transformation, and is surfaced to the caller as-is.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Lexer error at position {position}: {message}")]
    LexerError { position: usize, message: String },

    #[error("Parser error: {message}")]
    ParseError { message: String },

    #[error("Precondition violated: {message}")]
    Precondition { message: String },

    #[error("Scheduling error: {message}")]
    ScheduleError { message: String },

    #[error("Intrinsic substitution error: {message}")]
    SubstitutionError { message: String },

    #[error("Lowering error: {message}")]
    LoweringError { message: String },

    #[error("Reference primitive build failed: {message}")]
    BuildError { message: String },

    #[error("Verification failed at C[{row}, {col}]: expected {expected}, got {actual}")]
    Mismatch {
        row: usize,
        col: usize,
        expected: i32,
        actual: i32,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        HarnessError::ParseError { message: msg.into() }
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        HarnessError::Precondition { message: msg.into() }
    }

    pub fn schedule(msg: impl Into<String>) -> Self {
        HarnessError::ScheduleError { message: msg.into() }
    }

    pub fn substitution(msg: impl Into<String>) -> Self {
        HarnessError::SubstitutionError { message: msg.into() }
    }

    pub fn lowering(msg: impl Into<String>) -> Self {
        HarnessError::LoweringError { message: msg.into() }
    }

    pub fn build(msg: impl Into<String>) -> Self {
        HarnessError::BuildError { message: msg.into() }
    }

    /// True for errors raised before any program was built
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            HarnessError::Precondition { .. }
                | HarnessError::LexerError { .. }
                | HarnessError::ParseError { .. }
        )
    }
}
