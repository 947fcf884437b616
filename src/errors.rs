//! Definition of errors.

use core::fmt;

use std::error::Error;

/// Error used when a sub-region of the arena has no room left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreExhaustedError {
    /// Name of the exhausted sub-region.
    pub store: &'static str,
}

/// Error used when textual input cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidFormatError {
    /// 1-based line number.
    pub line: usize,
    msg: String,
}

/// Error used when an instance is inconsistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInstanceError {
    msg: &'static str,
}

/// Error used when a dev or test instance refers to a label never seen in training.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLabelError {
    /// The rejected label.
    pub label: String,
}

/// Error used when the loss is not a number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericalDivergenceError {
    /// Training round at which the divergence was detected.
    pub round: u32,
}

/// Error used when the argument is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidArgumentError {
    msg: &'static str,
}

/// The error type for hashcrf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashCrfError {
    /// A sub-region of the arena is full.
    StoreExhausted(StoreExhaustedError),

    /// Textual input is malformed.
    InvalidFormat(InvalidFormatError),

    /// An instance is malformed.
    InvalidInstance(InvalidInstanceError),

    /// A label is not in the label table.
    UnknownLabel(UnknownLabelError),

    /// The loss evaluated to NaN.
    NumericalDivergence(NumericalDivergenceError),

    /// The argument is invalid.
    InvalidArgument(InvalidArgumentError),

    /// A header slot could not be decoded.
    CorruptHeader,
}

impl fmt::Display for StoreExhaustedError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StoreExhaustedError: {} is full", self.store)
    }
}

impl fmt::Display for InvalidFormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidFormatError: line {}: {}", self.line, self.msg)
    }
}

impl fmt::Display for InvalidInstanceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidInstanceError: {}", self.msg)
    }
}

impl fmt::Display for UnknownLabelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UnknownLabelError: {:?}", self.label)
    }
}

impl fmt::Display for NumericalDivergenceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NumericalDivergenceError: loss is NaN at round {}", self.round)
    }
}

impl fmt::Display for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidArgumentError: {}", self.msg)
    }
}

impl Error for StoreExhaustedError {}
impl Error for InvalidFormatError {}
impl Error for InvalidInstanceError {}
impl Error for UnknownLabelError {}
impl Error for NumericalDivergenceError {}
impl Error for InvalidArgumentError {}

impl HashCrfError {
    /// Creates a new [`StoreExhaustedError`].
    pub const fn store_exhausted(store: &'static str) -> Self {
        Self::StoreExhausted(StoreExhaustedError { store })
    }

    /// Creates a new [`InvalidFormatError`].
    pub fn invalid_format<S>(line: usize, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidFormat(InvalidFormatError {
            line,
            msg: msg.into(),
        })
    }

    /// Creates a new [`InvalidInstanceError`].
    pub const fn invalid_instance(msg: &'static str) -> Self {
        Self::InvalidInstance(InvalidInstanceError { msg })
    }

    /// Creates a new [`UnknownLabelError`].
    pub fn unknown_label<S>(label: S) -> Self
    where
        S: Into<String>,
    {
        Self::UnknownLabel(UnknownLabelError {
            label: label.into(),
        })
    }

    /// Creates a new [`NumericalDivergenceError`].
    pub const fn numerical_divergence(round: u32) -> Self {
        Self::NumericalDivergence(NumericalDivergenceError { round })
    }

    /// Creates a new [`InvalidArgumentError`].
    pub const fn invalid_argument(msg: &'static str) -> Self {
        Self::InvalidArgument(InvalidArgumentError { msg })
    }
}

impl fmt::Display for HashCrfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::StoreExhausted(e) => e.fmt(f),
            Self::InvalidFormat(e) => e.fmt(f),
            Self::InvalidInstance(e) => e.fmt(f),
            Self::UnknownLabel(e) => e.fmt(f),
            Self::NumericalDivergence(e) => e.fmt(f),
            Self::InvalidArgument(e) => e.fmt(f),
            Self::CorruptHeader => write!(f, "CorruptHeader: instance header cannot be decoded"),
        }
    }
}

impl Error for HashCrfError {}

/// A specialized Result type.
pub type Result<T, E = HashCrfError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_exhausted_names_store() {
        let e = HashCrfError::store_exhausted("key store");
        assert_eq!("StoreExhaustedError: key store is full", e.to_string());
    }

    #[test]
    fn test_invalid_format_line() {
        let e = HashCrfError::invalid_format(3, "value is NaN");
        assert_eq!("InvalidFormatError: line 3: value is NaN", e.to_string());
    }
}
