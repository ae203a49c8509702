// File: src/errors.rs
//
// Error handling for the Strand machine. Every runtime error is fatal to
// the process: the first worker to hit one halts the pool, and the binary
// prints a single `ERROR: <message>` line and exits with code 1. There is
// no recovery and no partial failure.

use colored::Colorize;
use std::fmt;

/// Classes of fatal runtime errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmErrorKind {
    /// An operator required more values than a stack held.
    Underflow,
    /// A name lookup failed.
    MissingStack,
    /// POP found the named stack empty.
    TargetEmpty,
    /// BEGIN/END accounting mismatch while capturing a block.
    Capture,
    /// Machine state that should be impossible, e.g. a dequeued context id
    /// with no registered context.
    Invariant,
    /// Division or modulo with a zero divisor.
    Arithmetic,
}

impl fmt::Display for VmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VmErrorKind::Underflow => write!(f, "stack underflow"),
            VmErrorKind::MissingStack => write!(f, "missing stack"),
            VmErrorKind::TargetEmpty => write!(f, "target stack empty"),
            VmErrorKind::Capture => write!(f, "block capture error"),
            VmErrorKind::Invariant => write!(f, "invariant breach"),
            VmErrorKind::Arithmetic => write!(f, "arithmetic error"),
        }
    }
}

/// A fatal machine error: a kind plus the user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmError {
    pub kind: VmErrorKind,
    pub message: String,
}

impl VmError {
    pub fn new(kind: VmErrorKind, message: impl Into<String>) -> VmError {
        VmError {
            kind,
            message: message.into(),
        }
    }

    /// An operator popped from CURRENT and found it short.
    pub fn underflow(op_token: &str) -> VmError {
        VmError::new(
            VmErrorKind::Underflow,
            format!("Not enough values to perform '{op_token}'!"),
        )
    }

    pub fn missing_stack(message: impl Into<String>) -> VmError {
        VmError::new(VmErrorKind::MissingStack, message)
    }

    pub fn target_empty(message: impl Into<String>) -> VmError {
        VmError::new(VmErrorKind::TargetEmpty, message)
    }

    pub fn capture(message: impl Into<String>) -> VmError {
        VmError::new(VmErrorKind::Capture, message)
    }

    pub fn invariant(message: impl Into<String>) -> VmError {
        VmError::new(VmErrorKind::Invariant, message)
    }

    pub fn arithmetic(message: impl Into<String>) -> VmError {
        VmError::new(VmErrorKind::Arithmetic, message)
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for VmError {}

/// Print `ERROR: <message>` to stderr and exit with code 1. The colored
/// prefix degrades to plain text when stderr is not a terminal, keeping the
/// diagnostic line byte-exact for pipes.
pub fn fatal(message: impl fmt::Display) -> ! {
    eprintln!("{} {}", "ERROR:".red().bold(), message);
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underflow_message_names_the_operator() {
        let err = VmError::underflow("call");
        assert_eq!(err.kind, VmErrorKind::Underflow);
        assert_eq!(err.to_string(), "Not enough values to perform 'call'!");
    }

    #[test]
    fn display_is_the_bare_message() {
        let err = VmError::target_empty("POP: Target stack empty!");
        assert_eq!(err.to_string(), "POP: Target stack empty!");
    }
}
