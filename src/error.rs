use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! invariant_error {
    ($msg:expr) => {
        crate::Error::Invariant {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Invariant {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type covering every failure this library can surface.
///
/// The taxonomy is deliberately small. A bytecode optimizer has exactly two
/// unrecoverable situations - input it cannot represent, and an internal
/// invariant breach discovered mid-pipeline - plus configuration mistakes.
/// Everything else (an unprovable rewrite, an external member reference) is a
/// designed no-op inside the passes and never becomes an `Error`.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::Malformed`] - The loaded program violates an IR construction rule
///
/// ## Pipeline Errors
/// - [`Error::Invariant`] - An internal consistency check failed during a pass;
///   the whole pipeline aborts rather than risking a silently mis-transformed
///   method
/// - [`Error::Config`] - The configuration document is malformed or a pass
///   precondition expressed through it does not hold
#[derive(Error, Debug)]
pub enum Error {
    /// The input program is damaged or breaks an IR construction rule.
    ///
    /// Reported when a loader hands over entities that do not satisfy the
    /// object-model invariants, e.g. two definitions of the same class across
    /// stores. The error includes the source location where the malformation
    /// was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An internal invariant was violated while a pass was running.
    ///
    /// Typical causes: an instruction carries a field/method/type handle the
    /// interning context cannot resolve, or a reference-carrying instruction
    /// has a kind that disagrees with its payload. A breach here means the IR
    /// graph can no longer be trusted, so the pipeline aborts instead of
    /// attempting partial repair - a mis-transformed method would corrupt
    /// program behavior at run time, which is strictly worse than stopping.
    #[error("Invariant - {file}:{line}: {message}")]
    Invariant {
        /// The message to be printed for the Invariant error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The configuration document could not be interpreted.
    ///
    /// Raised when per-pass options fail to deserialize, or when a pass
    /// precondition that the configuration promises (e.g. "references have
    /// been rebound") demonstrably does not hold.
    #[error("Configuration error: {0}")]
    Config(String),
}
