use crate::runtime::vm::program::CodeAddr;
use crate::runtime::vm::InstanceId;

pub mod executor;
pub mod value;
pub mod vm;

/// Defects inside the interpreter itself: malformed compiler metadata, indices
/// that a correct compilation stage can never emit. These are never caused by
/// the running script and travel on a channel of their own so the embedding
/// can report them as bugs rather than script failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalError {
    /// A capture descriptor named a local slot outside the current frame.
    CaptureSlotOutOfRange { slot: usize, frame_len: usize },
    /// A capture descriptor named an upvalue outside the enclosing context.
    CaptureUpvalueOutOfRange { index: usize, context_len: usize },
    /// A body symbol referenced an upvalue index beyond the capture list.
    UpvalueOutOfRange { index: usize, context_len: usize },
    /// A function-table index with no entry.
    UnknownFunction { index: usize },
    /// A store through a `DefaultEnv` descriptor; the environment itself is
    /// not an assignable variable.
    EnvironmentNotAssignable,
}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InternalError::CaptureSlotOutOfRange { slot, frame_len } => write!(
                f,
                "capture refers to local slot {slot} but the frame has {frame_len} slots"
            ),
            InternalError::CaptureUpvalueOutOfRange { index, context_len } => write!(
                f,
                "capture refers to upvalue {index} but the enclosing context has {context_len} cells"
            ),
            InternalError::UpvalueOutOfRange { index, context_len } => write!(
                f,
                "body symbol refers to upvalue {index} but the capture list has {context_len} entries"
            ),
            InternalError::UnknownFunction { index } => {
                write!(f, "function table has no entry at index {index}")
            }
            InternalError::EnvironmentNotAssignable => {
                write!(f, "default environment is not assignable")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// A closure was invoked under an interpreter instance other than the one
    /// that created it. Precondition violation by the embedding, fatal to the
    /// offending call.
    ForeignClosure {
        owner: InstanceId,
        current: InstanceId,
    },
    /// Ordinary script-level failure: a call through a value that is not a
    /// function. Raised by the executor via `Activation::call`.
    NotCallable(&'static str),
    Internal(InternalError),
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ForeignClosure { owner, current } => write!(
                f,
                "closure owned by interpreter instance {owner} invoked under instance {current}"
            ),
            ErrorKind::NotCallable(tname) => write!(f, "attempt to call a {tname} value"),
            ErrorKind::Internal(e) => write!(f, "internal interpreter error: {e}"),
        }
    }
}

/// Runtime error, tagged with the bytecode entry point of the function being
/// instantiated or executed when it arose, if one is known.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub entry: Option<CodeAddr>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, entry: None }
    }
    pub fn at(kind: ErrorKind, entry: CodeAddr) -> Self {
        Self {
            kind,
            entry: Some(entry),
        }
    }
    pub fn internal(e: InternalError, entry: CodeAddr) -> Self {
        Self::at(ErrorKind::Internal(e), entry)
    }
    /// Distinguishes defect reports from script-level failures, so embedders
    /// can route them to different channels.
    pub fn is_internal(&self) -> bool {
        matches!(self.kind, ErrorKind::Internal(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.entry {
            Some(entry) => write!(f, "{} (at {entry})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}
