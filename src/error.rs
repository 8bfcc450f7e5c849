use crate::types::enums::ThreadStatus;
use std::ffi::NulError;
use std::string::FromUtf8Error;
use thiserror::Error;

pub type LuaResult<T> = Result<T, LuaError>;

/// Errors surfaced by the interop layer.
///
/// Every variant except an internal lifetime violation is recoverable at the
/// scripting boundary: errors raised inside a metatable handler are re-raised
/// as ordinary Lua errors carrying the message below, and errors from
/// host-initiated calls propagate through `Result`. A lifetime violation
/// (resolving a released handle) is a logic defect in the layer itself and
/// aborts instead of appearing here.
#[derive(Error, Debug)]
pub enum LuaError {
    /// A value could not cross the stack boundary in the requested direction.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// No overload in a candidate set accepted the supplied arguments.
    #[error("no matching overload: {0}")]
    Resolution(String),

    /// A member name denotes more than one member category on the same type.
    #[error("ambiguous member '{name}' on '{type_name}'")]
    AmbiguousMember {
        type_name: &'static str,
        name: String,
    },

    /// A member name was not found on the receiver's type.
    #[error("unknown member '{name}' on '{type_name}'")]
    InvalidMember {
        type_name: &'static str,
        name: String,
    },

    /// The native value stack cannot grow to fit the requested transfer.
    #[error("lua stack cannot fit {needed} more values")]
    StackCapacity { needed: usize },

    /// A coroutine operation was attempted in an illegal state.
    #[error("{0}")]
    CoroutineState(String),

    /// The engine reported a protocol error from a native call. The message
    /// is the error value the engine left on the stack.
    #[error("lua error ({status:?}): {message}")]
    NativeCall {
        status: ThreadStatus,
        message: String,
    },

    /// A host-side callback failed; the original failure is kept as a cause.
    #[error("host callback failed: {message}")]
    Callback {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The owning context has been disposed and the state is gone.
    #[error("lua state has been closed")]
    Closed,

    #[error("failed to create lua state")]
    FailedToCreateState,

    #[error("invalid utf-8 in lua string: {0}")]
    Utf8(#[from] FromUtf8Error),

    #[error("string contains an interior nul byte: {0}")]
    Nul(#[from] NulError),
}

impl LuaError {
    /// Wrap an arbitrary host error as a callback failure, preserving it as
    /// the cause.
    pub fn callback<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LuaError::Callback {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// A callback failure with a bare message.
    pub fn callback_msg(message: impl Into<String>) -> Self {
        LuaError::Callback {
            message: message.into(),
            source: None,
        }
    }
}
