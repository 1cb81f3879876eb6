//! The crate's error type.
//!
//! Four kinds, matching the reference status codes: syntax (3), runtime
//! (2), memory (4), error-in-error-handler (5). Every
//! kind but `Memory` carries a [`LuaValue`] payload — usually a string
//! formatted `chunkname:line: message`, but a `pcall`ed script can raise any
//! value, and the error must survive that round-trip unchanged.

use crate::value::LuaValue;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 0,
    Runtime = 2,
    Syntax = 3,
    Memory = 4,
    ErrorInErrorHandler = 5,
}

#[derive(Debug, Clone)]
pub enum LuaError {
    /// Raised by the lexer or compiler. `message` is already prefixed
    /// `source:line:`.
    Syntax { message: String },
    /// Raised by the VM: type errors, arithmetic on non-numbers, concat
    /// errors, order errors, bad keys, stack overflow, too-many-captures,
    /// loop-in-gettable/settable — or by a script calling `error(v)`.
    /// `value` is the exact value a `pcall` site sees; `display` is a
    /// ready-rendered string for hosts that just want to print the error
    /// (equal to `tostring(value)` computed at raise time, since by the
    /// time the error reaches a host the GC string table may have moved on).
    Runtime { value: LuaValue, display: String },
    /// Allocation failure. Always carries the one fixed, pre-interned
    /// "not enough memory" string rather than allocating a new message
    /// string, which could itself fail.
    Memory,
    /// An error handler installed via `xpcall`/`lua_pcall` itself raised, or
    /// call-info depth was exceeded while dispatching an error.
    ErrorInErrorHandler,
}

impl LuaError {
    pub fn syntax(source: &str, line: u32, message: impl fmt::Display) -> Self {
        LuaError::Syntax {
            message: format!("{source}:{line}: {message}"),
        }
    }

    /// Wraps an arbitrary raised value (what `error(v)` actually does: `v`
    /// need not be a string).
    pub fn raised(value: LuaValue, display: String) -> Self {
        LuaError::Runtime { value, display }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LuaError::Syntax { .. } => StatusCode::Syntax,
            LuaError::Runtime { .. } => StatusCode::Runtime,
            LuaError::Memory => StatusCode::Memory,
            LuaError::ErrorInErrorHandler => StatusCode::ErrorInErrorHandler,
        }
    }

    /// The value a `pcall`/`xpcall` site sees as its error object. `Syntax`,
    /// `Memory` and `ErrorInErrorHandler` carry no `LuaValue` payload, so a
    /// freshly-interned display string stands in for them.
    pub fn payload(&self, gc: &mut crate::gc::Gc) -> LuaValue {
        match self {
            LuaError::Runtime { value, .. } => *value,
            other => LuaValue::String(gc.intern_string(&other.to_string())),
        }
    }
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaError::Syntax { message } => write!(f, "{message}"),
            LuaError::Runtime { display, .. } => write!(f, "{display}"),
            LuaError::Memory => write!(f, "not enough memory"),
            LuaError::ErrorInErrorHandler => write!(f, "error in error handling"),
        }
    }
}

impl std::error::Error for LuaError {}

pub type LuaResult<T> = Result<T, LuaError>;
