//! Error taxonomy shared by the builder, interpreter, engine and debugger.
//!
//! | Type | Scope |
//! |------|-------|
//! | [`ParseError`] | fatal for the whole document |
//! | [`EvalError`] | one fragment; rendered as an inline marker |
//! | [`Interrupt`] | unwinding signal: an [`EvalError`] or cancellation |
//! | [`TemplateError`] | what [`Engine`](crate::engine::Engine) returns |

use thiserror::Error;

/// A malformed fragment or unbalanced structure, with its source location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// A runtime failure scoped to the fragment that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("{0} is not defined")]
    Undefined(String),

    #[error("{0} is not a function")]
    NotCallable(String),

    #[error("unsupported operator {0}")]
    UnsupportedOperator(String),

    #[error("{receiver}.{method} is not supported")]
    UnsupportedMethod { receiver: String, method: String },

    #[error("{name}: expected {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("assignment to constant variable '{0}'")]
    ConstAssign(String),

    #[error("invalid assignment target")]
    InvalidTarget,

    #[error("cannot read property '{property}' of {base}")]
    NullProperty { property: String, base: String },

    #[error("unknown command tp.{module}.{function}")]
    UnknownCommand { module: String, function: String },

    #[error("tp.{module}.{function} failed: {message}")]
    Handler {
        module: String,
        function: String,
        message: String,
    },

    #[error("maximum call depth of {0} exceeded")]
    CallDepth(usize),

    #[error("{0}")]
    Type(String),
}

/// Non-local exits that unwind the interpreter up to the document boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Interrupt {
    #[error(transparent)]
    Error(#[from] EvalError),

    /// The external cancellation check fired, or a module call was cancelled.
    #[error("execution cancelled")]
    Cancelled,
}

/// Failures surfaced by the top-level engine API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("cannot start evaluation thread: {0}")]
    Thread(String),
}

/// Convenience alias for interpreter results.
pub type EvalResult<T> = Result<T, Interrupt>;

/// Shorthand for building a type error inside evaluation code.
pub(crate) fn type_error<T>(msg: impl Into<String>) -> EvalResult<T> {
    Err(Interrupt::Error(EvalError::Type(msg.into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display_has_location() {
        let e = ParseError::new(3, 7, "unterminated fragment");
        assert_eq!(
            e.to_string(),
            "parse error at line 3, column 7: unterminated fragment"
        );
    }

    #[test]
    fn eval_error_messages() {
        assert_eq!(EvalError::Undefined("x".into()).to_string(), "x is not defined");
        assert_eq!(
            EvalError::Handler {
                module: "system".into(),
                function: "prompt".into(),
                message: "no tty".into(),
            }
            .to_string(),
            "tp.system.prompt failed: no tty"
        );
    }

    #[test]
    fn interrupt_wraps_eval_error() {
        let i: Interrupt = EvalError::CallDepth(10).into();
        assert_eq!(i.to_string(), "maximum call depth of 10 exceeded");
        assert_eq!(Interrupt::Cancelled.to_string(), "execution cancelled");
    }
}
