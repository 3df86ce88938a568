//! Module `error` define the error type used across this package.
//!
//! Errors are constructed via the [err_at] macro, which tags each error
//! value with the `file:line` location it originated from.

use std::fmt;

/// Short form of `result::Result<T, Error>`, used across the package.
pub type Result<T> = std::result::Result<T, Error>;

/// Error variants that can be returned by this package's public API.
///
/// First argument in each variant is the `file:line` prefix at which the
/// error was detected, second argument is the failure message.
#[derive(Clone, PartialEq)]
pub enum Error {
    /// Targeted row does not exist and the operation is not insertable,
    /// or an edge's stored type (with sign) differs from the requested one.
    KeyNotFound(String, String),
    /// Another executor holds the memory lock for the same row identity.
    ConcurrentModify(String, String),
    /// Write refused because this node is not the partition leader. The
    /// leader hint, when known, travels in the dispatcher's result vector.
    LeaderChanged(String, String),
    /// Filter expression evaluated to false; informational, old-row yields
    /// are still produced.
    FilteredOut(String, String),
    /// Decode, type, or expression-evaluation failure on stored data.
    IllegalData(String, String),
    /// A column has no value, no default, and is not nullable.
    NoDefaultAndNotNullable(String, String),
    /// Runtime value does not fit the declared column type.
    InvalidFieldValue(String, String),
    /// Column default failed to evaluate or does not fit the column type.
    InvalidDefault(String, String),
    /// Requested column absent, non-nullable and undefaulted.
    ReadPropFailed(String, String),
    /// Index is locked for writes by an admin operation.
    IndexLocked(String, String),
    /// Index id is not registered for the schema.
    IndexNotFound(String, String),
    /// Tag/edge schema was dropped or never existed.
    SchemaNotFound(String, String),
    /// Propagated unchanged from the embedded KV engine.
    KVEngine(String, String),
    /// Replicated append did not complete within the caller's deadline.
    TimedOut(String, String),
    /// Binary input is malformed.
    DecodeFail(String, String),
    /// Cbor encode/decode failure.
    FailCbor(String, String),
    /// Invalid constructor or request parameter.
    InvalidInput(String, String),
    /// Inter-thread-communication failure.
    IPCFail(String, String),
    /// Thread spawn/join failure.
    ThreadFail(String, String),
    /// Supposedly un-reachable situation.
    Fatal(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;

        match self {
            KeyNotFound(p, m) => write!(f, "KeyNotFound:{} {}", p, m),
            ConcurrentModify(p, m) => write!(f, "ConcurrentModify:{} {}", p, m),
            LeaderChanged(p, m) => write!(f, "LeaderChanged:{} {}", p, m),
            FilteredOut(p, m) => write!(f, "FilteredOut:{} {}", p, m),
            IllegalData(p, m) => write!(f, "IllegalData:{} {}", p, m),
            NoDefaultAndNotNullable(p, m) => {
                write!(f, "NoDefaultAndNotNullable:{} {}", p, m)
            }
            InvalidFieldValue(p, m) => write!(f, "InvalidFieldValue:{} {}", p, m),
            InvalidDefault(p, m) => write!(f, "InvalidDefault:{} {}", p, m),
            ReadPropFailed(p, m) => write!(f, "ReadPropFailed:{} {}", p, m),
            IndexLocked(p, m) => write!(f, "IndexLocked:{} {}", p, m),
            IndexNotFound(p, m) => write!(f, "IndexNotFound:{} {}", p, m),
            SchemaNotFound(p, m) => write!(f, "SchemaNotFound:{} {}", p, m),
            KVEngine(p, m) => write!(f, "KVEngine:{} {}", p, m),
            TimedOut(p, m) => write!(f, "TimedOut:{} {}", p, m),
            DecodeFail(p, m) => write!(f, "DecodeFail:{} {}", p, m),
            FailCbor(p, m) => write!(f, "FailCbor:{} {}", p, m),
            InvalidInput(p, m) => write!(f, "InvalidInput:{} {}", p, m),
            IPCFail(p, m) => write!(f, "IPCFail:{} {}", p, m),
            ThreadFail(p, m) => write!(f, "ThreadFail:{} {}", p, m),
            Fatal(p, m) => write!(f, "Fatal:{} {}", p, m),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Strip the call-site prefix, return the variant's message.
    pub fn to_message(&self) -> String {
        use Error::*;

        match self {
            KeyNotFound(_, m) | ConcurrentModify(_, m) | LeaderChanged(_, m) => m,
            FilteredOut(_, m) | IllegalData(_, m) => m,
            NoDefaultAndNotNullable(_, m) | InvalidFieldValue(_, m) => m,
            InvalidDefault(_, m) | ReadPropFailed(_, m) => m,
            IndexLocked(_, m) | IndexNotFound(_, m) | SchemaNotFound(_, m) => m,
            KVEngine(_, m) | TimedOut(_, m) => m,
            DecodeFail(_, m) | FailCbor(_, m) | InvalidInput(_, m) => m,
            IPCFail(_, m) | ThreadFail(_, m) | Fatal(_, m) => m,
        }
        .to_string()
    }
}

/// Construct [Error] values, tagged with the call-site.
///
/// ```ignore
/// err_at!(KeyNotFound, msg: "vertex {:?}", vid);       // from format args
/// err_at!(KVEngine, store.get(space, part, key));      // from a Result
/// err_at!(IPCFail, rx.recv(), "part-{}", part);        // Result + context
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err($crate::Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}
