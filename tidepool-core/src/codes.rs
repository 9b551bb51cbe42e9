//! Typed backend error codes and their categories.
//!
//! Every code the harness and its workloads care about is a variant of
//! [`ErrorCode`]. Classification (is this a network error, a stale routing
//! error, ...) is a table lookup returning [`ErrorCategory`] flags, so a
//! [`crate::BackendError`] resolves its categories once when it is built.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

bitflags! {
    /// Classification flags attached to an [`ErrorCode`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ErrorCategory: u16 {
        /// Host unreachable, timed out or socket failure.
        const NETWORK = 1 << 0;
        /// Operation was interrupted (killed, shutdown, state change, time limit).
        const INTERRUPTION = 1 << 1;
        /// Node is not (or is no longer) primary.
        const NOT_PRIMARY = 1 << 2;
        /// Routing metadata held by the caller is stale.
        const STALE_SHARDING = 1 << 3;
        /// Write concern could not be satisfied.
        const WRITE_CONCERN = 1 << 4;
        /// Node is shutting down.
        const SHUTDOWN = 1 << 5;
        /// Malformed message that closes the connection.
        const CONNECTION_FATAL_MESSAGE_PARSE = 1 << 6;
        /// Operation exceeded its time limit.
        const EXCEEDED_TIME_LIMIT = 1 << 7;
    }
}

macro_rules! error_codes {
    ($($name:ident = $value:literal),+ $(,)?) => {
        /// Error codes returned by the backend.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum ErrorCode {
            $(
                #[allow(missing_docs)]
                $name,
            )+
        }

        impl ErrorCode {
            /// Every known code, in ascending declaration order.
            pub const ALL: &'static [ErrorCode] = &[$(ErrorCode::$name),+];

            /// Numeric wire value of this code.
            pub const fn value(self) -> i32 {
                match self {
                    $(ErrorCode::$name => $value,)+
                }
            }

            /// Symbolic name of this code.
            pub const fn name(self) -> &'static str {
                match self {
                    $(ErrorCode::$name => stringify!($name),)+
                }
            }

            /// Look up a code by its numeric value.
            pub fn from_i32(value: i32) -> Option<ErrorCode> {
                match value {
                    $($value => Some(ErrorCode::$name),)+
                    _ => None,
                }
            }
        }

        impl FromStr for ErrorCode {
            type Err = UnknownErrorCode;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($name) => Ok(ErrorCode::$name),)+
                    other => Err(UnknownErrorCode(other.to_string())),
                }
            }
        }
    };
}

error_codes! {
    Ok = 0,
    InternalError = 1,
    BadValue = 2,
    NoSuchKey = 4,
    HostUnreachable = 6,
    HostNotFound = 7,
    UnknownError = 8,
    FailedToParse = 9,
    Unauthorized = 13,
    TypeMismatch = 14,
    IllegalOperation = 20,
    LockTimeout = 24,
    NamespaceNotFound = 26,
    IndexNotFound = 27,
    CursorNotFound = 43,
    LockBusy = 46,
    NamespaceExists = 48,
    ExceededTimeLimit = 50,
    CommandNotFound = 59,
    StaleShardVersion = 63,
    WriteConcernFailed = 64,
    InvalidOptions = 72,
    WriteConcernLegacyOK = 75,
    UnknownReplWriteConcern = 79,
    NetworkTimeout = 89,
    ShutdownInProgress = 91,
    OperationFailed = 96,
    CannotSatisfyWriteConcern = 100,
    WriteConflict = 112,
    ConflictingOperationInProgress = 117,
    StaleEpoch = 150,
    PrimarySteppedDown = 189,
    NetworkInterfaceExceededTimeLimit = 202,
    NoSuchSession = 206,
    DatabaseDropPending = 215,
    IllegalOpMsgFlag = 223,
    TransactionTooOld = 225,
    TooManyDocumentSequences = 233,
    SocketException = 9001,
    NotMaster = 10107,
    DuplicateKey = 11000,
    InterruptedAtShutdown = 11600,
    Interrupted = 11601,
    InterruptedDueToReplStateChange = 11602,
    StaleConfig = 13388,
    NotMasterNoSlaveOk = 13435,
    NotMasterOrSecondary = 13436,
}

impl ErrorCode {
    /// Category flags for this code.
    pub const fn categories(self) -> ErrorCategory {
        match self {
            ErrorCode::HostUnreachable
            | ErrorCode::HostNotFound
            | ErrorCode::NetworkTimeout
            | ErrorCode::SocketException => ErrorCategory::NETWORK,
            ErrorCode::Interrupted => ErrorCategory::INTERRUPTION,
            ErrorCode::InterruptedAtShutdown => {
                ErrorCategory::INTERRUPTION.union(ErrorCategory::SHUTDOWN)
            }
            ErrorCode::InterruptedDueToReplStateChange => {
                ErrorCategory::INTERRUPTION.union(ErrorCategory::NOT_PRIMARY)
            }
            ErrorCode::ExceededTimeLimit => {
                ErrorCategory::INTERRUPTION.union(ErrorCategory::EXCEEDED_TIME_LIMIT)
            }
            ErrorCode::NetworkInterfaceExceededTimeLimit => ErrorCategory::EXCEEDED_TIME_LIMIT,
            ErrorCode::NotMaster
            | ErrorCode::NotMasterNoSlaveOk
            | ErrorCode::NotMasterOrSecondary
            | ErrorCode::PrimarySteppedDown => ErrorCategory::NOT_PRIMARY,
            ErrorCode::StaleConfig | ErrorCode::StaleShardVersion | ErrorCode::StaleEpoch => {
                ErrorCategory::STALE_SHARDING
            }
            ErrorCode::WriteConcernFailed
            | ErrorCode::WriteConcernLegacyOK
            | ErrorCode::UnknownReplWriteConcern
            | ErrorCode::CannotSatisfyWriteConcern => ErrorCategory::WRITE_CONCERN,
            ErrorCode::ShutdownInProgress => ErrorCategory::SHUTDOWN,
            ErrorCode::IllegalOpMsgFlag | ErrorCode::TooManyDocumentSequences => {
                ErrorCategory::CONNECTION_FATAL_MESSAGE_PARSE
            }
            _ => ErrorCategory::empty(),
        }
    }

    /// True for host unreachable / not found, network timeouts and socket errors.
    pub fn is_network_error(self) -> bool {
        self.categories().contains(ErrorCategory::NETWORK)
    }

    /// True for interruptions, including time limits and shutdown.
    pub fn is_interruption(self) -> bool {
        self.categories().contains(ErrorCategory::INTERRUPTION)
    }

    /// True when the target node is not primary.
    pub fn is_not_primary_error(self) -> bool {
        self.categories().contains(ErrorCategory::NOT_PRIMARY)
    }

    /// True when the caller's routing metadata is stale.
    pub fn is_stale_sharding_error(self) -> bool {
        self.categories().contains(ErrorCategory::STALE_SHARDING)
    }

    /// True for write concern failures.
    pub fn is_write_concern_error(self) -> bool {
        self.categories().contains(ErrorCategory::WRITE_CONCERN)
    }

    /// True when the node is shutting down.
    pub fn is_shutdown_error(self) -> bool {
        self.categories().contains(ErrorCategory::SHUTDOWN)
    }

    /// True for message parse errors that close the connection.
    pub fn is_connection_fatal_message_parse_error(self) -> bool {
        self.categories()
            .contains(ErrorCategory::CONNECTION_FATAL_MESSAGE_PARSE)
    }

    /// True when an operation ran out of time.
    pub fn is_exceeded_time_limit_error(self) -> bool {
        self.categories()
            .contains(ErrorCategory::EXCEEDED_TIME_LIMIT)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.value()
    }
}

/// Returned when parsing a name that is not in the code table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown error code name: {0}")]
pub struct UnknownErrorCode(pub String);
