//! The error and result types returned by all operations in this crate.

use std::{collections::HashSet, fmt, sync::Arc};

use serde::Deserialize;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Server response codes that indicate the responding member is in the process of stepping down
/// or recovering and should be treated as momentarily unusable rather than permanently failed.
pub const RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];

/// Server response codes indicating the responding member is not (or no longer) the writable
/// primary.
pub const NOTWRITABLEPRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];

/// Server response codes indicating the node is shutting down.
pub const SHUTTING_DOWN_CODES: [i32; 2] = [11600, 91];

/// Error codes that should be treated as retryable for read operations, in addition to network
/// errors.
pub const RETRYABLE_READ_CODES: [i32; 4] = [11600, 11602, 10107, 13435];

/// Error codes that should be treated as retryable for write operations, in addition to network
/// errors.
pub const RETRYABLE_WRITE_CODES: [i32; 9] =
    [11600, 11602, 10107, 13435, 13436, 189, 91, 7, 6];

/// The error label applied to writes that may be safely retried.
pub const RETRYABLE_WRITE_ERROR: &str = "RetryableWriteError";

/// The error label applied to transaction errors that may be safely retried from the start.
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// The error label applied when a transaction's commit outcome is unknown after a retryable
/// error.
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

/// The top-level error type returned by this crate. Carries a classified [`ErrorKind`] plus any
/// error labels accumulated while the error propagated up through the topology engine.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Error {
    kind: Box<ErrorKind>,
    labels: HashSet<String>,
    /// The max wire version of the server that produced this error, if known. Used to decide
    /// whether the `RetryableWriteError` label applies (see `should_add_retryable_write_label`).
    pub(crate) wire_version: Option<i32>,
    source: Option<Box<Error>>,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: impl IntoIterator<Item = String>) -> Self {
        Self {
            kind: Box::new(kind),
            labels: labels.into_iter().collect(),
            wire_version: None,
            source: None,
        }
    }

    /// The classified kind of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub(crate) fn with_source(mut self, source: Error) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        ErrorKind::Network {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn network_timeout() -> Self {
        ErrorKind::NetworkTimeout.into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        ErrorKind::Configuration {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn authentication_error(mechanism: &str, reason: &str) -> Self {
        ErrorKind::Authentication {
            message: format!("{} failure: {}", mechanism, reason),
        }
        .into()
    }

    pub(crate) fn unknown_authentication_error(mechanism: &str) -> Self {
        Self::authentication_error(mechanism, "internal error")
    }

    pub(crate) fn invalid_authentication_response(mechanism: &str) -> Self {
        Self::authentication_error(mechanism, "invalid server response")
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn server_selection(message: impl Into<String>) -> Self {
        ErrorKind::ServerSelection {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn incompatible_server(message: impl Into<String>) -> Self {
        ErrorKind::IncompatibleServer {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn dns_resolve(message: impl Into<String>) -> Self {
        ErrorKind::DnsResolve {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_tls_config(message: impl Into<String>) -> Self {
        ErrorKind::InvalidTlsConfig {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn connection_checkout_timeout(address: impl Into<String>) -> Self {
        ErrorKind::ConnectionCheckoutTimeout {
            address: address.into(),
        }
        .into()
    }

    pub(crate) fn command_size_error(size: i64, max: i64) -> Self {
        ErrorKind::CommandSizeError { size, max }.into()
    }

    pub(crate) fn document_size_error(index: usize) -> Self {
        ErrorKind::DocumentSizeError { index }.into()
    }

    /// Returns the error labels attached to this error.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    pub(crate) fn add_label(&mut self, label: impl Into<String>) {
        self.labels.insert(label.into());
    }

    pub(crate) fn contains_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Whether this error, or any source in its chain, represents a network-level failure (as
    /// opposed to a command error reported by the server).
    pub fn is_network_error(&self) -> bool {
        matches!(
            *self.kind,
            ErrorKind::Network { .. } | ErrorKind::NetworkTimeout | ErrorKind::Io(..)
        )
    }

    /// Whether this error represents a timeout specifically (as opposed to e.g. connection
    /// refused).
    pub fn is_network_timeout(&self) -> bool {
        matches!(*self.kind, ErrorKind::NetworkTimeout)
    }

    /// Whether this error represents an authentication failure, e.g. during the handshake that
    /// establishes a pooled connection. Per §4.5, an `AuthError` during initialization resets
    /// every known server to `Unknown` rather than being retried.
    pub fn is_authentication_error(&self) -> bool {
        matches!(*self.kind, ErrorKind::Authentication { .. })
    }

    /// Whether this is a command-level error reported by the server with `ok: 0`.
    pub fn is_command_error(&self) -> bool {
        matches!(*self.kind, ErrorKind::Command(..))
    }

    /// Whether an assembled command exceeded the negotiated `maxMessageSizeBytes`. The
    /// bulk-write dispatcher catches this to halve its current chunk and retry (§4.6); any other
    /// caller should treat it like an ordinary invalid-argument failure.
    pub fn is_command_size_error(&self) -> bool {
        matches!(*self.kind, ErrorKind::CommandSizeError { .. })
    }

    /// The server response `code` for this error, if this error originated as a server command
    /// error.
    pub fn code(&self) -> Option<i32> {
        match *self.kind {
            ErrorKind::Command(ref e) => Some(e.code),
            ErrorKind::Write(WriteFailure::WriteError(ref e)) => Some(e.code),
            ErrorKind::Write(WriteFailure::WriteConcernError(ref e)) => Some(e.code),
            _ => None,
        }
    }

    /// Whether the server reported this error was due to no longer being the writable primary
    /// (i.e. the topology should mark this server's descriptor Unknown and set the stale flag,
    /// per the "NotMasterError" classification).
    pub fn is_not_primary(&self) -> bool {
        self.code()
            .map(|c| NOTWRITABLEPRIMARY_CODES.contains(&c) || RECOVERING_CODES.contains(&c))
            .unwrap_or(false)
    }

    /// Whether the server reported this node is in a recovering state.
    pub fn is_recovering(&self) -> bool {
        self.code()
            .map(|c| RECOVERING_CODES.contains(&c))
            .unwrap_or(false)
    }

    /// Whether the server reported it is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.code()
            .map(|c| SHUTTING_DOWN_CODES.contains(&c))
            .unwrap_or(false)
    }

    pub(crate) fn is_read_retryable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        self.code()
            .map(|c| RETRYABLE_READ_CODES.contains(&c))
            .unwrap_or(false)
    }

    pub(crate) fn is_write_retryable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        self.code()
            .map(|c| RETRYABLE_WRITE_CODES.contains(&c))
            .unwrap_or(false)
    }

    /// Whether this error should carry the `RetryableWriteError` label. Per the wire-version
    /// gate: servers advertising wire version > 8 only signal retryability via error labels they
    /// attach themselves, so the driver only adds the label client-side for network errors;
    /// older servers need the driver to infer it from the error code as well.
    pub(crate) fn should_add_retryable_write_label(&self, max_wire_version: i32) -> bool {
        if max_wire_version > 8 {
            self.is_network_error()
        } else {
            self.is_write_retryable()
        }
    }

    pub(crate) fn should_add_unknown_transaction_commit_result_label(&self) -> bool {
        self.is_network_error() || self.is_network_timeout() || self.code() == Some(50)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind, None)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        ErrorKind::Io(Arc::new(err)).into()
    }
}

impl From<bson::ser::Error> for Error {
    fn from(err: bson::ser::Error) -> Self {
        ErrorKind::BsonSerialization {
            message: err.to_string(),
        }
        .into()
    }
}

impl From<bson::de::Error> for Error {
    fn from(err: bson::de::Error) -> Self {
        ErrorKind::BsonDeserialization {
            message: err.to_string(),
        }
        .into()
    }
}

/// The classification of a failed operation. Kinds that indicate the responding server can no
/// longer be trusted (network, auth, not-primary) are fed back into the topology by the
/// operation-dispatch layer before being surfaced to the caller, per the error classification
/// rules.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The connection string or explicit client configuration was invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// An invalid argument was passed to an API.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// A network-level I/O error occurred while using a [`Link`](crate::cmap::Connection).
    #[error("network error: {message}")]
    Network {
        /// Description of the problem.
        message: String,
    },

    /// A socket operation exceeded its deadline.
    #[error("network timeout")]
    NetworkTimeout,

    /// A lower-level I/O error.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The TLS handshake or configuration failed.
    #[error("TLS error: {message}")]
    InvalidTlsConfig {
        /// Description of the problem.
        message: String,
    },

    /// Authentication failed.
    #[error("{message}")]
    Authentication {
        /// Description of the problem.
        message: String,
    },

    /// No server in the topology was suitable for the requested operation within the selection
    /// timeout.
    #[error("server selection error: {message}")]
    ServerSelection {
        /// Description of the problem.
        message: String,
    },

    /// Every data-bearing server's wire version range is incompatible with this driver's
    /// supported window.
    #[error("incompatible server: {message}")]
    IncompatibleServer {
        /// Description of the problem.
        message: String,
    },

    /// The server returned a response that could not be parsed as expected.
    #[error("invalid server response: {message}")]
    InvalidResponse {
        /// Description of the problem.
        message: String,
    },

    /// DNS-seedlist (SRV) resolution failed.
    #[error("DNS resolution error: {message}")]
    DnsResolve {
        /// Description of the problem.
        message: String,
    },

    /// A document failed to serialize to BSON.
    #[error("an error occurred serializing a document: {message}")]
    BsonSerialization {
        /// Description of the problem.
        message: String,
    },

    /// A BSON document failed to deserialize.
    #[error("an error occurred deserializing a document: {message}")]
    BsonDeserialization {
        /// Description of the problem.
        message: String,
    },

    /// The server returned `ok: 0` for a command.
    #[error("{0}")]
    Command(CommandError),

    /// A (non-bulk) write operation failed.
    #[error("{0}")]
    Write(WriteFailure),

    /// A bulk write operation partially or fully failed.
    #[error("bulk write error: {0:?}")]
    BulkWrite(BulkWriteFailure),

    /// An internal invariant was violated; please file a bug report if this is encountered.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the problem.
        message: String,
    },

    /// A connection checkout did not complete before `waitQueueTimeoutMS` elapsed.
    #[error("timed out while checking out a connection to {address}")]
    ConnectionCheckoutTimeout {
        /// The server whose pool the checkout was waiting on.
        address: String,
    },

    /// An assembled command exceeded the negotiated `maxMessageSizeBytes`. Surfaced to callers
    /// directly for a non-bulk command; caught internally by the bulk-write dispatcher, which
    /// halves its current chunk and retries (see [`crate::bulk_write`]).
    #[error("command of {size} bytes exceeds the negotiated maximum message size of {max} bytes")]
    CommandSizeError {
        /// The assembled command's estimated size, in bytes.
        size: i64,
        /// The negotiated ceiling it exceeded.
        max: i64,
    },

    /// A single sub-operation of a bulk write exceeds the wire-size limit on its own, so no
    /// amount of chunk-splitting can make it fit.
    #[error("bulk write sub-operation at index {index} exceeds the wire-size limit")]
    DocumentSizeError {
        /// The sub-operation's position in the caller's original (unsplit) model list.
        index: usize,
    },
}

/// A server-reported command error (the body of an `ok: 0` reply).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CommandError {
    /// The numeric error code.
    pub code: i32,
    /// The string name of the error code.
    #[serde(default, rename = "codeName")]
    pub code_name: String,
    /// The error's message.
    #[serde(rename = "errmsg")]
    pub message: String,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error code {} ({}): {}",
            self.code, self.code_name, self.message
        )
    }
}

/// A write-concern error reported alongside (or instead of) a successful write.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct WriteConcernError {
    /// The numeric error code.
    pub code: i32,
    /// The string name of the error code.
    #[serde(default, rename = "codeName")]
    pub code_name: String,
    /// The error's message.
    #[serde(rename = "errmsg")]
    pub message: String,
}

/// A single-document write error.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct WriteError {
    /// The numeric error code.
    pub code: i32,
    /// The string name of the error code, if supplied.
    #[serde(default, rename = "codeName")]
    pub code_name: Option<String>,
    /// The error's message.
    #[serde(rename = "errmsg")]
    pub message: String,
}

/// A write error occurring as part of a bulk write, tagged with the index of the sub-operation
/// that produced it.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct BulkWriteError {
    /// Index into the submitted operations of the sub-operation that failed.
    pub index: usize,
    /// The numeric error code.
    pub code: i32,
    /// The string name of the error code, if supplied.
    #[serde(default, rename = "codeName")]
    pub code_name: Option<String>,
    /// The error's message.
    #[serde(rename = "errmsg")]
    pub message: String,
}

/// The failure outcome of a single (non-bulk) write operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum WriteFailure {
    /// A write concern error with no per-document write error.
    WriteConcernError(WriteConcernError),
    /// A per-document write error.
    WriteError(WriteError),
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteConcernError(e) => write!(f, "write concern error {}: {}", e.code, e.message),
            Self::WriteError(e) => write!(f, "write error {}: {}", e.code, e.message),
        }
    }
}

/// The aggregated failure outcome of a bulk write.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct BulkWriteFailure {
    /// Per-sub-operation write errors, present for any sub-operation that failed.
    pub write_errors: Option<Vec<BulkWriteError>>,
    /// A write concern error, if the server reported one.
    pub write_concern_error: Option<WriteConcernError>,
}
