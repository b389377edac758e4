//! Error types for certificate checks and for the batch pipeline.
//!
//! Two families live here. [`CheckError`] describes why a single host failed
//! its check; it never leaves the checker except as the description column of
//! a `BAD` row. [`PipelineError`] is fatal for the whole run: the input could
//! not be read, the output could not be written, or the run was misconfigured.

use std::fmt;
use std::io;

/// Reason a single host check ended with a `BAD` status.
///
/// The `Display` output is written verbatim into the `Desc` column.
#[derive(Debug)]
pub enum CheckError {
    /// The task could not be parsed as a URL
    Parse {
        /// The underlying URL parser error
        source: url::ParseError,
    },

    /// The URL parsed but carried no host component
    HostNotSet,

    /// DNS resolution or the TCP connection failed
    Dial {
        /// The address (host:port) that was dialed
        address: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// The TLS handshake failed or ran past the deadline
    Handshake {
        /// Details about why the handshake failed
        details: String,
    },

    /// The peer completed the handshake without presenting a certificate
    CertNotFound,

    /// The leaf certificate's notAfter could not be converted to a timestamp
    CertificateTime {
        /// Description of what went wrong
        reason: String,
    },

    /// The leaf certificate's notAfter is in the past
    ValidityExpired,
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { source } => write!(f, "Parse URL: {}", source),
            Self::HostNotSet => write!(f, "host not set"),
            Self::Dial { address, source } => write!(f, "Dial error: {}: {}", address, source),
            Self::Handshake { details } => write!(f, "Handshake error: {}", details),
            Self::CertNotFound => write!(f, "cert not found"),
            Self::CertificateTime { reason } => write!(f, "cert validity unreadable: {}", reason),
            Self::ValidityExpired => write!(f, "validity expired"),
        }
    }
}

impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse { source } => Some(source),
            Self::Dial { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<url::ParseError> for CheckError {
    fn from(e: url::ParseError) -> Self {
        Self::Parse { source: e }
    }
}

impl<S: fmt::Debug> From<openssl::ssl::HandshakeError<S>> for CheckError {
    fn from(e: openssl::ssl::HandshakeError<S>) -> Self {
        let details = match &e {
            openssl::ssl::HandshakeError::Failure(mid) if is_timeout(mid.error().io_error()) => {
                "deadline exceeded".to_string()
            }
            openssl::ssl::HandshakeError::WouldBlock(_) => "deadline exceeded".to_string(),
            _ => e.to_string(),
        };
        Self::Handshake { details }
    }
}

impl From<openssl::error::ErrorStack> for CheckError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::Handshake {
            details: e.to_string(),
        }
    }
}

/// Blocking sockets with a read timeout report `WouldBlock` on Unix and
/// `TimedOut` on Windows.
pub(crate) fn is_timeout(err: Option<&io::Error>) -> bool {
    matches!(
        err.map(io::Error::kind),
        Some(io::ErrorKind::WouldBlock) | Some(io::ErrorKind::TimedOut)
    )
}

/// Fatal error that aborts a batch run.
#[derive(Debug)]
pub enum PipelineError {
    /// Reading the task stream failed before end of input
    Input {
        /// The underlying I/O error
        source: io::Error,
    },

    /// Writing or flushing the result table failed
    Output {
        /// The underlying CSV writer error
        source: csv::Error,
    },

    /// The pipeline configuration is unusable
    InvalidConfig {
        /// Why the configuration was rejected
        reason: String,
    },

    /// The shared TLS client context could not be built
    TlsSetup {
        /// The underlying OpenSSL error
        source: openssl::error::ErrorStack,
    },

    /// A worker or the sink thread panicked
    WorkerPanicked {
        /// Which thread went down
        name: String,
    },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input { source } => write!(f, "Cannot read input: {}", source),
            Self::Output { source } => write!(f, "Cannot write output: {}", source),
            Self::InvalidConfig { reason } => write!(f, "Invalid pipeline configuration: {}", reason),
            Self::TlsSetup { source } => write!(f, "Cannot set up TLS client: {}", source),
            Self::WorkerPanicked { name } => write!(f, "Thread {} panicked", name),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Input { source } => Some(source),
            Self::Output { source } => Some(source),
            Self::TlsSetup { source } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for PipelineError {
    fn from(e: io::Error) -> Self {
        Self::Input { source: e }
    }
}

impl From<csv::Error> for PipelineError {
    fn from(e: csv::Error) -> Self {
        Self::Output { source: e }
    }
}
