//! Error types for prefix management

use thiserror::Error;

/// Result type for IPAM operations
pub type Result<T> = std::result::Result<T, Error>;

/// IPAM engine errors
#[derive(Debug, Clone, Error)]
pub enum Error {
    // CIDR errors
    #[error("Malformed CIDR: {0}")]
    MalformedCidr(String),

    #[error("Invalid prefix length: {0}")]
    InvalidPrefixLength(String),

    #[error("Range {cidr} is too small to reserve {reserved} address(es) plus a host")]
    RangeTooSmall { cidr: String, reserved: u32 },

    // Allocation errors
    #[error("No free /{prefix_len} prefix left in {parent}")]
    InsufficientSpace { parent: String, prefix_len: u8 },

    #[error("Prefix {cidr} overlaps allocated prefix {existing}")]
    DuplicateRange { cidr: String, existing: String },

    #[error("Prefix {0} still has allocated children")]
    PrefixInUse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IP block {block} is not ready (status: {status})")]
    BlockNotReady { block: String, status: String },

    // Lock errors
    #[error("Lock contention on resource {0}")]
    LockContention(String),

    // Backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockContention(_))
    }
}

impl From<ipnet::PrefixLenError> for Error {
    fn from(e: ipnet::PrefixLenError) -> Self {
        Error::MalformedCidr(e.to_string())
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Self {
        Error::MalformedCidr(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}
