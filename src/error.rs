//! Error types for salttun

use thiserror::Error;

/// Main error type for salttun
#[derive(Error, Debug)]
pub enum SaltTunError {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Cryptographic errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Network errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Tunnel errors
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// System I/O errors
    #[error("System error: {0}")]
    System(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid config format at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid hex key: {field}")]
    InvalidKey { field: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unknown protocol: {name}")]
    UnknownProtocol { name: String },

    #[error("Address families of LOCAL_ADDRESS and REMOTE_ADDRESS do not match")]
    AddressFamilyMismatch,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cryptographic operation errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    Encryption,

    #[error("Decryption failed: invalid ciphertext or authentication tag")]
    Decryption,

    #[error("System random source unavailable: {reason}")]
    EntropyUnavailable { reason: String },
}

/// Per-packet protocol errors
///
/// These never terminate the session: the packet is logged and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Short {kind} packet: expected at least {expected} bytes, got {got}")]
    ShortPacket {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Duplicate data packet: counter {counter}")]
    DuplicateCounter { counter: u32 },

    #[error("Late data packet: counter {counter} <= {floor}")]
    LateCounter { counter: u32, floor: u32 },

    #[error("Late control packet: counter {counter} <= {last}")]
    LateControl { counter: u64, last: u64 },

    #[error("Timestamp going back, ignoring packet")]
    TimestampRegression,

    #[error("Decryption of {kind} packet failed")]
    Decryption { kind: &'static str },

    #[error("No decoder for key pair (remote {remote_key_id}, local {local_key_id})")]
    NoDecoder { remote_key_id: u8, local_key_id: u8 },

    #[error("Nonce counter exhausted, dropping packet")]
    NonceExhausted,
}

/// Network-level errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("DNS resolution failed for {host}")]
    DnsResolutionFailed { host: String },

    #[error("Socket bind failed on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Socket connect failed to {addr}: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("Socket unusable: {reason}")]
    SocketFailed { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tunnel device errors
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Failed to create TUN device: {reason}")]
    CreateFailed { reason: String },

    #[error("TUN read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("TUN write failed: {reason}")]
    WriteFailed { reason: String },

    #[error("Up script failed: {reason}")]
    UpScriptFailed { reason: String },

    #[error("Insufficient privileges: {message}")]
    InsufficientPrivileges { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SaltTunError {
    /// Get a user-friendly error message with suggested action
    pub fn user_message(&self) -> String {
        match self {
            Self::Tunnel(TunnelError::InsufficientPrivileges { .. }) => {
                #[cfg(target_os = "linux")]
                return "Insufficient privileges. Run with sudo or grant CAP_NET_ADMIN:\n  \
                        sudo setcap cap_net_admin=eip ./salttun"
                    .to_string();
                #[cfg(not(target_os = "linux"))]
                return "Insufficient privileges. Run with sudo.".to_string();
            }

            Self::Config(ConfigError::FileNotFound { path }) => {
                format!(
                    "Config file not found: {}\n  Check the path and try again.",
                    path
                )
            }

            Self::Config(ConfigError::InvalidKey { field }) => {
                format!(
                    "Invalid {} in config. Expected 32-byte key as 64 hex characters.",
                    field
                )
            }

            Self::Config(ConfigError::UnknownProtocol { name }) => {
                format!(
                    "Unknown PROTOCOL specified: {}\n  \
                    Supported protocols: raw, nacl0, nacltai, salty.",
                    name
                )
            }

            Self::Crypto(CryptoError::EntropyUnavailable { .. }) => {
                "The system random source is unavailable; refusing to run without fresh keys."
                    .to_string()
            }

            _ => format!("{}", self),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Tunnel(TunnelError::InsufficientPrivileges { .. }) => 2,
            Self::Network(_) => 3,
            Self::Protocol(_) => 4,
            Self::Crypto(_) => 5,
            Self::Tunnel(_) => 6,
            Self::System(_) => 7,
        }
    }
}

/// Result type alias for salttun operations
pub type Result<T> = std::result::Result<T, SaltTunError>;
