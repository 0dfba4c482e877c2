//! Error types for IKE negotiation
//!
//! This module defines a unified error type for the Quick Mode and
//! Informational exchanges. Every variant is an internal status; a subset of
//! them is reported to the peer through a Notification payload (see
//! [`crate::ipsec::ikev1::informational::notify_type_for`]).

use std::fmt;

/// Result type for IKE operations
pub type Result<T> = std::result::Result<T, Error>;

/// IKE negotiation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid or malformed payload
    InvalidPayload(String),

    /// Payload appeared more than once
    DuplicatePayload(u8),

    /// Required payload missing from the message
    MissingPayload(u8),

    /// Payload not allowed at this point of the exchange
    UnexpectedPayload(u8),

    /// Message arrived for an exchange that cannot accept it
    UnexpectedMessage,

    /// Unsupported ISAKMP version
    UnsupportedVersion(u8),

    /// Unsupported exchange type
    UnsupportedExchangeType(u8),

    /// Domain of Interpretation is not IPsec
    UnsupportedDoi(u32),

    /// Situation other than SIT_IDENTITY_ONLY
    UnsupportedSituation(u32),

    /// Notification type not handled
    UnsupportedNotify(u16),

    /// Zero or otherwise invalid message ID
    InvalidMsgId(u32),

    /// Header flags not valid for the exchange
    InvalidFlags(u8),

    /// Cookie not set or not matching
    InvalidCookie,

    /// More proposals than allowed
    TooManyProposals,

    /// More transforms than allowed
    TooManyTransforms,

    /// Protocol ID not supported in this context
    InvalidProtocol(u8),

    /// Transform ID not supported
    InvalidTransform(u8),

    /// SPI invalid for the protocol
    InvalidSpi(u32),

    /// Key length not acceptable
    InvalidKeyLength {
        /// Expected length in bits
        expected: u16,
        /// Actual length in bits
        actual: u16,
    },

    /// Attribute type not supported
    UnsupportedAttribute(u16),

    /// Attribute value longer than supported
    AttributeTooLong(u16),

    /// No acceptable proposal found
    NotNegotiable,

    /// Transform attributes do not match the local configuration
    TransformMismatch,

    /// Responder modified a proposal that was offered
    ProposalTampered,

    /// No SA2 item for a selected proposal
    Sa2NotFound,

    /// Security Association not found
    SaNotFound(String),

    /// HASH payload did not verify
    VerifyFailed,

    /// Authentication failed
    AuthenticationFailed(String),

    /// Identification payload invalid or unacceptable
    InvalidId(String),

    /// Keying material not available for this IKE SA
    NoKeymat,

    /// State machine error
    InvalidState(String),

    /// Invalid parameter passed by the caller
    InvalidParameter(String),

    /// Cryptographic operation failed
    CryptoError(String),

    /// Buffer too short for operation
    BufferTooShort {
        /// Required length
        required: usize,
        /// Available length
        available: usize,
    },

    /// Network buffer not available in time
    SendTimeout,

    /// Peer did not complete the exchange in time
    Timeout,

    /// I/O error
    Io(String),

    /// Internal error (should not happen)
    Internal(String),
}

/// Broad classes of [`Error`], used to decide how an exchange reacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Programmer or caller error, never reported to the peer
    Parameter,
    /// Protocol violation in received data
    Protocol,
    /// Negotiation produced no acceptable result
    Negotiation,
    /// Hash or signature check failed
    Authentication,
    /// Allocation or crypto primitive failure
    Resource,
    /// Retryable I/O failure
    Transient,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InvalidParameter(_) | Error::InvalidState(_) | Error::Internal(_) => {
                ErrorClass::Parameter
            }
            Error::NotNegotiable
            | Error::TransformMismatch
            | Error::UnsupportedAttribute(_)
            | Error::InvalidKeyLength { .. } => ErrorClass::Negotiation,
            Error::VerifyFailed | Error::AuthenticationFailed(_) => ErrorClass::Authentication,
            Error::CryptoError(_) | Error::NoKeymat => ErrorClass::Resource,
            Error::SendTimeout | Error::Io(_) => ErrorClass::Transient,
            _ => ErrorClass::Protocol,
        }
    }

    /// Whether the operation may succeed when retried
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Whether a Notification should be sent to the peer for this error
    pub fn is_notifiable(&self) -> bool {
        match self.class() {
            ErrorClass::Parameter | ErrorClass::Resource | ErrorClass::Transient => false,
            _ => crate::ipsec::ikev1::informational::notify_type_for(self).is_some(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPayload(msg) => write!(f, "Invalid IKE payload: {}", msg),
            Error::DuplicatePayload(t) => write!(f, "Duplicate payload of type {}", t),
            Error::MissingPayload(t) => write!(f, "Missing payload of type {}", t),
            Error::UnexpectedPayload(t) => write!(f, "Unexpected payload of type {}", t),
            Error::UnexpectedMessage => write!(f, "Unexpected message for completed exchange"),
            Error::UnsupportedVersion(v) => {
                write!(f, "Unsupported ISAKMP version: 0x{:02x}", v)
            }
            Error::UnsupportedExchangeType(t) => {
                write!(f, "Unsupported exchange type: {}", t)
            }
            Error::UnsupportedDoi(doi) => write!(f, "Unsupported DOI: {}", doi),
            Error::UnsupportedSituation(sit) => write!(f, "Unsupported situation: 0x{:08x}", sit),
            Error::UnsupportedNotify(t) => write!(f, "Unsupported notification type: {}", t),
            Error::InvalidMsgId(id) => write!(f, "Invalid message ID: 0x{:08x}", id),
            Error::InvalidFlags(flags) => write!(f, "Invalid header flags: 0x{:02x}", flags),
            Error::InvalidCookie => write!(f, "Invalid cookie"),
            Error::TooManyProposals => write!(f, "Too many proposals"),
            Error::TooManyTransforms => write!(f, "Too many transforms"),
            Error::InvalidProtocol(p) => write!(f, "Invalid protocol ID: {}", p),
            Error::InvalidTransform(t) => write!(f, "Invalid transform ID: {}", t),
            Error::InvalidSpi(spi) => write!(f, "Invalid SPI: 0x{:08x}", spi),
            Error::InvalidKeyLength { expected, actual } => {
                write!(
                    f,
                    "Invalid key length: expected {} bits, got {}",
                    expected, actual
                )
            }
            Error::UnsupportedAttribute(t) => write!(f, "Unsupported attribute type: {}", t),
            Error::AttributeTooLong(t) => write!(f, "Attribute value too long (type {})", t),
            Error::NotNegotiable => {
                write!(f, "No acceptable proposal found in negotiation")
            }
            Error::TransformMismatch => write!(f, "Transform does not match policy"),
            Error::ProposalTampered => write!(f, "Selected proposal differs from offer"),
            Error::Sa2NotFound => write!(f, "No SA2 item for selected proposal"),
            Error::SaNotFound(id) => write!(f, "Security Association not found: {}", id),
            Error::VerifyFailed => write!(f, "Hash verification failed"),
            Error::AuthenticationFailed(msg) => {
                write!(f, "Authentication failed: {}", msg)
            }
            Error::InvalidId(msg) => write!(f, "Invalid identification: {}", msg),
            Error::NoKeymat => write!(f, "Keying material not available"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            Error::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            Error::BufferTooShort {
                required,
                available,
            } => {
                write!(
                    f,
                    "Buffer too short: need {} bytes, have {}",
                    required, available
                )
            }
            Error::SendTimeout => write!(f, "Timed out waiting for a network buffer"),
            Error::Timeout => write!(f, "Exchange timed out"),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// Convert from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::WouldBlock {
            Error::SendTimeout
        } else {
            Error::Io(err.to_string())
        }
    }
}
