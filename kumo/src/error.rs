// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;

use tokio_tungstenite::tungstenite;

/// Represent the types of errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Error occurred while performing I/O.
    IoError,

    /// Packet encode error.
    EncodeError,

    /// Packet decode error. The peer sent a malformed packet; the
    /// connection is dropped.
    DecodeError,

    /// Socket stream error.
    SocketError,

    /// Cert files error.
    CertError,

    /// The peer violated the protocol (e.g. an unknown topic alias or
    /// an invalid acknowledgement reason code).
    ProtocolError,

    /// The broker refused the connection; carries the CONNACK reason
    /// code.
    ConnectError(u8),

    /// Payload exceeds 268,435,455 bytes.
    PayloadTooLarge,

    /// All 65,535 packet identifiers are in flight. The application is
    /// publishing faster than the broker acknowledges.
    IdentifierExhausted,

    /// Bad argument or malformed option value.
    ConfigError,

    /// Operation is not valid in the current connection state.
    InvalidClientStatus,
}

/// Error type of this library.
#[derive(Clone, Debug)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub const fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    /// Build the error for a refused CONNACK, with the human readable
    /// message looked up from the static table.
    #[must_use]
    pub fn connect_error(code: u8) -> Self {
        Self::from_string(
            ErrorKind::ConnectError(code),
            format!("code {} ({})", code, connect_error_message(code)),
        )
    }

    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IoError {err}"))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Self::from_string(ErrorKind::SocketError, format!("Websocket error: {err}"))
    }
}

impl From<tokio_rustls::rustls::Error> for Error {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::from_string(ErrorKind::CertError, format!("Tls error: {err}"))
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        Self::from_string(ErrorKind::DecodeError, format!("{err:?}"))
    }
}

/// Human readable description of a refused CONNACK.
///
/// Covers both the 3.1.1 return codes (1..=5) and the 5.0 reason codes
/// (0x80 and up).
#[must_use]
pub fn connect_error_message(code: u8) -> &'static str {
    match code {
        1 => "Connection Refused: unacceptable protocol version",
        2 => "Connection Refused: identifier rejected",
        3 => "Connection Refused: broker unavailable",
        4 => "Connection Refused: bad user name or password",
        5 => "Connection Refused: not authorised",
        128 => "Connection Refused: Unspecified error",
        129 => "Connection Refused: Malformed Packet",
        130 => "Connection Refused: Protocol Error",
        131 => "Connection Refused: Implementation specific error",
        132 => "Connection Refused: Unsupported Protocol Version",
        133 => "Connection Refused: Client Identifier not valid",
        134 => "Connection Refused: Bad User Name or Password",
        135 => "Connection Refused: Not authorized",
        136 => "Connection Refused: Server unavailable",
        137 => "Connection Refused: Server busy",
        138 => "Connection Refused: Banned",
        140 => "Connection Refused: Bad authentication method",
        144 => "Connection Refused: Topic Name invalid",
        149 => "Connection Refused: Packet too large",
        151 => "Connection Refused: Quota exceeded",
        153 => "Connection Refused: Payload format invalid",
        154 => "Connection Refused: Retain not supported",
        155 => "Connection Refused: QoS not supported",
        156 => "Connection Refused: Use another server",
        157 => "Connection Refused: Server moved",
        159 => "Connection Refused: Connection rate exceeded",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error() {
        let err = Error::connect_error(135);
        assert_eq!(err.kind(), &ErrorKind::ConnectError(135));
        assert_eq!(err.message(), "code 135 (Connection Refused: Not authorized)");
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(connect_error_message(42), "Unknown error");
    }
}
