//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt;

/// A convenience wrapper around `Result` for `netconfd::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// NETCONF error-tag taxonomy (RFC 6241, Appendix A).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    RollbackFailed,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    MalformedMessage,
}

/// NETCONF error-type: the protocol layer where the error occurred.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

/// NETCONF error-severity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorSeverity {
    Error,
    Warning,
}

/// Structured engine error carrying the RFC 6241 rpc-error fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    pub tag: ErrorTag,
    pub etype: ErrorType,
    pub severity: ErrorSeverity,
    pub msg: Option<String>,
    pub path: Option<String>,
    pub apptag: Option<String>,
    pub info: Option<String>,
}

// ===== impl ErrorTag =====

impl ErrorTag {
    /// The wire representation of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::InUse => "in-use",
            ErrorTag::InvalidValue => "invalid-value",
            ErrorTag::TooBig => "too-big",
            ErrorTag::MissingAttribute => "missing-attribute",
            ErrorTag::BadAttribute => "bad-attribute",
            ErrorTag::UnknownAttribute => "unknown-attribute",
            ErrorTag::MissingElement => "missing-element",
            ErrorTag::BadElement => "bad-element",
            ErrorTag::UnknownElement => "unknown-element",
            ErrorTag::UnknownNamespace => "unknown-namespace",
            ErrorTag::AccessDenied => "access-denied",
            ErrorTag::LockDenied => "lock-denied",
            ErrorTag::ResourceDenied => "resource-denied",
            ErrorTag::RollbackFailed => "rollback-failed",
            ErrorTag::DataExists => "data-exists",
            ErrorTag::DataMissing => "data-missing",
            ErrorTag::OperationNotSupported => "operation-not-supported",
            ErrorTag::OperationFailed => "operation-failed",
            ErrorTag::MalformedMessage => "malformed-message",
        }
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl ErrorType =====

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Transport => "transport",
            ErrorType::Rpc => "rpc",
            ErrorType::Protocol => "protocol",
            ErrorType::Application => "application",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl ErrorSeverity =====

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Error => "error",
            ErrorSeverity::Warning => "warning",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl Error =====

impl Error {
    /// Create a new application-level error with the given tag and message.
    pub fn new(tag: ErrorTag, msg: impl Into<String>) -> Error {
        Error {
            tag,
            etype: ErrorType::Application,
            severity: ErrorSeverity::Error,
            msg: Some(msg.into()),
            path: None,
            apptag: None,
            info: None,
        }
    }

    /// Create a new protocol-level error with the given tag and message.
    pub fn protocol(tag: ErrorTag, msg: impl Into<String>) -> Error {
        Error {
            etype: ErrorType::Protocol,
            ..Error::new(tag, msg)
        }
    }

    /// Create a new rpc-layer error with the given tag and message.
    pub fn rpc(tag: ErrorTag, msg: impl Into<String>) -> Error {
        Error {
            etype: ErrorType::Rpc,
            ..Error::new(tag, msg)
        }
    }

    /// Attach the instance path of the offending node.
    pub fn with_path(mut self, path: impl Into<String>) -> Error {
        self.path = Some(path.into());
        self
    }

    /// Attach an application tag (e.g. a YANG `error-app-tag`).
    pub fn with_apptag(mut self, apptag: impl Into<String>) -> Error {
        self.apptag = Some(apptag.into());
        self
    }

    /// Attach additional error-info content (e.g. the lock holder session).
    pub fn with_info(mut self, info: impl Into<String>) -> Error {
        self.info = Some(info.into());
        self
    }
}

impl fmt::Display for Error {
    // Print only the base error message by default.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.msg {
            Some(msg) => write!(f, "{}", msg),
            None => write!(f, "{}", self.tag),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_wire_names() {
        assert_eq!(ErrorTag::LockDenied.as_str(), "lock-denied");
        assert_eq!(
            ErrorTag::OperationNotSupported.as_str(),
            "operation-not-supported"
        );
    }

    #[test]
    fn builder_fields() {
        let err = Error::protocol(ErrorTag::LockDenied, "lock held")
            .with_path("/nc:running")
            .with_info("42");
        assert_eq!(err.etype, ErrorType::Protocol);
        assert_eq!(err.path.as_deref(), Some("/nc:running"));
        assert_eq!(err.info.as_deref(), Some("42"));
        assert_eq!(err.to_string(), "lock held");
    }
}
