//! Error types for hub operations

use thiserror::Error;

/// Result type for directory, session and settings actions
pub type HubResult<T> = Result<T, HubError>;

/// Errors surfaced at the action boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// No resolved identity
    #[error("User not authenticated")]
    NotAuthenticated,

    /// Hub is not among the loaded hubs
    #[error("Hub not found: {0}")]
    HubNotFound(String),

    #[error("Member not found: {0}")]
    MemberNotFound(String),

    #[error("Invitation not found: {0}")]
    InvitationNotFound(String),

    #[error("Invitation has expired")]
    InvitationExpired,

    #[error("{0} is already a member of this hub")]
    AlreadyMember(String),

    #[error("An invitation for {0} is already pending")]
    DuplicateInvitation(String),

    /// Input rejected before any network call
    #[error("{0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Backend rejection, message kept verbatim
    #[error("{0}")]
    Remote(String),

    /// Transport or other unexpected failure
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Machine-readable reason attached to a backend rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    /// Unique (hub, user) membership violated
    AlreadyMember,
    /// Open (hub, email) invitation already exists
    DuplicateInvitation,
    /// Invitation past its expiry
    InvitationExpired,
    /// Check constraint or business rule failed
    Constraint,
}

/// Errors reported by a `RemoteGateway`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Not authenticated")]
    Unauthorized,

    /// Row-level authorization denied the request
    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{message}")]
    Rejected { code: RejectCode, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn rejected(code: RejectCode, message: impl Into<String>) -> Self {
        GatewayError::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Convert to a `HubError`, reporting a missing row as `missing`
    pub fn with_missing(self, missing: HubError) -> HubError {
        match self {
            GatewayError::NotFound(_) => missing,
            other => other.into(),
        }
    }
}

impl From<GatewayError> for HubError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized => HubError::NotAuthenticated,
            GatewayError::Forbidden(msg) => HubError::PermissionDenied(msg),
            GatewayError::NotFound(what) => HubError::Remote(format!("{} not found", what)),
            GatewayError::Rejected { code, message } => match code {
                RejectCode::AlreadyMember => HubError::AlreadyMember(message),
                RejectCode::DuplicateInvitation => HubError::DuplicateInvitation(message),
                RejectCode::InvitationExpired => HubError::InvitationExpired,
                RejectCode::Constraint => HubError::Remote(message),
            },
            GatewayError::Transport(msg) => HubError::Unexpected(msg),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Transport(format!("malformed payload: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_codes_map_to_hub_errors() {
        let err: HubError =
            GatewayError::rejected(RejectCode::DuplicateInvitation, "m@example.com").into();
        assert_eq!(err, HubError::DuplicateInvitation("m@example.com".to_string()));

        let err: HubError = GatewayError::rejected(RejectCode::AlreadyMember, "m@example.com").into();
        assert!(matches!(err, HubError::AlreadyMember(_)));

        let err: HubError =
            GatewayError::rejected(RejectCode::Constraint, "value too long").into();
        assert_eq!(err.to_string(), "value too long");
    }

    #[test]
    fn test_missing_rows_take_the_callers_error() {
        let err = GatewayError::NotFound("Member".to_string())
            .with_missing(HubError::MemberNotFound("m-1".to_string()));
        assert_eq!(err, HubError::MemberNotFound("m-1".to_string()));

        let err = GatewayError::Unauthorized.with_missing(HubError::MemberNotFound("m-1".into()));
        assert_eq!(err, HubError::NotAuthenticated);
    }

    #[test]
    fn test_transport_errors_are_normalised() {
        let err: HubError = GatewayError::Transport("connection reset".to_string()).into();
        assert!(matches!(err, HubError::Unexpected(_)));
        assert_eq!(GatewayError::Unauthorized.to_string(), "Not authenticated");
        assert_eq!(HubError::from(GatewayError::Unauthorized), HubError::NotAuthenticated);
    }
}
