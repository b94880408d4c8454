use keyward_client::IssueError;
use thiserror::Error;

/// Errors from the credential cache.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The issuer could not mint a credential. Nothing was stored.
    #[error("Credential issuance failed for user {principal_id}: {source}")]
    IssuanceFailed {
        principal_id: u64,
        #[source]
        source: IssueError,
    },
}

/// Why a request was forwarded without injected credentials.
///
/// These never reject a request; they are reported through
/// [`AuthOutcome::Unmodified`](crate::AuthOutcome::Unmodified) and the logs.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No verified client identity on the connection")]
    UnverifiedClient,

    #[error("Identity '{claim}' is not mapped to a principal")]
    UnknownIdentity { claim: String },

    #[error(transparent)]
    IssuanceFailed(#[from] CredentialError),

    #[error("Credential for user {principal_id} is not a valid header value")]
    InvalidHeaderValue { principal_id: u64 },
}

impl AuthError {
    /// Short, stable label for metrics and structured logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::UnverifiedClient => "unverified_client",
            Self::UnknownIdentity { .. } => "unknown_identity",
            Self::IssuanceFailed(_) => "issuance_failed",
            Self::InvalidHeaderValue { .. } => "invalid_header",
        }
    }
}

pub type Result<T> = std::result::Result<T, CredentialError>;
