//! Request authentication seam.
//!
//! The cryptographic verifier is an external collaborator; the control
//! server only needs `verify` over the raw message, its detached signature
//! and the claimed username.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AuthError {
    #[error("username expected")]
    UsernameExpected,

    #[error("authorization failed: {0}")]
    Verification(String),
}

pub trait Authenticator: Send {
    fn verify(&self, message: &[u8], signature: &[u8], username: &str) -> Result<(), AuthError>;
}

/// Accepts everything. The default until a verifier plugin is wired in.
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn verify(&self, _message: &[u8], _signature: &[u8], _username: &str) -> Result<(), AuthError> {
        Ok(())
    }
}
