use crate::provider::ProviderError;
use sshpilot_ssh::SshError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("invalid data: {0}")]
    Invalid(String),
}
