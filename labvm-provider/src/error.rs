//! Error types for cloud provisioning operations.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

/// The pipeline stage a provisioning failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    VirtualNetwork,
    PublicAddress,
    SecurityPolicy,
    Interface,
    Machine,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::VirtualNetwork => "virtual-network",
            Stage::PublicAddress => "public-address",
            Stage::SecurityPolicy => "security-policy",
            Stage::Interface => "interface",
            Stage::Machine => "machine",
        };
        write!(f, "{}", name)
    }
}

/// Errors that can occur while provisioning or tearing down cloud resources.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Unknown VM profile: {0}")]
    UnknownProfile(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{stage} provisioning failed for {name}: {message}")]
    Stage {
        stage: Stage,
        name: String,
        message: String,
    },

    #[error("Cloud request failed: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Wrap a provider failure with the pipeline stage it occurred in.
    /// `NotFound` is preserved so teardown paths can still treat an
    /// already-deleted resource as success.
    pub fn at_stage(self, stage: Stage, name: &str) -> Self {
        match self {
            ProviderError::NotFound(_) => self,
            other => ProviderError::Stage {
                stage,
                name: name.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Stage this error originated from, when known.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ProviderError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
