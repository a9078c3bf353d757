use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery is disabled")]
    Disabled,

    #[error(transparent)]
    Transport(#[from] swarm_transport::TransportError),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
