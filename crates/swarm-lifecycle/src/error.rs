use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Transport(#[from] swarm_transport::TransportError),

    #[error(transparent)]
    Kv(#[from] swarm_transport::KvError),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
