use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("la conexión de voz no está lista")]
    NotReady,
    #[error("la conexión de voz se cerró")]
    Closed,
    #[error("no se pudo conectar al canal de voz: {0}")]
    Connect(String),
}

/// Sumidero de paquetes Opus de una sesión de voz.
///
/// `send_opus` aplica back-pressure: la implementación real solo acepta
/// paquetes al ritmo en que el canal de voz los consume.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn set_speaking(&self, speaking: bool);

    async fn send_opus(&self, packet: Bytes) -> Result<(), TransportError>;

    async fn disconnect(&self);
}

/// Abre una sesión de voz nueva (por ejemplo, uniéndose al canal del usuario).
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn VoiceTransport>, TransportError>;
}
