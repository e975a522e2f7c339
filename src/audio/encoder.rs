use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::transport::VoiceTransport;
use super::{PcmFrame, MAX_OPUS_PACKET};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("error de Opus: {0}")]
    Opus(#[from] audiopus::Error),
}

/// Encoder Opus 48kHz estéreo, un paquete por frame de 20ms.
pub struct OpusFrameEncoder {
    encoder: Encoder,
    buf: Vec<u8>,
}

impl OpusFrameEncoder {
    pub fn new(bitrate: u32) -> Result<Self, EncodeError> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)?;
        encoder.set_bitrate(Bitrate::BitsPerSecond(bitrate as i32))?;

        Ok(Self {
            encoder,
            buf: vec![0; MAX_OPUS_PACKET],
        })
    }

    pub fn encode(&mut self, frame: &PcmFrame) -> Result<Bytes, EncodeError> {
        let len = self.encoder.encode(frame.samples(), &mut self.buf)?;
        Ok(Bytes::copy_from_slice(&self.buf[..len]))
    }
}

/// Consume frames PCM, los codifica y los envía al transporte.
///
/// Si el transporte deja de estar listo retorna sin error: el resto de la
/// canción se descarta y el receptor cerrado le avisa al decodificador.
/// Devuelve la cantidad de paquetes enviados.
pub async fn run_encoder(
    mut encoder: OpusFrameEncoder,
    frames: flume::Receiver<PcmFrame>,
    transport: Arc<dyn VoiceTransport>,
) -> Result<usize, EncodeError> {
    let mut sent = 0;

    while let Ok(frame) = frames.recv_async().await {
        if !transport.is_ready() {
            debug!("🔇 Transporte de voz no listo, descartando audio");
            return Ok(sent);
        }

        let packet = encoder.encode(&frame)?;
        if let Err(e) = transport.send_opus(packet).await {
            warn!("⚠️ Envío de audio interrumpido: {}", e);
            return Ok(sent);
        }
        sent += 1;
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::transport::testing::RecordingTransport;
    use std::sync::atomic::Ordering;

    #[test]
    fn encodes_silence_into_small_packet() {
        let mut encoder = OpusFrameEncoder::new(96_000).unwrap();
        let packet = encoder.encode(&PcmFrame::silence()).unwrap();

        assert!(!packet.is_empty());
        assert!(packet.len() < MAX_OPUS_PACKET);
    }

    #[tokio::test]
    async fn forwards_every_frame() {
        let transport = RecordingTransport::new();
        let (tx, rx) = flume::bounded(2);

        let task = tokio::spawn(run_encoder(
            OpusFrameEncoder::new(64_000).unwrap(),
            rx,
            transport.clone(),
        ));

        for _ in 0..5 {
            tx.send_async(PcmFrame::silence()).await.unwrap();
        }
        drop(tx);

        assert_eq!(task.await.unwrap().unwrap(), 5);
        assert_eq!(transport.packets(), 5);
    }

    #[tokio::test]
    async fn returns_silently_when_transport_not_ready() {
        let transport = RecordingTransport::new();
        transport.ready.store(false, Ordering::SeqCst);
        let (tx, rx) = flume::bounded(2);

        tx.send_async(PcmFrame::silence()).await.unwrap();
        let sent = run_encoder(OpusFrameEncoder::new(64_000).unwrap(), rx, transport.clone())
            .await
            .unwrap();

        assert_eq!(sent, 0);
        assert_eq!(transport.packets(), 0);
        // El receptor se cerró: el productor se entera
        assert!(tx.send(PcmFrame::silence()).is_err());
    }
}
