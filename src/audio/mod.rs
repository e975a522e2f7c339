//! # Audio Module
//!
//! Playback pipeline of the relay: queues, downloads, decoding, encoding and
//! the session player that ties them together.
//!
//! ## Architecture
//!
//! ```text
//! request ─▶ downloads ─▶ [resolve + fetch] ─▶ ready ─▶ Player ─▶ decoder ─▶ encoder ─▶ transport
//! ```
//!
//! ### [`queue`] - Queue Store
//! - Generic FIFO shared between the command surface, the workers and the player
//!
//! ### [`download`] - Download Worker
//! - Resolves and fetches requests with bounded concurrency
//!
//! ### [`player`] - Session Player
//! - One driver task per voice session, one child task per track
//! - Skip/stop arrive as commands and become per-track cancellation
//!
//! ### [`decoder`] / [`encoder`] - Media Pipeline
//! - ffmpeg → s16le PCM frames → Opus packets
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Bit Depth**: 16-bit signed integers, little endian
//! - **Channels**: Stereo (2 channels)
//! - **Frame**: 960 samples per channel (20ms)

pub mod announce;
pub mod decoder;
pub mod download;
pub mod encoder;
pub mod player;
pub mod queue;
pub mod track;
pub mod transport;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
/// Muestras por canal en un frame de 20ms
pub const FRAME_SAMPLES: usize = 960;
/// Valores i16 intercalados por frame
pub const FRAME_VALUES: usize = FRAME_SAMPLES * CHANNELS;
pub const FRAME_BYTES: usize = FRAME_VALUES * 2;
/// Tamaño máximo de un paquete Opus
pub const MAX_OPUS_PACKET: usize = 4000;

/// Un frame de PCM intercalado (L, R, L, R, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    samples: Vec<i16>,
}

impl PcmFrame {
    pub fn silence() -> Self {
        Self {
            samples: vec![0; FRAME_VALUES],
        }
    }

    /// Construye un frame a partir de bytes s16le. Devuelve `None` si el buffer
    /// no tiene exactamente [`FRAME_BYTES`] bytes.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != FRAME_BYTES {
            return None;
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Some(Self { samples })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_from_bytes_requires_full_frame() {
        assert!(PcmFrame::from_le_bytes(&[0u8; FRAME_BYTES - 2]).is_none());

        let mut bytes = vec![0u8; FRAME_BYTES];
        bytes[0] = 0x01;
        bytes[1] = 0x02;
        let frame = PcmFrame::from_le_bytes(&bytes).unwrap();

        assert_eq!(frame.samples().len(), FRAME_VALUES);
        assert_eq!(frame.samples()[0], 0x0201);
    }
}
