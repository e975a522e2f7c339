use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{AudioStream, Input, LiveInput},
    Call, Songbird,
};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::events;
use crate::audio::transport::{TransportError, VoiceConnector, VoiceTransport};
use crate::audio::{CHANNELS, FRAME_SAMPLES, SAMPLE_RATE};

/// Paquetes en vuelo entre el encoder y el mixer de songbird (~200ms).
const PIPE_DEPTH: usize = 10;

/// Si el encoder no entrega a tiempo, el mixer recibe silencio en vez de
/// quedarse bloqueado.
const PIPE_IDLE: Duration = Duration::from_millis(10);

/// Frame Opus de silencio que usa Discord.
const SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Cabecera DCA1: magic, largo del JSON (i32 LE) y metadatos.
fn dca_header() -> Bytes {
    let metadata = serde_json::json!({
        "dca": {
            "version": 1,
            "tool": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "url": null,
                "author": null,
            },
        },
        "opus": {
            "mode": "music",
            "sample_rate": SAMPLE_RATE,
            "frame_size": FRAME_SAMPLES,
            "abr": null,
            "vbr": true,
            "channels": CHANNELS,
        },
        "info": null,
        "origin": null,
        "extra": null,
    })
    .to_string();

    let mut header = BytesMut::with_capacity(8 + metadata.len());
    header.put_slice(b"DCA1");
    header.put_i32_le(metadata.len() as i32);
    header.put_slice(metadata.as_bytes());
    header.freeze()
}

fn write_frame(out: &mut Vec<u8>, packet: &[u8]) {
    out.extend_from_slice(&(packet.len() as i16).to_le_bytes());
    out.extend_from_slice(packet);
}

/// Lado lector del pipe: songbird lo consume como un archivo DCA en vivo y,
/// al ser Opus 48kHz estéreo, lo reenvía sin recodificar.
struct DcaPipe {
    packets: flume::Receiver<Bytes>,
    pending: Vec<u8>,
    pos: usize,
}

impl DcaPipe {
    fn new(packets: flume::Receiver<Bytes>) -> Self {
        Self {
            packets,
            pending: dca_header().to_vec(),
            pos: 0,
        }
    }

    /// Carga el siguiente frame. `false` cuando el emisor se cerró.
    fn refill(&mut self) -> bool {
        self.pending.clear();
        self.pos = 0;

        match self.packets.recv_timeout(PIPE_IDLE) {
            Ok(packet) => write_frame(&mut self.pending, &packet),
            Err(flume::RecvTimeoutError::Timeout) => write_frame(&mut self.pending, &SILENCE_FRAME),
            Err(flume::RecvTimeoutError::Disconnected) => return false,
        }
        true
    }
}

impl Read for DcaPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pos >= self.pending.len() && !self.refill() {
            return Ok(0);
        }

        let available = &self.pending[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Seek for DcaPipe {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "el pipe de voz no admite seek",
        ))
    }
}

impl MediaSource for DcaPipe {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

fn dca_input(packets: flume::Receiver<Bytes>) -> Input {
    let mut hint = Hint::new();
    hint.with_extension("dca");

    Input::Live(
        LiveInput::Raw(AudioStream {
            input: Box::new(DcaPipe::new(packets)) as Box<dyn MediaSource>,
            hint: Some(hint),
        }),
        None,
    )
}

/// Sesión de voz sobre songbird. Cada canción abre un input en vivo nuevo
/// (`set_speaking(true)`) y lo termina al cerrar el pipe.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    ready: Arc<AtomicBool>,
    pipe: parking_lot::Mutex<Option<flume::Sender<Bytes>>>,
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn set_speaking(&self, speaking: bool) {
        if !speaking {
            // Sin emisor el lector llega a EOF y songbird termina el track
            self.pipe.lock().take();
            return;
        }

        let (tx, rx) = flume::bounded(PIPE_DEPTH);
        self.call.lock().await.play_only_input(dca_input(rx));
        *self.pipe.lock() = Some(tx);
        debug!("🎙️ Nuevo input de voz en guild {}", self.guild_id);
    }

    async fn send_opus(&self, packet: Bytes) -> Result<(), TransportError> {
        let tx = self.pipe.lock().clone().ok_or(TransportError::NotReady)?;
        tx.send_async(packet)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn disconnect(&self) {
        self.pipe.lock().take();
        self.ready.store(false, Ordering::Release);

        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!("⚠️ Error al salir del canal de voz: {:?}", e);
        }
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
    }
}

/// Se une al canal de voz del usuario que pidió la canción.
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    channel_id: ChannelId,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>, guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self {
            manager,
            guild_id,
            channel_id,
        }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn connect(&self) -> Result<Arc<dyn VoiceTransport>, TransportError> {
        let call = self
            .manager
            .join(self.guild_id, self.channel_id)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let ready = Arc::new(AtomicBool::new(true));
        {
            let mut handler = call.lock().await;
            handler.remove_all_global_events();
            events::track_connection(&mut handler, self.guild_id, ready.clone());

            if let Err(e) = handler.deafen(true).await {
                debug!("No se pudo ensordecer al bot: {:?}", e);
            }
        }

        info!(
            "🔊 Conectado al canal de voz {} en guild {}",
            self.channel_id, self.guild_id
        );

        Ok(Arc::new(SongbirdTransport {
            manager: self.manager.clone(),
            guild_id: self.guild_id,
            call,
            ready,
            pipe: parking_lot::Mutex::new(None),
        }))
    }
}
