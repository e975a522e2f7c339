use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use super::{PcmFrame, CHANNELS, FRAME_BYTES, SAMPLE_RATE};

const PIPE_BUFFER: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no se pudo iniciar el transcoder: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("error leyendo PCM: {0}")]
    Io(#[from] std::io::Error),
    #[error("el transcoder no produjo audio en {}", humantime::format_duration(*.0))]
    Stalled(Duration),
}

/// Lee frames PCM de tamaño fijo desde cualquier `AsyncRead`.
///
/// Un EOF limpio o una lectura corta al final se reportan como fin de datos
/// (`Ok(None)`); el frame incompleto se descarta.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: vec![0; FRAME_BYTES],
        }
    }

    pub async fn next_frame(&mut self) -> Result<Option<PcmFrame>, DecodeError> {
        match self.reader.read_exact(&mut self.buf).await {
            Ok(_) => Ok(PcmFrame::from_le_bytes(&self.buf)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(DecodeError::Io(e)),
        }
    }
}

/// Flujo de frames PCM de una canción. Es dueño del proceso que lo produce.
#[async_trait]
pub trait PcmStream: Send {
    /// `Ok(None)` marca el fin del audio.
    async fn next_frame(&mut self) -> Result<Option<PcmFrame>, DecodeError>;

    /// Termina y recolecta el proceso subyacente. Idempotente.
    async fn close(&mut self);
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Box<dyn PcmStream>, DecodeError>;
}

/// Transcoder basado en ffmpeg: cualquier formato → s16le 48kHz estéreo por stdout.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    stall_timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>, stall_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            stall_timeout,
        }
    }

    fn args(path: &Path) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            path.to_string_lossy().into_owned(),
            "-f".into(),
            "s16le".into(),
            "-ar".into(),
            SAMPLE_RATE.to_string(),
            "-ac".into(),
            CHANNELS.to_string(),
            "pipe:1".into(),
        ]
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn open(&self, path: &Path) -> Result<Box<dyn PcmStream>, DecodeError> {
        debug!("🎛️ Iniciando ffmpeg para {}", path.display());

        let mut child = Command::new(&self.program)
            .args(Self::args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(DecodeError::Spawn)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            DecodeError::Spawn(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "ffmpeg sin stdout",
            ))
        })?;

        Ok(Box::new(FfmpegStream {
            child,
            frames: FrameReader::new(BufReader::with_capacity(PIPE_BUFFER, stdout)),
            stall_timeout: self.stall_timeout,
            closed: false,
        }))
    }
}

struct FfmpegStream {
    child: Child,
    frames: FrameReader<BufReader<ChildStdout>>,
    stall_timeout: Duration,
    closed: bool,
}

#[async_trait]
impl PcmStream for FfmpegStream {
    async fn next_frame(&mut self) -> Result<Option<PcmFrame>, DecodeError> {
        match tokio::time::timeout(self.stall_timeout, self.frames.next_frame()).await {
            Ok(frame) => frame,
            Err(_) => {
                warn!(
                    "⏱️ ffmpeg sin datos durante {}, terminando proceso",
                    humantime::format_duration(self.stall_timeout)
                );
                self.close().await;
                Err(DecodeError::Stalled(self.stall_timeout))
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.start_kill() {
                warn!("⚠️ No se pudo terminar ffmpeg: {}", e);
            }
        }

        match self.child.wait().await {
            Ok(status) => debug!("🎛️ ffmpeg terminó: {}", status),
            Err(e) => warn!("⚠️ Error esperando a ffmpeg: {}", e),
        }
    }
}
