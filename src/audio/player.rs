use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::announce::{Announcement, Announcer};
use super::decoder::{DecodeError, PcmStream, Transcoder};
use super::download::{BatchReport, DownloadWorker};
use super::encoder::{run_encoder, EncodeError, OpusFrameEncoder};
use super::queue::{PipelineQueues, QueueError};
use super::track::{ResolvedTrack, TrackRequest, TrackSummary};
use super::transport::{TransportError, VoiceConnector, VoiceTransport};
use super::PcmFrame;
use crate::config::Config;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("no hay nada reproduciéndose")]
    NotPlaying,
    #[error(transparent)]
    Connect(#[from] TransportError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("la sesión de reproducción terminó")]
    SessionClosed,
}

/// Por qué terminó el streaming de una canción.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("el transporte de voz no está disponible")]
    TransportUnavailable,
    #[error("la tarea de reproducción terminó inesperadamente")]
    Aborted,
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub opus_bitrate: u32,
    pub frame_buffer: usize,
    pub max_history: usize,
}

impl From<&Config> for PlaybackConfig {
    fn from(config: &Config) -> Self {
        Self {
            opus_bitrate: config.opus_bitrate,
            frame_buffer: config.frame_buffer.max(1),
            max_history: config.max_history,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            opus_bitrate: 96_000,
            frame_buffer: 2,
            max_history: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Sin sesión de voz
    Disconnected,
    /// Sesión abierta esperando descargas
    Idle,
    Playing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub phase: Phase,
    pub current: Option<TrackSummary>,
    /// Número de la canción actual, único en la vida del proceso
    pub track_seq: Option<u64>,
}

impl PlayerStatus {
    fn disconnected() -> Self {
        Self {
            phase: Phase::Disconnected,
            current: None,
            track_seq: None,
        }
    }

    fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            current: None,
            track_seq: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.phase == Phase::Playing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Finished,
    Skipped,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub track: TrackSummary,
    pub outcome: PlayOutcome,
    pub ended_at: DateTime<Utc>,
}

/// Foto de las colas para el comando `show`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub current: Option<TrackSummary>,
    pub ready: Vec<TrackSummary>,
    pub pending: Vec<String>,
}

enum SessionCommand {
    /// Salta la canción con ese número; si ya cambió no hace nada
    Skip(u64),
    Stop(oneshot::Sender<()>),
    Replace(Vec<TrackRequest>, oneshot::Sender<()>),
}

struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

struct PlayerInner {
    config: PlaybackConfig,
    queues: PipelineQueues,
    worker: Arc<DownloadWorker>,
    transcoder: Arc<dyn Transcoder>,
    announcer: Arc<dyn Announcer>,
    // Todo envío de comandos a la sesión ocurre con este lock tomado
    session: tokio::sync::Mutex<Option<SessionHandle>>,
    status: watch::Sender<PlayerStatus>,
    history: Mutex<VecDeque<HistoryEntry>>,
    track_seq: AtomicU64,
}

/// Player global del bot.
///
/// Cada sesión de voz tiene una tarea driver que es la única que toca el
/// estado de reproducción; `skip`, `stop` y `replace` le llegan como comandos.
/// Cada canción corre en una tarea hija con su propio `CancellationToken`.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    pub fn new(
        config: PlaybackConfig,
        worker: Arc<DownloadWorker>,
        transcoder: Arc<dyn Transcoder>,
        announcer: Arc<dyn Announcer>,
    ) -> Self {
        let (status, _) = watch::channel(PlayerStatus::disconnected());

        Self {
            inner: Arc::new(PlayerInner {
                config,
                queues: PipelineQueues::new(),
                worker,
                transcoder,
                announcer,
                session: tokio::sync::Mutex::new(None),
                status,
                history: Mutex::new(VecDeque::new()),
                track_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn queues(&self) -> &PipelineQueues {
        &self.inner.queues
    }

    pub fn worker(&self) -> &Arc<DownloadWorker> {
        &self.inner.worker
    }

    pub fn status(&self) -> PlayerStatus {
        self.inner.status.borrow().clone()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.status.borrow().is_playing()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerStatus> {
        self.inner.status.subscribe()
    }

    /// Historial en memoria, más reciente al final.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.history.lock().iter().cloned().collect()
    }

    pub fn snapshot(&self) -> Result<QueueSnapshot, PlayerError> {
        Ok(QueueSnapshot {
            current: self.status().current,
            ready: self.inner.queues.ready.peek_map(ResolvedTrack::summary)?,
            pending: self
                .inner
                .queues
                .downloads
                .peek_map(|r| r.label().to_string())?,
        })
    }

    pub fn failed(&self) -> Result<Vec<TrackRequest>, PlayerError> {
        Ok(self.inner.queues.failed.peek_all()?)
    }

    /// Encola pedidos y abre la sesión de voz si no hay una activa.
    pub async fn enqueue(
        &self,
        requests: Vec<TrackRequest>,
        connector: &dyn VoiceConnector,
    ) -> Result<usize, PlayerError> {
        let count = requests.len();
        let mut slot = self.inner.session.lock().await;

        self.inner.queues.downloads.put_all(requests);

        if slot.is_some() {
            self.inner.queues.wake.notify_one();
            return Ok(count);
        }

        let transport = match connector.connect().await {
            Ok(transport) => transport,
            Err(e) => {
                // Sin sesión nadie va a consumir lo que acabamos de encolar
                self.inner.queues.downloads.clear(|_| {})?;
                return Err(e.into());
            }
        };

        *slot = Some(self.spawn_session(transport));
        Ok(count)
    }

    /// Reemplaza todo lo pendiente por `requests`. Si hay una sesión activa
    /// se corta la canción actual sin desconectar.
    pub async fn replace(
        &self,
        requests: Vec<TrackRequest>,
        connector: &dyn VoiceConnector,
    ) -> Result<usize, PlayerError> {
        let ack = {
            let slot = self.inner.session.lock().await;
            match slot.as_ref() {
                Some(handle) => {
                    let (tx, rx) = oneshot::channel();
                    handle
                        .commands
                        .send(SessionCommand::Replace(requests.clone(), tx))
                        .ok()
                        .map(|_| rx)
                }
                None => None,
            }
        };

        if let Some(ack) = ack {
            if ack.await.is_ok() {
                return Ok(requests.len());
            }
            debug!("🔁 La sesión cerró antes de reemplazar la cola, abriendo una nueva");
        }

        self.enqueue(requests, connector).await
    }

    pub async fn skip(&self) -> Result<(), PlayerError> {
        let slot = self.inner.session.lock().await;
        let handle = slot.as_ref().ok_or(PlayerError::NotPlaying)?;
        let seq = self
            .inner
            .status
            .borrow()
            .track_seq
            .ok_or(PlayerError::NotPlaying)?;

        handle
            .commands
            .send(SessionCommand::Skip(seq))
            .map_err(|_| PlayerError::SessionClosed)
    }

    /// Corta la reproducción, descarta ambas colas y desconecta. Retorna
    /// cuando la sesión ya terminó.
    pub async fn stop(&self) -> Result<(), PlayerError> {
        let ack = {
            let slot = self.inner.session.lock().await;
            let handle = slot.as_ref().ok_or(PlayerError::NotPlaying)?;
            let (tx, rx) = oneshot::channel();
            handle
                .commands
                .send(SessionCommand::Stop(tx))
                .map_err(|_| PlayerError::SessionClosed)?;
            rx
        };

        // Si el driver ya había cerrado, el resultado es el mismo
        let _ = ack.await;
        Ok(())
    }

    fn spawn_session(&self, transport: Arc<dyn VoiceTransport>) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.status.send_replace(PlayerStatus::idle());

        let driver = SessionDriver {
            inner: self.inner.clone(),
            transport,
            commands: rx,
            active: None,
            batch: None,
            session_history: Vec::new(),
        };
        tokio::spawn(driver.run());

        SessionHandle { commands: tx }
    }
}

enum TrackEnd {
    Finished,
    Interrupted,
    Failed(PlaybackError),
}

/// Batch de descargas en curso. Cancelarlo aborta sus trabajos y espera
/// a que terminen, así no quedan archivos a medio escribir.
struct DownloadBatch {
    cancel: CancellationToken,
    task: JoinHandle<BatchReport>,
}

struct ActiveTrack {
    seq: u64,
    track: ResolvedTrack,
    summary: TrackSummary,
    cancel: CancellationToken,
    interrupt: Option<PlayOutcome>,
    done: oneshot::Receiver<TrackEnd>,
    task: JoinHandle<()>,
}

enum Flow {
    Continue,
    Exit,
}

enum CloseAttempt {
    Closed,
    Busy,
    Command(SessionCommand),
}

struct SessionDriver {
    inner: Arc<PlayerInner>,
    transport: Arc<dyn VoiceTransport>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    active: Option<ActiveTrack>,
    batch: Option<DownloadBatch>,
    session_history: Vec<HistoryEntry>,
}

impl SessionDriver {
    async fn run(mut self) {
        info!("🔊 Sesión de voz iniciada");

        loop {
            self.dispatch_downloads();

            if self.active.is_none() {
                if self.start_next().await {
                    continue;
                }

                if self.batch.is_none() {
                    match self.try_close().await {
                        CloseAttempt::Closed => return,
                        CloseAttempt::Busy => continue,
                        CloseAttempt::Command(command) => {
                            if let Flow::Exit = self.handle_command(command).await {
                                return;
                            }
                            continue;
                        }
                    }
                }
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Flow::Exit = self.handle_command(command).await {
                            return;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                end = wait_track(&mut self.active) => {
                    self.retire_track(end).await;
                    self.advance().await;
                }
                report = wait_batch(&mut self.batch) => {
                    self.batch = None;
                    debug!("📦 Descargas: {} ok, {} fallidas", report.succeeded, report.failed);
                }
                _ = self.inner.queues.wake.notified() => {}
            }
        }
    }

    fn dispatch_downloads(&mut self) {
        if self.batch.is_some() || self.inner.queues.downloads.is_empty() {
            return;
        }

        let worker = self.inner.worker.clone();
        let queues = self.inner.queues.clone();
        let cancel = CancellationToken::new();
        self.batch = Some(DownloadBatch {
            task: tokio::spawn(worker.drain_batch(queues, cancel.clone())),
            cancel,
        });
    }

    /// Saca la siguiente canción lista y la empieza. `false` si no hay ninguna.
    async fn start_next(&mut self) -> bool {
        let Ok(track) = self.inner.queues.ready.get_one() else {
            return false;
        };

        let summary = track.summary();
        let seq = self.inner.track_seq.fetch_add(1, Ordering::Relaxed) + 1;
        info!("▶️ Reproduciendo: {}", summary.title);

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let task = tokio::spawn({
            let path = track.media_path().to_path_buf();
            let transcoder = self.inner.transcoder.clone();
            let transport = self.transport.clone();
            let config = self.inner.config.clone();
            let cancel = cancel.clone();
            async move {
                let end = stream_track(path, transcoder, transport, cancel, config).await;
                let _ = done_tx.send(end);
            }
        });

        // Un solo update: si venimos de otra canción nunca se publica Idle
        self.inner.status.send_replace(PlayerStatus {
            phase: Phase::Playing,
            current: Some(summary.clone()),
            track_seq: Some(seq),
        });

        self.active = Some(ActiveTrack {
            seq,
            track,
            summary: summary.clone(),
            cancel,
            interrupt: None,
            done: done_rx,
            task,
        });

        self.inner
            .announcer
            .announce(Announcement::NowPlaying(summary))
            .await;
        true
    }

    async fn advance(&mut self) {
        if !self.start_next().await {
            self.inner.status.send_replace(PlayerStatus::idle());
        }
    }

    /// Registra el final de la canción activa y libera sus archivos.
    async fn retire_track(&mut self, end: TrackEnd) {
        let Some(active) = self.active.take() else {
            return;
        };
        let _ = active.task.await;

        let outcome = match end {
            TrackEnd::Finished => PlayOutcome::Finished,
            TrackEnd::Interrupted => active.interrupt.unwrap_or(PlayOutcome::Skipped),
            TrackEnd::Failed(e) => {
                error!("❌ Error reproduciendo '{}': {}", active.summary.title, e);
                self.inner
                    .announcer
                    .announce(Announcement::PlaybackFailed {
                        title: active.summary.title.clone(),
                    })
                    .await;
                PlayOutcome::Failed
            }
        };

        debug!("⏹️ '{}' terminó: {:?}", active.summary.title, outcome);
        self.record(HistoryEntry {
            track: active.summary,
            outcome,
            ended_at: Utc::now(),
        });

        // Borra los archivos de la canción
        drop(active.track);
    }

    fn record(&mut self, entry: HistoryEntry) {
        self.session_history.push(entry.clone());

        let mut history = self.inner.history.lock();
        history.push_back(entry);
        while history.len() > self.inner.config.max_history {
            history.pop_front();
        }
    }

    /// Cancela la canción activa y espera a que su tarea termine.
    async fn interrupt_current(&mut self, reason: PlayOutcome) {
        if let Some(active) = self.active.as_mut() {
            active.interrupt = Some(reason);
            active.cancel.cancel();
        } else {
            return;
        }

        let end = wait_track(&mut self.active).await;
        self.retire_track(end).await;
    }

    /// Aborta las descargas en curso y vacía ambas colas, borrando los medios.
    async fn reset_pipeline(&mut self) {
        if let Some(batch) = self.batch.take() {
            batch.cancel.cancel();
            if let Err(e) = batch.task.await {
                warn!("⚠️ El batch de descargas terminó mal: {}", e);
            }
        }

        let queues = &self.inner.queues;
        match queues.downloads.clear(|request| debug!("🗑️ Pedido descartado: {}", request.label())) {
            Ok(count) if count > 0 => info!("🗑️ {} descargas pendientes descartadas", count),
            Ok(_) => {}
            Err(e) => warn!("⚠️ No se pudo limpiar la cola de descargas: {}", e),
        }
        match queues.ready.clear(drop) {
            Ok(count) if count > 0 => info!("🗑️ {} canciones listas descartadas", count),
            Ok(_) => {}
            Err(e) => warn!("⚠️ No se pudo limpiar la cola de reproducción: {}", e),
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::Skip(seq) => {
                match self.active.as_mut() {
                    Some(active) if active.seq == seq => {
                        info!("⏭️ Saltando: {}", active.summary.title);
                        active.interrupt = Some(PlayOutcome::Skipped);
                        active.cancel.cancel();
                    }
                    _ => debug!("⏭️ Skip de la canción #{} ignorado: ya no suena", seq),
                }
                Flow::Continue
            }
            SessionCommand::Stop(ack) => {
                info!("⏹️ Deteniendo reproducción");
                self.shutdown().await;
                let _ = ack.send(());
                Flow::Exit
            }
            SessionCommand::Replace(requests, ack) => {
                info!("🔁 Reemplazando cola con {} pedidos", requests.len());
                self.interrupt_current(PlayOutcome::Stopped).await;
                self.reset_pipeline().await;
                self.inner.status.send_replace(PlayerStatus::idle());
                self.inner.queues.downloads.put_all(requests);
                let _ = ack.send(());
                Flow::Continue
            }
        }
    }

    /// Cierra la sesión solo si no queda trabajo. Los comandos que llegaron
    /// antes de tomar el lock se devuelven para procesarlos.
    async fn try_close(&mut self) -> CloseAttempt {
        let mut slot = self.inner.session.lock().await;

        if let Ok(command) = self.commands.try_recv() {
            return CloseAttempt::Command(command);
        }
        if !self.inner.queues.is_drained() {
            return CloseAttempt::Busy;
        }

        self.transport.disconnect().await;
        *slot = None;
        self.inner.status.send_replace(PlayerStatus::disconnected());
        drop(slot);

        self.farewell().await;
        CloseAttempt::Closed
    }

    async fn shutdown(&mut self) {
        self.interrupt_current(PlayOutcome::Stopped).await;
        self.reset_pipeline().await;

        let mut slot = self.inner.session.lock().await;
        self.transport.disconnect().await;
        *slot = None;
        self.inner.status.send_replace(PlayerStatus::disconnected());
        drop(slot);

        self.farewell().await;
    }

    async fn farewell(&mut self) {
        info!("👋 Sesión de voz terminada");

        let history = std::mem::take(&mut self.session_history);
        if !history.is_empty() {
            self.inner
                .announcer
                .announce(Announcement::PlayHistory(history))
                .await;
        }
        self.inner.announcer.announce(Announcement::Farewell).await;
    }
}

async fn wait_track(active: &mut Option<ActiveTrack>) -> TrackEnd {
    match active {
        Some(active) => (&mut active.done)
            .await
            .unwrap_or(TrackEnd::Failed(PlaybackError::Aborted)),
        None => std::future::pending().await,
    }
}

async fn wait_batch(batch: &mut Option<DownloadBatch>) -> BatchReport {
    match batch {
        Some(batch) => (&mut batch.task).await.unwrap_or_default(),
        None => std::future::pending().await,
    }
}

/// Decodifica y envía una canción completa. Corre como tarea hija del driver.
async fn stream_track(
    path: PathBuf,
    transcoder: Arc<dyn Transcoder>,
    transport: Arc<dyn VoiceTransport>,
    cancel: CancellationToken,
    config: PlaybackConfig,
) -> TrackEnd {
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return TrackEnd::Interrupted,
        opened = transcoder.open(&path) => match opened {
            Ok(stream) => stream,
            Err(e) => return TrackEnd::Failed(e.into()),
        },
    };

    if !transport.is_ready() {
        stream.close().await;
        return TrackEnd::Failed(PlaybackError::TransportUnavailable);
    }

    let encoder = match OpusFrameEncoder::new(config.opus_bitrate) {
        Ok(encoder) => encoder,
        Err(e) => {
            stream.close().await;
            return TrackEnd::Failed(e.into());
        }
    };

    let (frames_tx, frames_rx) = flume::bounded(config.frame_buffer);
    transport.set_speaking(true).await;
    let encoder_task = tokio::spawn(run_encoder(encoder, frames_rx, transport.clone()));

    let pumped = pump_frames(&mut *stream, &frames_tx, &cancel).await;
    stream.close().await;
    drop(frames_tx);

    let end = match pumped {
        TrackEnd::Interrupted => {
            encoder_task.abort();
            let _ = encoder_task.await;
            TrackEnd::Interrupted
        }
        pumped => match (pumped, encoder_task.await) {
            (TrackEnd::Finished, Ok(Err(e))) => TrackEnd::Failed(e.into()),
            (TrackEnd::Finished, Err(_)) => TrackEnd::Failed(PlaybackError::Aborted),
            (pumped, _) => pumped,
        },
    };

    transport.set_speaking(false).await;
    end
}

async fn pump_frames(
    stream: &mut dyn PcmStream,
    frames: &flume::Sender<PcmFrame>,
    cancel: &CancellationToken,
) -> TrackEnd {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TrackEnd::Interrupted,
            next = stream.next_frame() => next,
        };

        match next {
            Ok(Some(frame)) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return TrackEnd::Interrupted,
                    sent = frames.send_async(frame) => {
                        if sent.is_err() {
                            return TrackEnd::Failed(PlaybackError::TransportUnavailable);
                        }
                    }
                }
            }
            Ok(None) => return TrackEnd::Finished,
            Err(e) => return TrackEnd::Failed(e.into()),
        }
    }
}
