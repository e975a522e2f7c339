use async_trait::async_trait;

use super::player::HistoryEntry;
use super::track::TrackSummary;

/// Mensajes visibles para el usuario que emite el pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Announcement {
    NowPlaying(TrackSummary),
    /// Fin de la sesión de voz
    Farewell,
    ResolutionFailed { query: String },
    PlaybackFailed { title: String },
    PlayHistory(Vec<HistoryEntry>),
}

#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self, announcement: Announcement);
}

/// Descarta todos los mensajes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAnnouncer;

#[async_trait]
impl Announcer for SilentAnnouncer {
    async fn announce(&self, _announcement: Announcement) {}
}
