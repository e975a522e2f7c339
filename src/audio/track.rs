use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::sources::ResolvedSource;

/// Cómo debe buscarse una canción.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackLookup {
    /// Texto libre para el buscador
    Query(String),
    /// ID de video ya conocido (URL directa o item de playlist)
    VideoId(String),
}

/// Pedido de reproducción tal como llega del comando `play`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    lookup: TrackLookup,
    title: Option<String>,
    artist: Option<String>,
    source_url: Option<String>,
    cover_url: Option<String>,
    requested_by: Option<u64>,
    requested_at: DateTime<Utc>,
}

impl TrackRequest {
    pub fn new(lookup: TrackLookup) -> Self {
        Self {
            lookup,
            title: None,
            artist: None,
            source_url: None,
            cover_url: None,
            requested_by: None,
            requested_at: Utc::now(),
        }
    }

    pub fn search(query: impl Into<String>) -> Self {
        Self::new(TrackLookup::Query(query.into()))
    }

    pub fn video(id: impl Into<String>) -> Self {
        Self::new(TrackLookup::VideoId(id.into()))
    }

    // Getters
    pub fn lookup(&self) -> &TrackLookup {
        &self.lookup
    }
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
    pub fn artist(&self) -> Option<&str> {
        self.artist.as_deref()
    }
    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }
    pub fn cover_url(&self) -> Option<&str> {
        self.cover_url.as_deref()
    }
    pub fn requested_by(&self) -> Option<u64> {
        self.requested_by
    }
    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    /// Texto para mostrar al usuario: el título si se conoce, si no la búsqueda.
    pub fn label(&self) -> &str {
        match (&self.title, &self.lookup) {
            (Some(title), _) => title,
            (None, TrackLookup::Query(query)) => query,
            (None, TrackLookup::VideoId(id)) => id,
        }
    }

    // Setters
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_cover_url(mut self, url: impl Into<String>) -> Self {
        self.cover_url = Some(url.into());
        self
    }

    pub fn with_requested_by(mut self, user_id: u64) -> Self {
        self.requested_by = Some(user_id);
        self
    }
}

/// Archivos locales de una canción descargada. Se borran del disco al
/// descartarse, así que cada canción libera sus archivos exactamente una vez.
#[derive(Debug)]
pub struct MediaFiles {
    song: PathBuf,
    cover: Option<PathBuf>,
}

impl MediaFiles {
    pub fn new(song: PathBuf, cover: Option<PathBuf>) -> Self {
        Self { song, cover }
    }

    pub fn song(&self) -> &Path {
        &self.song
    }

    pub fn cover(&self) -> Option<&Path> {
        self.cover.as_deref()
    }

    /// Borra los archivos ahora.
    pub fn discard(self) {
        drop(self);
    }
}

impl Drop for MediaFiles {
    fn drop(&mut self) {
        remove_quietly(&self.song);
        if let Some(cover) = &self.cover {
            remove_quietly(cover);
        }
    }
}

/// Archivo a medio descargar. Se borra al soltarse salvo que se llame a
/// [`PartialDownload::keep`], así un error o un abort de la tarea no deja
/// basura en disco.
#[derive(Debug)]
pub struct PartialDownload {
    path: Option<PathBuf>,
}

impl PartialDownload {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    /// Desarma la guarda; el archivo queda en disco.
    pub fn keep(mut self) -> PathBuf {
        self.path.take().unwrap_or_default()
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            remove_quietly(&path);
        }
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("🗑️ {} eliminado", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("⚠️ No se pudo eliminar {}: {}", path.display(), e),
    }
}

/// Canción lista para reproducir. Solo existe mientras sus archivos existen.
#[derive(Debug)]
pub struct ResolvedTrack {
    request: TrackRequest,
    source: ResolvedSource,
    files: MediaFiles,
}

impl ResolvedTrack {
    pub fn new(request: TrackRequest, source: ResolvedSource, files: MediaFiles) -> Self {
        Self {
            request,
            source,
            files,
        }
    }

    pub fn request(&self) -> &TrackRequest {
        &self.request
    }

    pub fn source(&self) -> &ResolvedSource {
        &self.source
    }

    pub fn media_path(&self) -> &Path {
        self.files.song()
    }

    pub fn cover_path(&self) -> Option<&Path> {
        self.files.cover()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.source.duration
    }

    /// Los metadatos del pedido (p. ej. los de Spotify) tienen prioridad
    /// sobre los de YouTube.
    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            title: self
                .request
                .title()
                .map_or_else(|| self.source.title.clone(), str::to_string),
            artist: self
                .request
                .artist()
                .map(str::to_string)
                .or_else(|| self.source.artist.clone()),
            duration: self.source.duration,
            page_url: self.source.page_url.clone(),
            cover_url: self
                .request
                .cover_url()
                .map(str::to_string)
                .or_else(|| self.source.cover_url.clone()),
            requested_by: self.request.requested_by(),
        }
    }
}

/// Vista clonable de una canción para mostrar en la UI y en el historial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSummary {
    pub title: String,
    pub artist: Option<String>,
    pub duration: Option<Duration>,
    pub page_url: String,
    pub cover_url: Option<String>,
    pub requested_by: Option<u64>,
}
