//! Resolución de pedidos a medios descargables.
//!
//! El pipeline solo conoce los traits [`SourceResolver`] y [`MediaFetcher`];
//! [`ytdlp::YtDlpClient`] es la implementación que usa el bot. Los enlaces de
//! Spotify se convierten antes en búsquedas con [`spotify::SpotifyClient`].

pub mod spotify;
pub mod ytdlp;

use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

use crate::audio::track::TrackRequest;

pub use spotify::SpotifyClient;
pub use ytdlp::YtDlpClient;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("sin resultados para '{0}'")]
    NotFound(String),
    #[error("fuente no soportada: {0}")]
    Unsupported(String),
    #[error("yt-dlp falló: {0}")]
    Tool(String),
    #[error("respuesta de yt-dlp inválida: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("la descarga falló: {0}")]
    Tool(String),
    #[error("la descarga terminó sin archivo en {0}")]
    Missing(PathBuf),
    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),
    #[error("error HTTP: {0}")]
    Http(#[from] reqwest::Error),
}

/// Medio remoto ya identificado, listo para descargarse.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub duration: Option<Duration>,
    pub cover_url: Option<String>,
    pub page_url: String,
}

/// Trait común para las fuentes que convierten un pedido en un medio concreto
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedSource, ResolveError>;

    /// Expande una playlist en pedidos individuales (como mucho `limit`).
    async fn expand_playlist(
        &self,
        url: &str,
        limit: usize,
    ) -> Result<Vec<TrackRequest>, ResolveError>;

    /// Primeros `limit` resultados de una búsqueda, para que el usuario elija.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackRequest>, ResolveError>;
}

/// Descarga de audio y portadas a disco.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Descarga el audio en `destination` y devuelve la ruta final.
    async fn fetch(
        &self,
        source: &ResolvedSource,
        destination: &Path,
    ) -> Result<PathBuf, FetchError>;

    async fn fetch_cover(&self, url: &str, destination: &Path) -> Result<PathBuf, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotifyKind {
    Playlist,
    Album,
    Track,
}

/// Qué tipo de entrada escribió el usuario en `play`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    YouTubeTrack { id: String },
    YouTubePlaylist { id: String, url: String },
    Spotify { kind: SpotifyKind, id: String },
    /// Otra URL que no sabemos manejar
    UnsupportedUrl(String),
    Search(String),
}

static SPOTIFY_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://open\.spotify\.com/(playlist|album|track)/([a-zA-Z0-9]+)")
        .expect("regex válida")
});

static YOUTUBE_PLAYLIST_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://(?:www\.|music\.)?youtube\.com/playlist\?list=([a-zA-Z0-9\-_]{34})")
        .expect("regex válida")
});

static YOUTUBE_TRACK_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.|music\.)?(?:youtube\.com/watch\?v=|youtu\.be/)([a-zA-Z0-9\-_]{11})",
    )
    .expect("regex válida")
});

/// Clasifica la entrada de `play`.
pub fn classify(input: &str) -> QueryKind {
    let input = input.trim();

    if let Some(caps) = SPOTIFY_URL.captures(input) {
        let kind = match &caps[1] {
            "playlist" => SpotifyKind::Playlist,
            "album" => SpotifyKind::Album,
            _ => SpotifyKind::Track,
        };
        return QueryKind::Spotify {
            kind,
            id: caps[2].to_string(),
        };
    }

    if let Some(caps) = YOUTUBE_PLAYLIST_URL.captures(input) {
        return QueryKind::YouTubePlaylist {
            id: caps[1].to_string(),
            url: input.to_string(),
        };
    }

    if let Some(caps) = YOUTUBE_TRACK_URL.captures(input) {
        return QueryKind::YouTubeTrack {
            id: caps[1].to_string(),
        };
    }

    if url::Url::parse(input).is_ok_and(|u| matches!(u.scheme(), "http" | "https")) {
        return QueryKind::UnsupportedUrl(input.to_string());
    }

    QueryKind::Search(input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classifies_spotify_urls() {
        let cases = [
            (
                "https://open.spotify.com/playlist/37i9dQZF1DZ06evO1fLAgU?si=5y39c0TYQVKyMbyErnaYIA",
                SpotifyKind::Playlist,
                "37i9dQZF1DZ06evO1fLAgU",
            ),
            (
                "https://open.spotify.com/album/4HklP3MTUYViTMiNdj43R3?si=OZ98hcJ3Rkqz0CxG5ejexA",
                SpotifyKind::Album,
                "4HklP3MTUYViTMiNdj43R3",
            ),
            (
                "https://open.spotify.com/track/2az3iTNyJ1M1JJnsU2Gq6H?si=EHR4hOb_ThuDYHveInMmcg",
                SpotifyKind::Track,
                "2az3iTNyJ1M1JJnsU2Gq6H",
            ),
        ];

        for (url, kind, id) in cases {
            assert_eq!(
                classify(url),
                QueryKind::Spotify {
                    kind,
                    id: id.to_string()
                }
            );
        }
    }

    #[test]
    fn classifies_youtube_urls() {
        assert_eq!(
            classify("https://www.youtube.com/playlist?list=PL4o29bINVT4EG_y-k5jGoOu3-Am8Nvi10"),
            QueryKind::YouTubePlaylist {
                id: "PL4o29bINVT4EG_y-k5jGoOu3-Am8Nvi10".to_string(),
                url: "https://www.youtube.com/playlist?list=PL4o29bINVT4EG_y-k5jGoOu3-Am8Nvi10"
                    .to_string(),
            }
        );
        assert_eq!(
            classify("https://www.youtube.com/watch?v=B9v8jLBrvug"),
            QueryKind::YouTubeTrack {
                id: "B9v8jLBrvug".to_string()
            }
        );
        assert_eq!(
            classify("https://youtu.be/SlPhMPnQ58k"),
            QueryKind::YouTubeTrack {
                id: "SlPhMPnQ58k".to_string()
            }
        );
    }

    #[test]
    fn other_urls_are_unsupported() {
        assert_eq!(
            classify("https://google.com"),
            QueryKind::UnsupportedUrl("https://google.com".to_string())
        );
    }

    #[test]
    fn free_text_is_a_search() {
        assert_eq!(
            classify("  never gonna give you up "),
            QueryKind::Search("never gonna give you up".to_string())
        );
    }
}
