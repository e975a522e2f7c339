//! Cliente mínimo de la Web API de Spotify.
//!
//! Spotify no entrega audio: cada canción de una playlist, álbum o track se
//! convierte en una búsqueda "artista título" que después resuelve yt-dlp.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::SpotifyKind;
use crate::audio::track::TrackRequest;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";
/// Máximo de items por página que acepta la API
const PAGE_SIZE: usize = 50;
/// Margen para renovar el token antes de que venza
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SpotifyError {
    #[error("error HTTP con Spotify: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Spotify respondió {status}: {message}")]
    Api {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("no existe en Spotify: {0}")]
    NotFound(String),
    #[error("respuesta de Spotify inválida: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("'{0}' no tiene canciones reproducibles")]
    Empty(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
    next: Option<String>,
}

/// Item de playlist; `track` es null para canciones borradas.
#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<Track>,
}

#[derive(Debug, Deserialize)]
struct Track {
    name: String,
    #[serde(default)]
    artists: Vec<Artist>,
    /// Ausente en los tracks simplificados de un álbum
    album: Option<AlbumImages>,
    #[serde(default)]
    is_local: bool,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumImages {
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Album {
    name: String,
    #[serde(default)]
    images: Vec<Image>,
    tracks: Page<Track>,
}

pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AccessToken>>,
}

impl SpotifyClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            http,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        }
    }

    /// Convierte un enlace de Spotify en pedidos de búsqueda (como mucho `limit`).
    pub async fn expand(
        &self,
        kind: SpotifyKind,
        id: &str,
        limit: usize,
    ) -> Result<Vec<TrackRequest>, SpotifyError> {
        info!("🟢 Leyendo {:?} de Spotify: {}", kind, id);

        let requests = match kind {
            SpotifyKind::Track => {
                let track: Track = self.get(&format!("{}/tracks/{}", API_BASE, id)).await?;
                track_request(track, None).into_iter().collect()
            }
            SpotifyKind::Playlist => self.playlist(id, limit).await?,
            SpotifyKind::Album => self.album(id, limit).await?,
        };

        if requests.is_empty() {
            return Err(SpotifyError::Empty(id.to_string()));
        }

        info!("🟢 {} canciones desde Spotify", requests.len());
        Ok(requests)
    }

    async fn playlist(&self, id: &str, limit: usize) -> Result<Vec<TrackRequest>, SpotifyError> {
        let mut requests = Vec::new();
        let mut next = Some(format!(
            "{}/playlists/{}/tracks?limit={}",
            API_BASE, id, PAGE_SIZE
        ));

        while let Some(url) = next.take() {
            let page: Page<PlaylistItem> = self.get(&url).await?;
            let tracks = page.items.into_iter().filter_map(|item| item.track);
            next = collect_page(&mut requests, tracks, None, page.next, limit);
        }

        Ok(requests)
    }

    async fn album(&self, id: &str, limit: usize) -> Result<Vec<TrackRequest>, SpotifyError> {
        let album: Album = self.get(&format!("{}/albums/{}", API_BASE, id)).await?;
        debug!("💿 Álbum '{}'", album.name);

        let cover = album_cover(&album.images);
        let mut requests = Vec::new();
        let mut next = collect_page(
            &mut requests,
            album.tracks.items,
            cover.as_deref(),
            album.tracks.next,
            limit,
        );

        while let Some(url) = next.take() {
            let page: Page<Track> = self.get(&url).await?;
            next = collect_page(&mut requests, page.items, cover.as_deref(), page.next, limit);
        }

        Ok(requests)
    }

    /// GET autenticado. Un 401 invalida el token y se reintenta una vez.
    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, SpotifyError> {
        let mut retried = false;

        loop {
            let token = self.access_token().await?;
            let response = self.http.get(url).bearer_auth(&token).send().await?;
            let status = response.status();

            if status == reqwest::StatusCode::UNAUTHORIZED && !retried {
                warn!("🔑 Token de Spotify rechazado, renovando");
                *self.token.lock().await = None;
                retried = true;
                continue;
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(SpotifyError::NotFound(url.to_string()));
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(SpotifyError::Api { status, message });
            }

            let body = response.text().await?;
            return Ok(serde_json::from_str(&body)?);
        }
    }

    /// Token client-credentials, cacheado hasta poco antes de vencer.
    async fn access_token(&self) -> Result<String, SpotifyError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("🔑 Pidiendo token de Spotify");
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SpotifyError::Api { status, message });
        }

        let token = parse_token(&response.text().await?, Instant::now())?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}

fn parse_token(body: &str, now: Instant) -> Result<AccessToken, SpotifyError> {
    let response: TokenResponse = serde_json::from_str(body)?;
    let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_MARGIN);

    Ok(AccessToken {
        value: response.access_token,
        expires_at: now + lifetime,
    })
}

/// Agrega una página a `requests` respetando `limit`. Devuelve la URL de la
/// página siguiente solo si todavía hace falta.
fn collect_page(
    requests: &mut Vec<TrackRequest>,
    tracks: impl IntoIterator<Item = Track>,
    cover: Option<&str>,
    next: Option<String>,
    limit: usize,
) -> Option<String> {
    for track in tracks {
        if requests.len() >= limit {
            return None;
        }
        if let Some(request) = track_request(track, cover) {
            requests.push(request);
        }
    }

    next.filter(|_| requests.len() < limit)
}

/// La imagen mediana (300px) si existe, si no la primera.
fn album_cover(images: &[Image]) -> Option<String> {
    images.get(1).or_else(|| images.first()).map(|i| i.url.clone())
}

/// "artista título" como búsqueda de YouTube, con la portada del álbum.
/// Los archivos locales no se pueden buscar.
fn track_request(track: Track, album_cover_url: Option<&str>) -> Option<TrackRequest> {
    if track.is_local || track.name.trim().is_empty() {
        return None;
    }

    let artists = track
        .artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let cover = album_cover_url
        .map(str::to_string)
        .or_else(|| track.album.as_ref().and_then(|a| album_cover(&a.images)));

    let query = if artists.is_empty() {
        track.name.clone()
    } else {
        format!("{} {}", artists.replace(", ", " "), track.name)
    };

    let mut request = TrackRequest::search(query).with_title(track.name);
    if !artists.is_empty() {
        request = request.with_artist(artists);
    }
    if let Some(cover) = cover {
        request = request.with_cover_url(cover);
    }
    Some(request)
}
