use async_process::Command;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{FetchError, MediaFetcher, ResolveError, ResolvedSource, SourceResolver};
use crate::audio::track::{TrackLookup, TrackRequest};

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// Cliente para interactuar con YouTube vía yt-dlp
pub struct YtDlpClient {
    program: String,
    http: reqwest::Client,
    // Limitar procesos concurrentes para evitar rate limiting
    rate_limiter: Semaphore,
}

/// Información extraída de yt-dlp (`--dump-json`)
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
}

/// Entrada de `--flat-playlist`
#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: String,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    url: Option<String>,
}

impl YtDlpClient {
    pub fn new(program: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            program: program.into(),
            http,
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Versión instalada de yt-dlp (para el health check).
    pub async fn version(&self) -> Result<String, ResolveError> {
        let stdout = self.run(&["--version"]).await?;
        Ok(stdout.trim().to_string())
    }

    async fn run(&self, args: &[&str]) -> Result<String, ResolveError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolveError::Tool(e.to_string()))?;

        // Si la tarea se aborta (stop/replace) el proceso muere con ella
        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ResolveError::Tool(format!("no se pudo ejecutar {}: {}", self.program, e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::Tool(error.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Argumento de yt-dlp para un pedido.
fn lookup_target(lookup: &TrackLookup) -> String {
    match lookup {
        TrackLookup::Query(query) => format!("ytsearch1:{}", query),
        TrackLookup::VideoId(id) => format!("{}{}", WATCH_URL_PREFIX, id),
    }
}

fn search_target(query: &str, limit: usize) -> String {
    format!("ytsearch{}:{}", limit.max(1), query)
}

fn parse_info(stdout: &str, target: &str) -> Result<ResolvedSource, ResolveError> {
    let line = stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| ResolveError::NotFound(target.to_string()))?;

    let info: YtDlpInfo = serde_json::from_str(line)?;

    Ok(ResolvedSource {
        page_url: info
            .webpage_url
            .unwrap_or_else(|| format!("{}{}", WATCH_URL_PREFIX, info.id)),
        artist: info.uploader.or(info.channel),
        duration: info
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(Duration::from_secs_f64),
        cover_url: info.thumbnail,
        title: info.title,
        id: info.id,
    })
}

fn parse_playlist(stdout: &str, limit: usize) -> Vec<TrackRequest> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<FlatEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("⚠️ Entrada de playlist ignorada: {}", e);
                None
            }
        })
        .take(limit)
        .map(|entry| {
            let source_url = entry
                .url
                .filter(|u| u.starts_with("http"))
                .unwrap_or_else(|| format!("{}{}", WATCH_URL_PREFIX, entry.id));

            let mut request = TrackRequest::video(entry.id).with_source_url(source_url);
            if let Some(title) = entry.title {
                request = request.with_title(title);
            }
            if let Some(artist) = entry.uploader.or(entry.channel) {
                request = request.with_artist(artist);
            }
            request
        })
        .collect()
}

/// Plantilla `-o` para que yt-dlp escriba exactamente en `destination`.
fn output_template(destination: &Path) -> PathBuf {
    destination.with_extension("%(ext)s")
}

#[async_trait]
impl SourceResolver for YtDlpClient {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedSource, ResolveError> {
        let target = lookup_target(request.lookup());
        info!("🔍 Resolviendo: {}", target);

        let stdout = self
            .run(&[
                "--no-playlist",
                "--dump-json",
                "--skip-download",
                "--no-warnings",
                &target,
            ])
            .await?;

        let source = parse_info(&stdout, &target)?;
        debug!("✅ Resuelto '{}' → {}", request.label(), source.page_url);
        Ok(source)
    }

    async fn expand_playlist(
        &self,
        url: &str,
        limit: usize,
    ) -> Result<Vec<TrackRequest>, ResolveError> {
        info!("📜 Expandiendo playlist: {}", url);

        let end = limit.to_string();
        let stdout = self
            .run(&[
                "--flat-playlist",
                "--dump-json",
                "--no-warnings",
                "--playlist-end",
                &end,
                url,
            ])
            .await?;

        let requests = parse_playlist(&stdout, limit);
        if requests.is_empty() {
            return Err(ResolveError::NotFound(url.to_string()));
        }

        info!("📜 Playlist con {} canciones", requests.len());
        Ok(requests)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackRequest>, ResolveError> {
        let target = search_target(query, limit);
        info!("🔍 Buscando opciones: {}", target);

        let stdout = self
            .run(&["--flat-playlist", "--dump-json", "--no-warnings", &target])
            .await?;

        let results = parse_playlist(&stdout, limit);
        if results.is_empty() {
            return Err(ResolveError::NotFound(query.to_string()));
        }
        Ok(results)
    }
}

#[async_trait]
impl MediaFetcher for YtDlpClient {
    async fn fetch(
        &self,
        source: &ResolvedSource,
        destination: &Path,
    ) -> Result<PathBuf, FetchError> {
        let template = output_template(destination);
        info!("⬇️ Descargando '{}' en {}", source.title, destination.display());

        let template = template.to_string_lossy().into_owned();
        self.run(&[
            "--no-playlist",
            "--no-warnings",
            "--quiet",
            // El destino ya existe vacío: lo reservó el storage
            "--force-overwrites",
            "-f",
            "bestaudio[ext=m4a]/bestaudio/best",
            "-x",
            "--audio-format",
            "m4a",
            "-o",
            &template,
            &source.page_url,
        ])
        .await
        .map_err(|e| FetchError::Tool(e.to_string()))?;

        if !tokio::fs::try_exists(destination).await? {
            return Err(FetchError::Missing(destination.to_path_buf()));
        }

        Ok(destination.to_path_buf())
    }

    async fn fetch_cover(&self, url: &str, destination: &Path) -> Result<PathBuf, FetchError> {
        let response = self.http.get(url).send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(destination).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        debug!("🖼️ Portada guardada en {}", destination.display());
        Ok(destination.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookup_targets() {
        assert_eq!(
            lookup_target(&TrackLookup::Query("lofi beats".into())),
            "ytsearch1:lofi beats"
        );
        assert_eq!(
            lookup_target(&TrackLookup::VideoId("B9v8jLBrvug".into())),
            "https://www.youtube.com/watch?v=B9v8jLBrvug"
        );
    }

    #[test]
    fn search_targets_ask_for_several_results() {
        assert_eq!(search_target("lofi beats", 5), "ytsearch5:lofi beats");
        assert_eq!(search_target("x", 0), "ytsearch1:x");
    }

    #[test]
    fn parses_dump_json() {
        let stdout = r#"{"id":"B9v8jLBrvug","title":"Some Song","duration":213.0,"uploader":"Some Artist","thumbnail":"https://i.ytimg.com/vi/B9v8jLBrvug/hq.jpg","webpage_url":"https://www.youtube.com/watch?v=B9v8jLBrvug","formats":[]}"#;

        let source = parse_info(stdout, "target").unwrap();
        assert_eq!(
            source,
            ResolvedSource {
                id: "B9v8jLBrvug".to_string(),
                title: "Some Song".to_string(),
                artist: Some("Some Artist".to_string()),
                duration: Some(Duration::from_secs(213)),
                cover_url: Some("https://i.ytimg.com/vi/B9v8jLBrvug/hq.jpg".to_string()),
                page_url: "https://www.youtube.com/watch?v=B9v8jLBrvug".to_string(),
            }
        );
    }

    #[test]
    fn empty_output_is_not_found() {
        assert!(matches!(
            parse_info("\n", "ytsearch1:nothing"),
            Err(ResolveError::NotFound(target)) if target == "ytsearch1:nothing"
        ));
    }

    #[test]
    fn live_streams_have_no_duration() {
        let stdout = r#"{"id":"abcdefghijk","title":"Live","duration":null}"#;
        let source = parse_info(stdout, "t").unwrap();
        assert_eq!(source.duration, None);
        assert_eq!(source.page_url, "https://www.youtube.com/watch?v=abcdefghijk");
    }

    #[test]
    fn parses_flat_playlist_respecting_limit() {
        let stdout = [
            r#"{"id":"aaaaaaaaaaa","title":"One","channel":"A","url":"https://www.youtube.com/watch?v=aaaaaaaaaaa"}"#,
            "not json",
            r#"{"id":"bbbbbbbbbbb","title":"Two"}"#,
            r#"{"id":"ccccccccccc","title":"Three"}"#,
        ]
        .join("\n");

        let requests = parse_playlist(&stdout, 2);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].lookup(), &TrackLookup::VideoId("aaaaaaaaaaa".into()));
        assert_eq!(requests[0].artist(), Some("A"));
        assert_eq!(requests[1].title(), Some("Two"));
        assert_eq!(
            requests[1].source_url(),
            Some("https://www.youtube.com/watch?v=bbbbbbbbbbb")
        );
    }

    #[test]
    fn output_template_keeps_stem() {
        assert_eq!(
            output_template(Path::new("song/HelloWorld.m4a")),
            PathBuf::from("song/HelloWorld.%(ext)s")
        );
    }
}
