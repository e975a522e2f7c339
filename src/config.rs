use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Spotify (opcional, client credentials)
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,

    // Audio
    pub opus_bitrate: u32,
    pub frame_buffer: usize,
    #[serde(with = "humantime_serde_compat")]
    pub decoder_stall_timeout: Duration,

    // Descargas
    pub download_concurrency: usize,
    pub max_playlist_size: usize,
    pub max_history: usize,

    // Paths
    pub download_dir: PathBuf,
    pub cover_dir: PathBuf,
    pub ffmpeg_path: String,
    pub ytdlp_path: String,

    // UI
    pub default_cover_url: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Spotify
            spotify_client_id: std::env::var("SPOTIFY_CLIENT_ID").ok().filter(|s| !s.is_empty()),
            spotify_client_secret: std::env::var("SPOTIFY_CLIENT_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),

            // Audio
            opus_bitrate: std::env::var("OPUS_BITRATE")
                .unwrap_or_else(|_| "96000".to_string()) // 96kbps (Discord default)
                .parse()?,
            frame_buffer: std::env::var("FRAME_BUFFER")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,
            decoder_stall_timeout: humantime::parse_duration(
                &std::env::var("DECODER_STALL_TIMEOUT").unwrap_or_else(|_| "15s".to_string()),
            )
            .context("DECODER_STALL_TIMEOUT inválido")?,

            // Descargas
            download_concurrency: std::env::var("DOWNLOAD_CONCURRENCY")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,
            max_playlist_size: std::env::var("MAX_PLAYLIST_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            max_history: std::env::var("MAX_HISTORY")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,

            // Paths
            download_dir: std::env::var("DOWNLOAD_DIR")
                .unwrap_or_else(|_| "song".to_string())
                .into(),
            cover_dir: std::env::var("COVER_DIR")
                .unwrap_or_else(|_| "cover".to_string())
                .into(),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),

            default_cover_url: std::env::var("DEFAULT_COVER_URL")
                .unwrap_or_else(|_| Self::default().default_cover_url),
        };

        // Crear directorios de medios si no existen
        std::fs::create_dir_all(&config.download_dir)?;
        std::fs::create_dir_all(&config.cover_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Opus bitrate must be between 8kbps and 510kbps
    /// - Download concurrency and frame buffer must be greater than 0
    /// - The decoder stall timeout must be at least one frame long (20ms)
    /// - Spotify credentials come in pairs
    pub fn validate(&self) -> Result<()> {
        if self.opus_bitrate > 510000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.download_concurrency == 0 {
            anyhow::bail!("Download concurrency must be greater than 0");
        }

        if self.frame_buffer == 0 {
            anyhow::bail!("Frame buffer must be greater than 0");
        }

        if self.decoder_stall_timeout < Duration::from_millis(20) {
            anyhow::bail!(
                "Decoder stall timeout must be at least 20ms, got: {}",
                humantime::format_duration(self.decoder_stall_timeout)
            );
        }

        if self.spotify_client_id.is_some() != self.spotify_client_secret.is_some() {
            anyhow::bail!("SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set together");
        }

        Ok(())
    }

    /// Credenciales de Spotify si ambas están configuradas.
    pub fn spotify_credentials(&self) -> Option<(&str, &str)> {
        Some((
            self.spotify_client_id.as_deref()?,
            self.spotify_client_secret.as_deref()?,
        ))
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token and the Spotify secret are never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: {}\n  \
            Spotify: {}\n  \
            Audio: {}kbps, {} frame buffer, {} stall timeout\n  \
            Downloads: {} concurrent, {} max playlist, {} history\n  \
            Paths: songs={}, covers={}, ffmpeg={}, yt-dlp={}",
            self.guild_id.map_or("global".to_string(), |id| format!("guild {}", id)),
            if self.spotify_credentials().is_some() { "enabled" } else { "disabled" },
            self.opus_bitrate / 1000,
            self.frame_buffer,
            humantime::format_duration(self.decoder_stall_timeout),
            self.download_concurrency,
            self.max_playlist_size,
            self.max_history,
            self.download_dir.display(),
            self.cover_dir.display(),
            self.ffmpeg_path,
            self.ytdlp_path,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin default - debe proveerse)
            discord_token: String::new(),
            guild_id: None,

            spotify_client_id: None,
            spotify_client_secret: None,

            opus_bitrate: 96000,
            frame_buffer: 2,
            decoder_stall_timeout: Duration::from_secs(15),

            download_concurrency: 2,
            max_playlist_size: 100,
            max_history: 50,

            download_dir: "song".into(),
            cover_dir: "cover".into(),
            ffmpeg_path: "ffmpeg".to_string(),
            ytdlp_path: "yt-dlp".to_string(),

            default_cover_url: "https://i.imgur.com/Kp9G5Ue.png".to_string(),
        }
    }
}

/// Serializa `Duration` como texto humano ("15s") para que el resumen y el
/// volcado de configuración usen el mismo formato que las variables de entorno.
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
