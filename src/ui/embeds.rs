use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    player::{HistoryEntry, PlayOutcome, QueueSnapshot},
    track::{TrackRequest, TrackSummary},
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Relay Music";

/// Cuántas líneas mostrar como máximo en listas (cola, errores, historial)
const MAX_LIST_LINES: usize = 10;

/// Embed de "reproduciendo ahora". Si la canción no trae portada se usa
/// `default_cover_url`.
pub fn create_now_playing_embed(track: &TrackSummary, default_cover_url: &str) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title))
        .url(&track.page_url)
        .color(colors::SUCCESS_GREEN)
        .field(
            "🎤 Artista",
            track.artist.as_deref().unwrap_or("Desconocido"),
            true,
        )
        .field("⏱️ Duración", duration_label(track.duration), true);

    if let Some(user_id) = track.requested_by {
        embed = embed.field("👤 Solicitado por", format!("<@{}>", user_id), true);
    }

    embed
        .thumbnail(track.cover_url.as_deref().unwrap_or(default_cover_url))
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Embed de confirmación al encolar pedidos.
pub fn create_enqueued_embed(requests: &[TrackRequest]) -> CreateEmbed {
    let embed = match requests {
        [single] => CreateEmbed::default()
            .title("✅ Agregado a la Cola")
            .description(format!("**{}**", single.label())),
        many => CreateEmbed::default()
            .title("📋 Playlist Agregada")
            .description(format!(
                "Se agregaron **{} canciones** a la cola de reproducción",
                many.len()
            )),
    };

    embed
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new(
            "🎵 La reproducción comenzará automáticamente",
        ))
        .timestamp(Timestamp::now())
}

/// Resultados de `/search`; la elección se hace en el menú de abajo.
pub fn create_search_results_embed(query: &str, results: &[TrackRequest]) -> CreateEmbed {
    let lines: Vec<String> = results.iter().map(request_line).collect();

    CreateEmbed::default()
        .title("🔍 Resultados de Búsqueda")
        .description(format!(
            "Búsqueda: **{}**\nSelecciona una canción del menú inferior:",
            query
        ))
        .field("Canciones Encontradas", numbered(&lines), false)
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    embed = match &snapshot.current {
        Some(current) => embed.field("▶️ Sonando", track_line(current), false),
        None => embed.field("▶️ Sonando", "Nada", false),
    };

    if !snapshot.ready.is_empty() {
        let lines: Vec<String> = snapshot.ready.iter().map(track_line).collect();
        embed = embed.field(
            format!("✅ Listas ({})", snapshot.ready.len()),
            numbered(&lines),
            false,
        );
    }

    if !snapshot.pending.is_empty() {
        embed = embed.field(
            format!("⬇️ Descargando ({})", snapshot.pending.len()),
            numbered(&snapshot.pending),
            false,
        );
    }

    embed
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Lista de pedidos que no se pudieron resolver o descargar.
pub fn create_failed_embed(failed: &[TrackRequest]) -> CreateEmbed {
    let description = if failed.is_empty() {
        "No hubo errores en esta sesión".to_string()
    } else {
        let lines: Vec<String> = failed.iter().map(|r| r.label().to_string()).collect();
        numbered(&lines)
    };

    CreateEmbed::default()
        .title("⚠️ Canciones con Error")
        .description(description)
        .color(colors::WARNING_ORANGE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_history_embed(history: &[HistoryEntry]) -> CreateEmbed {
    let lines: Vec<String> = history
        .iter()
        .map(|entry| format!("{} {}", outcome_emoji(entry.outcome), track_line(&entry.track)))
        .collect();

    CreateEmbed::default()
        .title("📜 Reproducido en esta Sesión")
        .description(numbered(&lines))
        .color(colors::NEUTRAL_GRAY)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn create_farewell_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("👋 ¡Hasta luego!")
        .description("No quedan canciones en la cola")
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn outcome_emoji(outcome: PlayOutcome) -> &'static str {
    match outcome {
        PlayOutcome::Finished => "✅",
        PlayOutcome::Skipped => "⏭️",
        PlayOutcome::Stopped => "⏹️",
        PlayOutcome::Failed => "❌",
    }
}

fn track_line(track: &TrackSummary) -> String {
    match &track.artist {
        Some(artist) => format!(
            "**{}** - {} `{}`",
            track.title,
            artist,
            duration_label(track.duration)
        ),
        None => format!("**{}** `{}`", track.title, duration_label(track.duration)),
    }
}

fn request_line(request: &TrackRequest) -> String {
    match request.artist() {
        Some(artist) => format!("**{}** - {}", request.label(), artist),
        None => format!("**{}**", request.label()),
    }
}

/// Numera las primeras líneas y resume el resto.
fn numbered(lines: &[String]) -> String {
    let mut out: Vec<String> = lines
        .iter()
        .take(MAX_LIST_LINES)
        .enumerate()
        .map(|(i, line)| format!("`{}.` {}", i + 1, line))
        .collect();

    if lines.len() > MAX_LIST_LINES {
        out.push(format!("... y {} más", lines.len() - MAX_LIST_LINES));
    }

    out.join("\n")
}

fn duration_label(duration: Option<Duration>) -> String {
    match duration {
        Some(duration) => format_duration(duration),
        None => "🔴 En vivo".to_string(),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn summary(title: &str, artist: Option<&str>, secs: Option<u64>) -> TrackSummary {
        TrackSummary {
            title: title.to_string(),
            artist: artist.map(str::to_string),
            duration: secs.map(Duration::from_secs),
            page_url: "https://www.youtube.com/watch?v=B9v8jLBrvug".to_string(),
            cover_url: None,
            requested_by: None,
        }
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_secs(59)), "0:59");
        assert_eq!(format_duration(Duration::from_secs(213)), "3:33");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn track_lines_mark_live_streams() {
        assert_eq!(
            track_line(&summary("Song", Some("Band"), Some(61))),
            "**Song** - Band `1:01`"
        );
        assert_eq!(track_line(&summary("Radio", None, None)), "**Radio** `🔴 En vivo`");
    }

    #[test]
    fn long_lists_are_truncated() {
        let lines: Vec<String> = (1..=13).map(|i| format!("t{}", i)).collect();
        let text = numbered(&lines);

        assert!(text.starts_with("`1.` t1\n"));
        assert!(text.contains("`10.` t10"));
        assert!(!text.contains("t11"));
        assert!(text.ends_with("... y 3 más"));
    }

    #[test]
    fn search_result_lines_show_artist_when_known() {
        assert_eq!(
            request_line(&TrackRequest::video("abc").with_title("Song").with_artist("Band")),
            "**Song** - Band"
        );
        assert_eq!(request_line(&TrackRequest::search("lofi")), "**lofi**");
    }
}
