use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use super::{commands::BotCommand, search, voice::SongbirdConnector, RelayBot};
use crate::{
    audio::{player::PlayerError, track::TrackRequest},
    sources::{classify, QueryKind, SpotifyKind},
    ui::embeds,
};

/// Qué hacer con la entrada de `/play`.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayPlan {
    /// Una canción (URL o búsqueda) que se agrega al final de la cola
    Enqueue(TrackRequest),
    /// Playlist que reemplaza todo lo pendiente
    Playlist { url: String },
    /// Enlace de Spotify: se lee con la API y se busca en YouTube
    Spotify { kind: SpotifyKind, id: String },
    Reject(String),
}

/// Pedidos listos para el player.
#[derive(Debug, Clone, PartialEq)]
pub enum Playback {
    Append(Vec<TrackRequest>),
    /// Corta lo que suena y descarta lo pendiente
    Replace(Vec<TrackRequest>),
}

impl Playback {
    fn requests(&self) -> &[TrackRequest] {
        match self {
            Self::Append(requests) | Self::Replace(requests) => requests,
        }
    }
}

/// Motivo para no reproducir, con título y texto para el embed de error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRejection {
    pub title: &'static str,
    pub reason: String,
}

impl PlayRejection {
    fn new(title: &'static str, reason: impl Into<String>) -> Self {
        Self {
            title,
            reason: reason.into(),
        }
    }
}

pub fn plan_play(query: &str, user_id: u64) -> PlayPlan {
    if query.trim().is_empty() {
        return PlayPlan::Reject("Escribe una URL de YouTube o Spotify, o qué canción buscar".to_string());
    }

    match classify(query) {
        QueryKind::YouTubeTrack { id } => {
            let url = format!("https://www.youtube.com/watch?v={}", id);
            PlayPlan::Enqueue(
                TrackRequest::video(id)
                    .with_source_url(url)
                    .with_requested_by(user_id),
            )
        }
        QueryKind::YouTubePlaylist { url, .. } => PlayPlan::Playlist { url },
        QueryKind::Search(text) => {
            PlayPlan::Enqueue(TrackRequest::search(text).with_requested_by(user_id))
        }
        QueryKind::Spotify { kind, id } => PlayPlan::Spotify { kind, id },
        QueryKind::UnsupportedUrl(url) => {
            PlayPlan::Reject(format!("No sé reproducir este enlace: {}", url))
        }
    }
}

/// Resuelve playlists y enlaces de Spotify. Un track suelto se agrega a la
/// cola; una playlist o un álbum la reemplazan.
async fn expand_plan(bot: &RelayBot, plan: PlayPlan, user_id: u64) -> Result<Playback, PlayRejection> {
    let limit = bot.config().max_playlist_size;

    let playback = match plan {
        PlayPlan::Reject(reason) => return Err(PlayRejection::new("No se puede reproducir", reason)),
        PlayPlan::Enqueue(request) => Playback::Append(vec![request]),
        PlayPlan::Playlist { url } => {
            let requests = bot
                .player()
                .worker()
                .resolver()
                .expand_playlist(&url, limit)
                .await
                .map_err(|e| {
                    warn!("❌ No se pudo cargar la playlist {}: {}", url, e);
                    PlayRejection::new("Playlist no disponible", e.to_string())
                })?;
            Playback::Replace(requests)
        }
        PlayPlan::Spotify { kind, id } => {
            let spotify = bot.spotify().ok_or_else(|| {
                PlayRejection::new("Spotify no configurado", "Faltan las credenciales de Spotify del bot")
            })?;
            let requests = spotify.expand(kind, &id, limit).await.map_err(|e| {
                warn!("❌ No se pudo leer {:?} {} de Spotify: {}", kind, id, e);
                PlayRejection::new("Spotify no disponible", e.to_string())
            })?;
            match kind {
                SpotifyKind::Track => Playback::Append(requests),
                SpotifyKind::Playlist | SpotifyKind::Album => Playback::Replace(requests),
            }
        }
    };

    let tag = |requests: Vec<TrackRequest>| -> Vec<TrackRequest> {
        requests
            .into_iter()
            .map(|r| r.with_requested_by(user_id))
            .collect()
    };
    Ok(match playback {
        Playback::Append(requests) => Playback::Append(tag(requests)),
        Playback::Replace(requests) => Playback::Replace(tag(requests)),
    })
}

/// Reclama la sesión y entrega los pedidos al player. El claim se mantiene
/// hasta que el player aceptó los pedidos.
pub(super) async fn start_playback(
    ctx: &Context,
    bot: &RelayBot,
    guild_id: GuildId,
    channel_id: ChannelId,
    playback: Playback,
) -> Result<Vec<TrackRequest>, PlayRejection> {
    let Some(_claim) = bot.claim_session(guild_id).await else {
        return Err(PlayRejection::new(
            "Ocupado",
            "Ya estoy reproduciendo música en otro servidor",
        ));
    };

    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| PlayRejection::new("Voz no disponible", "Songbird no inicializado"))?;
    let connector = SongbirdConnector::new(manager, guild_id, channel_id);

    let requests = playback.requests().to_vec();
    let result = match playback {
        Playback::Append(requests) => bot.player().enqueue(requests, &connector).await,
        Playback::Replace(requests) => bot.player().replace(requests, &connector).await,
    };

    match result {
        Ok(_) => Ok(requests),
        Err(e) => {
            warn!("❌ Error al encolar en guild {}: {}", guild_id, e);
            Err(PlayRejection::new("No se pudo conectar", e.to_string()))
        }
    }
}

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &RelayBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str());

    let Some(parsed) = BotCommand::parse(&command.data.name, query) else {
        return respond(
            ctx,
            &command,
            embeds::create_error_embed(
                "Comando no reconocido",
                "Usa /play, /search, /skip, /stop, /queue o /failed",
            ),
            true,
        )
        .await;
    };

    bot.announcer().bind(ctx.http.clone(), command.channel_id);

    match parsed {
        BotCommand::Play { query } => handle_play(ctx, &command, bot, guild_id, &query).await,
        BotCommand::Search { query } => {
            search::handle_search_command(ctx, &command, bot, guild_id, &query).await
        }
        BotCommand::Skip => handle_skip(ctx, &command, bot, guild_id).await,
        BotCommand::Stop => handle_stop(ctx, &command, bot, guild_id).await,
        BotCommand::Queue => handle_queue(ctx, &command, bot).await,
        BotCommand::Failed => handle_failed(ctx, &command, bot).await,
    }
}

/// Maneja interacciones con componentes (menú de `/search`)
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &RelayBot,
) -> Result<()> {
    info!(
        "🔘 Componente {} usado por {}",
        component.data.custom_id, component.user.name
    );

    if search::is_search_menu(&component.data.custom_id) {
        bot.announcer().bind(ctx.http.clone(), component.channel_id);
        return search::handle_search_selection(ctx, &component, bot).await;
    }

    warn!("⚠️ Componente desconocido: {}", component.data.custom_id);
    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &RelayBot,
    guild_id: GuildId,
    query: &str,
) -> Result<()> {
    // Defer la respuesta ya que puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let channel_id = match get_user_voice_channel(ctx, guild_id, command.user.id) {
        Ok(channel_id) => channel_id,
        Err(e) => return edit_error(ctx, command, "Sin canal de voz", &e.to_string()).await,
    };

    // Las playlists se expanden antes de reclamar la sesión
    let user_id = command.user.id.get();
    let outcome = match expand_plan(bot, plan_play(query, user_id), user_id).await {
        Ok(playback) => start_playback(ctx, bot, guild_id, channel_id, playback).await,
        Err(rejection) => Err(rejection),
    };

    match outcome {
        Ok(requests) => {
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new().embed(embeds::create_enqueued_embed(&requests)),
                )
                .await?;
            Ok(())
        }
        Err(rejection) => edit_error(ctx, command, rejection.title, &rejection.reason).await,
    }
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &RelayBot,
    guild_id: GuildId,
) -> Result<()> {
    let result = if bot.owns_session(guild_id).await {
        bot.player().skip().await
    } else {
        Err(PlayerError::NotPlaying)
    };

    match result {
        Ok(()) => {
            respond(
                ctx,
                command,
                embeds::create_success_embed("Saltada", "⏭️ Pasando a la siguiente canción"),
                false,
            )
            .await
        }
        Err(e) => respond(ctx, command, embeds::create_error_embed("Nada que saltar", &e.to_string()), true).await,
    }
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &RelayBot,
    guild_id: GuildId,
) -> Result<()> {
    if !bot.owns_session(guild_id).await {
        return respond(
            ctx,
            command,
            embeds::create_error_embed("Nada que detener", &PlayerError::NotPlaying.to_string()),
            true,
        )
        .await;
    }

    // stop espera a que la sesión termine, puede tardar más que el límite de respuesta
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    match bot.player().stop().await {
        Ok(()) => {
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new().embed(embeds::create_success_embed(
                        "Detenido",
                        "⏹️ Reproducción detenida y cola limpiada",
                    )),
                )
                .await?;
            Ok(())
        }
        Err(e) => edit_error(ctx, command, "Nada que detener", &e.to_string()).await,
    }
}

async fn handle_queue(ctx: &Context, command: &CommandInteraction, bot: &RelayBot) -> Result<()> {
    let embed = match bot.player().snapshot() {
        Ok(snapshot) => embeds::create_queue_embed(&snapshot),
        Err(e) => embeds::create_error_embed("Cola no disponible", &e.to_string()),
    };

    respond(ctx, command, embed, false).await
}

async fn handle_failed(ctx: &Context, command: &CommandInteraction, bot: &RelayBot) -> Result<()> {
    let embed = match bot.player().failed() {
        Ok(failed) => embeds::create_failed_embed(&failed),
        Err(e) => embeds::create_error_embed("Lista no disponible", &e.to_string()),
    };

    respond(ctx, command, embed, true).await
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    embed: CreateEmbed,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;

    Ok(())
}

async fn edit_error(
    ctx: &Context,
    command: &CommandInteraction,
    title: &str,
    description: &str,
) -> Result<()> {
    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().embed(embeds::create_error_embed(title, description)),
        )
        .await?;

    Ok(())
}

pub(super) fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild no encontrada en caché"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("Debes estar en un canal de voz"))?;

    Ok(channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        announce::SilentAnnouncer,
        decoder::FfmpegTranscoder,
        download::{DownloadConfig, DownloadWorker},
        player::{PlaybackConfig, Player},
        track::TrackLookup,
    };
    use crate::bot::announcer::ChannelAnnouncer;
    use crate::config::Config;
    use crate::sources::{MockMediaFetcher, MockSourceResolver};
    use crate::storage::MediaStorage;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    async fn bot(dir: &std::path::Path, resolver: MockSourceResolver) -> RelayBot {
        let storage = MediaStorage::new(dir.join("song"), dir.join("cover"))
            .await
            .unwrap();
        let worker = Arc::new(DownloadWorker::new(
            Arc::new(resolver),
            Arc::new(MockMediaFetcher::new()),
            storage,
            Arc::new(SilentAnnouncer),
            DownloadConfig::default(),
        ));
        let player = Player::new(
            PlaybackConfig::default(),
            worker,
            Arc::new(FfmpegTranscoder::new("ffmpeg", Duration::from_secs(15))),
            Arc::new(SilentAnnouncer),
        );
        let config = Config {
            max_playlist_size: 3,
            ..Config::default()
        };

        RelayBot::new(
            Arc::new(config),
            player,
            Arc::new(ChannelAnnouncer::new("https://img.example/default.png")),
        )
    }

    #[test]
    fn track_urls_become_video_requests() {
        let PlayPlan::Enqueue(request) = plan_play("https://youtu.be/B9v8jLBrvug", 7) else {
            panic!("se esperaba una canción");
        };

        assert_eq!(request.lookup(), &TrackLookup::VideoId("B9v8jLBrvug".into()));
        assert_eq!(
            request.source_url(),
            Some("https://www.youtube.com/watch?v=B9v8jLBrvug")
        );
        assert_eq!(request.requested_by(), Some(7));
    }

    #[test]
    fn free_text_becomes_search() {
        let PlayPlan::Enqueue(request) = plan_play("daft punk one more time", 1) else {
            panic!("se esperaba una búsqueda");
        };
        assert_eq!(
            request.lookup(),
            &TrackLookup::Query("daft punk one more time".into())
        );
    }

    #[test]
    fn playlists_are_expanded_later() {
        let url = "https://www.youtube.com/playlist?list=PLFgquLnL59alCl_2TQvOiD5Vgm1hCaGSI";
        assert_eq!(
            plan_play(url, 1),
            PlayPlan::Playlist {
                url: url.to_string()
            }
        );
    }

    #[test]
    fn spotify_links_are_read_later() {
        assert_eq!(
            plan_play("https://open.spotify.com/album/4HklP3MTUYViTMiNdj43R3?si=x", 1),
            PlayPlan::Spotify {
                kind: SpotifyKind::Album,
                id: "4HklP3MTUYViTMiNdj43R3".to_string()
            }
        );
    }

    #[test]
    fn unsupported_inputs_are_rejected() {
        assert!(matches!(plan_play("   ", 1), PlayPlan::Reject(_)));
        assert!(matches!(
            plan_play("https://soundcloud.com/artist/song", 1),
            PlayPlan::Reject(_)
        ));
    }

    #[tokio::test]
    async fn playlists_replace_the_queue_for_the_requester() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = MockSourceResolver::new();
        resolver
            .expect_expand_playlist()
            .withf(|_, limit| *limit == 3)
            .returning(|_, _| {
                Ok(vec![
                    TrackRequest::video("aaaaaaaaaaa"),
                    TrackRequest::video("bbbbbbbbbbb"),
                ])
            });
        let bot = bot(dir.path(), resolver).await;

        let plan = PlayPlan::Playlist {
            url: "https://www.youtube.com/playlist?list=x".to_string(),
        };
        let Playback::Replace(requests) = expand_plan(&bot, plan, 9).await.unwrap() else {
            panic!("una playlist reemplaza la cola");
        };

        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.requested_by() == Some(9)));
    }

    #[tokio::test]
    async fn single_requests_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot(dir.path(), MockSourceResolver::new()).await;

        let plan = plan_play("lofi beats", 4);
        let playback = expand_plan(&bot, plan, 4).await.unwrap();
        assert!(matches!(playback, Playback::Append(ref r) if r.len() == 1));
    }

    #[tokio::test]
    async fn spotify_without_credentials_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot(dir.path(), MockSourceResolver::new()).await;

        let plan = plan_play("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC", 1);
        let rejection = expand_plan(&bot, plan, 1).await.unwrap_err();
        assert_eq!(rejection.title, "Spotify no configurado");
    }
}
