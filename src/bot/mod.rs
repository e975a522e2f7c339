//! # Bot Module
//!
//! Discord glue for the relay: slash-command registration and dispatch,
//! the songbird voice transport and the channel announcer.
//!
//! The bot drives a single [`Player`]. Only one voice session exists at a
//! time, owned by the guild that started it.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

pub mod announcer;
pub mod commands;
pub mod events;
pub mod handlers;
pub mod search;
pub mod voice;

use crate::audio::player::{Phase, Player, PlayerStatus};
use crate::config::Config;
use crate::sources::SpotifyClient;
use announcer::ChannelAnnouncer;

pub struct RelayBot {
    config: Arc<Config>,
    player: Player,
    announcer: Arc<ChannelAnnouncer>,
    spotify: Option<SpotifyClient>,
    /// Guild dueña de la sesión de voz actual. El lock se mantiene mientras
    /// un comando abre la sesión o encola, ver [`SessionClaim`].
    active_guild: Arc<Mutex<Option<GuildId>>>,
}

/// Reserva de la sesión para una guild. Mientras vive nadie más puede
/// reclamarla, así el chequeo y el encolado son atómicos.
pub struct SessionClaim<'a> {
    _owner: MutexGuard<'a, Option<GuildId>>,
}

/// Cambio de canal de voz del propio bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotVoiceChange {
    pub guild_id: Option<GuildId>,
    pub old_channel: Option<ChannelId>,
    pub new_channel: Option<ChannelId>,
}

/// `true` si alguien sacó al bot del canal de la sesión abierta.
pub fn is_external_disconnect(change: &BotVoiceChange, active: Option<GuildId>, phase: Phase) -> bool {
    change.new_channel.is_none()
        && change.old_channel.is_some()
        && change.guild_id.is_some()
        && change.guild_id == active
        && phase != Phase::Disconnected
}

impl RelayBot {
    /// Debe llamarse dentro del runtime de tokio: lanza la tarea que libera
    /// la guild dueña cuando la sesión se cierra.
    pub fn new(config: Arc<Config>, player: Player, announcer: Arc<ChannelAnnouncer>) -> Self {
        let spotify = config
            .spotify_credentials()
            .map(|(id, secret)| SpotifyClient::new(id, secret));
        if spotify.is_none() {
            info!("🟢 Spotify deshabilitado: faltan SPOTIFY_CLIENT_ID/SPOTIFY_CLIENT_SECRET");
        }

        let active_guild = Arc::new(Mutex::new(None));
        release_on_disconnect(player.subscribe(), active_guild.clone());

        Self {
            config,
            player,
            announcer,
            spotify,
            active_guild,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn announcer(&self) -> &ChannelAnnouncer {
        &self.announcer
    }

    pub fn spotify(&self) -> Option<&SpotifyClient> {
        self.spotify.as_ref()
    }

    /// Reserva la sesión para `guild_id`. `None` si otra guild tiene una
    /// sesión abierta. Si otro comando está abriendo o encolando, espera a
    /// que termine y decide con la sesión ya abierta.
    pub async fn claim_session(&self, guild_id: GuildId) -> Option<SessionClaim<'_>> {
        let mut owner = self.active_guild.lock().await;
        let open = self.player.status().phase != Phase::Disconnected;

        if open && *owner != Some(guild_id) {
            return None;
        }

        *owner = Some(guild_id);
        Some(SessionClaim { _owner: owner })
    }

    pub async fn owns_session(&self, guild_id: GuildId) -> bool {
        *self.active_guild.lock().await == Some(guild_id)
    }

    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for RelayBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component_interaction) => {
                if let Err(e) = handlers::handle_component(&ctx, component_interaction, self).await
                {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Si alguien saca al bot del canal de voz, la sesión se detiene.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        if new.user_id != ctx.cache.current_user().id {
            return;
        }

        let change = BotVoiceChange {
            guild_id: new.guild_id,
            old_channel: old.and_then(|o| o.channel_id),
            new_channel: new.channel_id,
        };

        // Con el lock tomado hay un /play abriendo sesión: una salida que
        // llega ahora es el eco del cierre anterior
        let Ok(owner) = self.active_guild.try_lock() else {
            debug!("🔌 Salida de voz ignorada mientras se abre una sesión: {:?}", change);
            return;
        };
        let active = *owner;
        drop(owner);

        if !is_external_disconnect(&change, active, self.player.status().phase) {
            return;
        }

        info!("🔌 Bot desconectado del canal de voz en guild {:?}", change.guild_id);
        match self.player.stop().await {
            Ok(()) => info!("⏹️ Sesión detenida tras la desconexión"),
            // La sesión ya había terminado por su cuenta
            Err(e) => debug!("Nada que detener tras la desconexión: {}", e),
        }
    }
}

/// Libera la guild dueña cada vez que la sesión termina, así el eco de
/// nuestra propia desconexión no encuentra dueño.
fn release_on_disconnect(mut status: watch::Receiver<PlayerStatus>, active: Arc<Mutex<Option<GuildId>>>) {
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            if status.borrow_and_update().phase != Phase::Disconnected {
                continue;
            }

            let mut owner = active.lock().await;
            // Un /play pudo abrir otra sesión mientras esperábamos el lock
            if status.borrow().phase == Phase::Disconnected {
                if let Some(guild_id) = owner.take() {
                    debug!("🔓 Sesión liberada por guild {}", guild_id);
                }
            }
        }
    });
}

/// Detiene la sesión activa antes de salir del proceso.
pub async fn shutdown(player: &Player) {
    if player.status().phase == Phase::Disconnected {
        return;
    }

    if let Err(e) = player.stop().await {
        warn!("⚠️ Error al detener la sesión: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        announce::SilentAnnouncer,
        decoder::FfmpegTranscoder,
        download::{DownloadConfig, DownloadWorker},
        player::PlaybackConfig,
        track::TrackRequest,
        transport::testing::RecordingConnector,
    };
    use crate::sources::{MockMediaFetcher, ResolveError, ResolvedSource, SourceResolver};
    use crate::storage::MediaStorage;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    /// Resolver que nunca termina: la sesión queda abierta esperando.
    struct PendingResolver;

    #[async_trait]
    impl SourceResolver for PendingResolver {
        async fn resolve(&self, _request: &TrackRequest) -> Result<ResolvedSource, ResolveError> {
            std::future::pending().await
        }

        async fn expand_playlist(
            &self,
            _url: &str,
            _limit: usize,
        ) -> Result<Vec<TrackRequest>, ResolveError> {
            std::future::pending().await
        }

        async fn search(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<TrackRequest>, ResolveError> {
            std::future::pending().await
        }
    }

    async fn bot(dir: &std::path::Path) -> RelayBot {
        let storage = MediaStorage::new(dir.join("song"), dir.join("cover"))
            .await
            .unwrap();
        let worker = Arc::new(DownloadWorker::new(
            Arc::new(PendingResolver),
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

        RelayBot::new(
            Arc::new(Config::default()),
            player,
            Arc::new(ChannelAnnouncer::new("https://img.example/default.png")),
        )
    }

    /// Lo que hace `/play`: reclamar la sesión y encolar con el claim tomado.
    async fn play(bot: &RelayBot, guild_id: GuildId, connector: &RecordingConnector) -> bool {
        let Some(_claim) = bot.claim_session(guild_id).await else {
            return false;
        };
        // Deja que el otro /play intente reclamar en el medio
        tokio::task::yield_now().await;

        bot.player()
            .enqueue(vec![TrackRequest::search("song")], connector)
            .await
            .is_ok()
    }

    async fn wait_released(bot: &RelayBot, guild_id: GuildId) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while bot.owns_session(guild_id).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("la guild no se liberó");
    }

    #[tokio::test]
    async fn idle_player_can_move_between_guilds() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot(dir.path()).await;
        let first = GuildId::new(1);
        let second = GuildId::new(2);

        assert!(!bot.owns_session(first).await);
        drop(bot.claim_session(first).await.expect("sin sesión abierta"));
        assert!(bot.owns_session(first).await);

        // Sin sesión abierta otra guild puede tomarla
        drop(bot.claim_session(second).await.expect("sin sesión abierta"));
        assert!(bot.owns_session(second).await);
        assert!(!bot.owns_session(first).await);
    }

    #[tokio::test]
    async fn concurrent_plays_from_two_guilds_open_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot(dir.path()).await;
        let connector = RecordingConnector::default();
        let first = GuildId::new(1);
        let second = GuildId::new(2);

        let (a, b) = tokio::join!(
            play(&bot, first, &connector),
            play(&bot, second, &connector)
        );

        assert!(a ^ b, "exactamente un /play debe ganar: {} {}", a, b);
        assert_eq!(connector.connects(), 1);
        let winner = if a { first } else { second };
        assert!(bot.owns_session(winner).await);

        bot.player().stop().await.unwrap();
    }

    #[tokio::test]
    async fn claim_blocks_other_guilds_until_enqueue_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot(dir.path()).await;
        let connector = RecordingConnector::default();
        let first = GuildId::new(1);
        let second = GuildId::new(2);

        let claim = bot.claim_session(first).await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(50), bot.claim_session(second))
                .await
                .is_err(),
            "el segundo claim no debe resolverse mientras el primero encola"
        );

        bot.player()
            .enqueue(vec![TrackRequest::search("song")], &connector)
            .await
            .unwrap();
        drop(claim);

        assert!(bot.claim_session(second).await.is_none());
        // La misma guild sí puede seguir encolando
        assert!(bot.claim_session(first).await.is_some());

        bot.player().stop().await.unwrap();
    }

    #[tokio::test]
    async fn closed_session_releases_its_guild() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot(dir.path()).await;
        let connector = RecordingConnector::default();
        let first = GuildId::new(1);

        assert!(play(&bot, first, &connector).await);
        assert!(bot.owns_session(first).await);

        bot.player().stop().await.unwrap();
        wait_released(&bot, first).await;

        // El eco de nuestra propia desconexión ya no tiene dueño
        let echo = BotVoiceChange {
            guild_id: Some(first),
            old_channel: Some(ChannelId::new(10)),
            new_channel: None,
        };
        let active = *bot.active_guild.lock().await;
        assert!(!is_external_disconnect(&echo, active, bot.player().status().phase));
    }

    #[test]
    fn only_leaving_the_active_session_counts_as_disconnect() {
        let guild = Some(GuildId::new(1));
        let kicked = BotVoiceChange {
            guild_id: guild,
            old_channel: Some(ChannelId::new(10)),
            new_channel: None,
        };

        assert!(is_external_disconnect(&kicked, guild, Phase::Playing));
        assert!(is_external_disconnect(&kicked, guild, Phase::Idle));
        assert!(!is_external_disconnect(&kicked, guild, Phase::Disconnected));
        assert!(!is_external_disconnect(&kicked, Some(GuildId::new(2)), Phase::Playing));
        assert!(!is_external_disconnect(&kicked, None, Phase::Playing));

        let moved = BotVoiceChange {
            new_channel: Some(ChannelId::new(11)),
            ..kicked
        };
        assert!(!is_external_disconnect(&moved, guild, Phase::Playing));

        let joined = BotVoiceChange {
            old_channel: None,
            new_channel: None,
            ..kicked
        };
        assert!(!is_external_disconnect(&joined, guild, Phase::Playing));
    }
}
