use anyhow::{Context as _, Result};
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod sources;
mod storage;
mod ui;

use crate::audio::{
    decoder::FfmpegTranscoder,
    download::{DownloadConfig, DownloadWorker},
    player::{PlaybackConfig, Player},
};
use crate::bot::{announcer::ChannelAnnouncer, RelayBot};
use crate::config::Config;
use crate::sources::YtDlpClient;
use crate::storage::MediaStorage;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Relay Music v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());
    let config = Arc::new(config);

    // Restos de una ejecución anterior
    let storage = MediaStorage::new(config.download_dir.clone(), config.cover_dir.clone()).await?;
    match storage.purge().await {
        Ok(0) => {}
        Ok(removed) => info!("🧹 {} archivos viejos eliminados", removed),
        Err(e) => warn!("⚠️ No se pudieron limpiar los archivos viejos: {:?}", e),
    }

    // Pipeline de audio
    let ytdlp = Arc::new(YtDlpClient::new(config.ytdlp_path.clone()));
    let announcer = Arc::new(ChannelAnnouncer::new(config.default_cover_url.clone()));
    let worker = Arc::new(DownloadWorker::new(
        ytdlp.clone(),
        ytdlp,
        storage,
        announcer.clone(),
        DownloadConfig::from(config.as_ref()),
    ));
    let transcoder = Arc::new(FfmpegTranscoder::new(
        config.ffmpeg_path.clone(),
        config.decoder_stall_timeout,
    ));
    let player = Player::new(
        PlaybackConfig::from(config.as_ref()),
        worker,
        transcoder,
        announcer.clone(),
    );

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = RelayBot::new(config.clone(), player.clone(), announcer);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await
        .context("Error al crear el cliente de Discord")?;

    // Manejar shutdown graceful
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        bot::shutdown(&player).await;
        std::process::exit(0);
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = YtDlpClient::new(config.ytdlp_path.clone())
        .version()
        .await
        .context("yt-dlp no disponible")?;

    let ffmpeg = async_process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await
        .context("ffmpeg no disponible")?;

    if !ffmpeg.status.success() {
        anyhow::bail!("Dependencias faltantes: ffmpeg");
    }

    info!("yt-dlp {}", yt_dlp);
    println!("OK");
    Ok(())
}
