use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serenity::{
    builder::{CreateEmbed, CreateMessage, EditMessage},
    http::Http,
    model::id::{ChannelId, MessageId},
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::audio::announce::{Announcement, Announcer};
use crate::ui::embeds;

#[derive(Clone)]
struct Target {
    http: Arc<Http>,
    channel_id: ChannelId,
}

/// Publica los avisos del player en el último canal de texto donde se usó
/// un comando. El embed de "reproduciendo ahora" se edita en lugar de
/// publicar uno nuevo por canción.
pub struct ChannelAnnouncer {
    default_cover_url: String,
    target: RwLock<Option<Target>>,
    now_playing: Mutex<Option<MessageId>>,
}

impl ChannelAnnouncer {
    pub fn new(default_cover_url: impl Into<String>) -> Self {
        Self {
            default_cover_url: default_cover_url.into(),
            target: RwLock::new(None),
            now_playing: Mutex::new(None),
        }
    }

    pub fn bind(&self, http: Arc<Http>, channel_id: ChannelId) {
        let mut target = self.target.write();
        let moved = target
            .as_ref()
            .is_some_and(|current| current.channel_id != channel_id);
        if moved {
            // El mensaje anterior quedó en otro canal
            self.now_playing.lock().take();
        }
        *target = Some(Target { http, channel_id });
    }

    async fn send(&self, target: &Target, embed: CreateEmbed) -> Option<MessageId> {
        match target
            .channel_id
            .send_message(&target.http, CreateMessage::new().embed(embed))
            .await
        {
            Ok(message) => Some(message.id),
            Err(e) => {
                warn!("⚠️ No se pudo enviar mensaje a {}: {:?}", target.channel_id, e);
                None
            }
        }
    }

    async fn show_now_playing(&self, target: &Target, embed: CreateEmbed) {
        let existing = *self.now_playing.lock();

        if let Some(message_id) = existing {
            match target
                .channel_id
                .edit_message(&target.http, message_id, EditMessage::new().embed(embed.clone()))
                .await
            {
                Ok(_) => return,
                Err(e) => debug!("Mensaje de now playing no editable, enviando otro: {:?}", e),
            }
        }

        if let Some(message_id) = self.send(target, embed).await {
            *self.now_playing.lock() = Some(message_id);
        }
    }
}

#[async_trait]
impl Announcer for ChannelAnnouncer {
    async fn announce(&self, announcement: Announcement) {
        let Some(target) = self.target.read().clone() else {
            debug!("Sin canal de texto para anunciar: {:?}", announcement);
            return;
        };

        match announcement {
            Announcement::NowPlaying(track) => {
                let embed = embeds::create_now_playing_embed(&track, &self.default_cover_url);
                self.show_now_playing(&target, embed).await;
            }
            Announcement::Farewell => {
                self.now_playing.lock().take();
                self.send(&target, embeds::create_farewell_embed()).await;
            }
            Announcement::ResolutionFailed { query } => {
                let embed = embeds::create_error_embed(
                    "Canción no encontrada",
                    &format!("No se pudo obtener **{}**, se continúa con la cola", query),
                );
                self.send(&target, embed).await;
            }
            Announcement::PlaybackFailed { title } => {
                let embed = embeds::create_error_embed(
                    "Error de Reproducción",
                    &format!("**{}** no se pudo reproducir", title),
                );
                self.send(&target, embed).await;
            }
            Announcement::PlayHistory(history) => {
                self.send(&target, embeds::create_history_embed(&history)).await;
            }
        }
    }
}
