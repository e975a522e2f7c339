use serenity::{async_trait, model::id::GuildId};
use songbird::{Call, CoreEvent, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{info, warn};

/// Mantiene el flag `ready` del transporte en sincronía con el driver de voz.
pub struct ConnectionTracker {
    pub guild_id: GuildId,
    pub ready: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceEventHandler for ConnectionTracker {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        match ctx {
            EventContext::DriverConnect(_) => {
                info!("🔗 Driver de voz conectado en guild {}", self.guild_id);
                self.ready.store(true, Ordering::Release);
            }
            EventContext::DriverReconnect(_) => {
                info!("🔄 Driver de voz reconectado en guild {}", self.guild_id);
                self.ready.store(true, Ordering::Release);
            }
            EventContext::DriverDisconnect(data) => {
                warn!(
                    "🔌 Driver de voz desconectado en guild {}: {:?}",
                    self.guild_id, data.reason
                );
                self.ready.store(false, Ordering::Release);
            }
            _ => {}
        }

        None
    }
}

/// Registra el tracker para los tres eventos del driver.
pub fn track_connection(call: &mut Call, guild_id: GuildId, ready: Arc<AtomicBool>) {
    for event in [
        CoreEvent::DriverConnect,
        CoreEvent::DriverReconnect,
        CoreEvent::DriverDisconnect,
    ] {
        call.add_global_event(
            VoiceEvent::Core(event),
            ConnectionTracker {
                guild_id,
                ready: ready.clone(),
            },
        );
    }
}
