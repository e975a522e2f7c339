use anyhow::Result;
use serenity::{
    builder::{
        CreateActionRow, CreateInteractionResponse, CreateInteractionResponseMessage,
        CreateSelectMenu, CreateSelectMenuKind, CreateSelectMenuOption, EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction, ComponentInteractionDataKind},
        id::GuildId,
    },
    prelude::Context,
};
use tracing::{info, warn};

use super::{
    handlers::{get_user_voice_channel, start_playback, Playback},
    RelayBot,
};
use crate::{
    audio::track::{TrackLookup, TrackRequest},
    ui::embeds,
};

/// Prefijo del `custom_id` del menú; le sigue el id del usuario que buscó.
const MENU_PREFIX: &str = "search_select:";
/// Opciones que se muestran en el menú
pub const SEARCH_RESULTS: usize = 5;
/// Límite de Discord para el texto de una opción
const OPTION_TEXT_MAX: usize = 100;

pub fn is_search_menu(custom_id: &str) -> bool {
    custom_id.starts_with(MENU_PREFIX)
}

fn menu_id(user_id: u64) -> String {
    format!("{}{}", MENU_PREFIX, user_id)
}

/// Usuario dueño de un menú de búsqueda.
fn menu_owner(custom_id: &str) -> Option<u64> {
    custom_id.strip_prefix(MENU_PREFIX)?.parse().ok()
}

/// `/search`: muestra los primeros resultados en un menú de selección.
pub async fn handle_search_command(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &RelayBot,
    guild_id: GuildId,
    query: &str,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    if let Err(e) = get_user_voice_channel(ctx, guild_id, command.user.id) {
        return edit(ctx, command, embeds::create_error_embed("Sin canal de voz", &e.to_string())).await;
    }
    if query.is_empty() {
        return edit(ctx, command, embeds::create_error_embed("Búsqueda vacía", "Escribe qué buscar")).await;
    }

    info!("🔍 Búsqueda iniciada por {}: {}", command.user.name, query);

    let results = match bot
        .player()
        .worker()
        .resolver()
        .search(query, SEARCH_RESULTS)
        .await
    {
        Ok(results) => results,
        Err(e) => {
            warn!("❌ Búsqueda fallida '{}': {}", query, e);
            return edit(ctx, command, embeds::create_error_embed("Sin resultados", &e.to_string())).await;
        }
    };

    let Some(menu) = create_search_menu(&results, command.user.id.get()) else {
        return edit(
            ctx,
            command,
            embeds::create_error_embed("Sin resultados", &format!("Nada para: **{}**", query)),
        )
        .await;
    };

    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new()
                .embed(embeds::create_search_results_embed(query, &results))
                .components(vec![CreateActionRow::SelectMenu(menu)]),
        )
        .await?;

    Ok(())
}

/// Elección en el menú: la canción se agrega a la cola.
pub async fn handle_search_selection(
    ctx: &Context,
    component: &ComponentInteraction,
    bot: &RelayBot,
) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Interacción fuera de un servidor"))?;
    let user_id = component.user.id.get();

    if menu_owner(&component.data.custom_id) != Some(user_id) {
        component
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .embed(embeds::create_error_embed(
                            "No es tu búsqueda",
                            "Usa /search para buscar tus propias canciones",
                        ))
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    }

    let values = match &component.data.kind {
        ComponentInteractionDataKind::StringSelect { values } => values.as_slice(),
        _ => &[],
    };
    let Some(request) = selected_video(values) else {
        warn!("⚠️ Selección vacía en {}", component.data.custom_id);
        return Ok(());
    };
    let request = request.with_requested_by(user_id);

    // Conectar puede tardar más que el límite de respuesta
    component
        .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
        .await?;

    info!("✅ Canción elegida por {}: {}", component.user.name, request.label());

    let outcome = match get_user_voice_channel(ctx, guild_id, component.user.id) {
        Ok(channel_id) => {
            start_playback(ctx, bot, guild_id, channel_id, Playback::Append(vec![request])).await
        }
        Err(e) => Err(super::handlers::PlayRejection {
            title: "Sin canal de voz",
            reason: e.to_string(),
        }),
    };

    let embed = match outcome {
        Ok(requests) => embeds::create_enqueued_embed(&requests),
        Err(rejection) => embeds::create_error_embed(rejection.title, &rejection.reason),
    };
    component
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().embed(embed).components(vec![]),
        )
        .await?;

    Ok(())
}

/// Menú con una opción por video. `None` si ningún resultado es un video.
pub fn create_search_menu(results: &[TrackRequest], user_id: u64) -> Option<CreateSelectMenu> {
    let options: Vec<CreateSelectMenuOption> = results
        .iter()
        .filter_map(|result| {
            let TrackLookup::VideoId(id) = result.lookup() else {
                return None;
            };
            let option = CreateSelectMenuOption::new(truncate(result.label()), id.clone())
                .description(truncate(&format!(
                    "YouTube • {}",
                    result.artist().unwrap_or("Desconocido")
                )));
            Some(option)
        })
        .collect();

    if options.is_empty() {
        return None;
    }

    Some(
        CreateSelectMenu::new(menu_id(user_id), CreateSelectMenuKind::String { options })
            .placeholder("Selecciona una canción para reproducir...")
            .min_values(1)
            .max_values(1),
    )
}

/// Pedido para el video elegido en el menú.
pub fn selected_video(values: &[String]) -> Option<TrackRequest> {
    let id = values.first()?.trim();
    if id.is_empty() {
        return None;
    }

    Some(TrackRequest::video(id).with_source_url(format!("https://www.youtube.com/watch?v={}", id)))
}

/// Corta en caracteres, no en bytes, para no partir un carácter multibyte.
fn truncate(text: &str) -> String {
    if text.chars().count() <= OPTION_TEXT_MAX {
        return text.to_string();
    }

    let mut short: String = text.chars().take(OPTION_TEXT_MAX - 3).collect();
    short.push_str("...");
    short
}

async fn edit(ctx: &Context, command: &CommandInteraction, embed: serenity::builder::CreateEmbed) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}
