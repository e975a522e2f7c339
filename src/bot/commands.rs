use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Comandos que entiende el bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Play { query: String },
    /// Busca y deja elegir uno de los resultados
    Search { query: String },
    Skip,
    Stop,
    Queue,
    Failed,
}

impl BotCommand {
    /// Interpreta el nombre del comando slash y su opción `query`.
    pub fn parse(name: &str, query: Option<&str>) -> Option<Self> {
        let command = match name {
            "play" => Self::Play {
                query: query.unwrap_or_default().trim().to_string(),
            },
            "search" => Self::Search {
                query: query.unwrap_or_default().trim().to_string(),
            },
            "skip" => Self::Skip,
            "stop" => Self::Stop,
            "queue" => Self::Queue,
            "failed" => Self::Failed,
            _ => return None,
        };
        Some(command)
    }
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        search_command(),
        skip_command(),
        stop_command(),
        queue_command(),
        failed_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción o playlist de YouTube o Spotify")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
}

fn search_command() -> CreateCommand {
    CreateCommand::new("search")
        .description("Busca en YouTube y elige qué canción reproducir")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "Qué buscar")
                .required(true),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la música, limpia la cola y sale del canal")
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

fn failed_command() -> CreateCommand {
    CreateCommand::new("failed").description("Lista las canciones que no se pudieron descargar")
}
