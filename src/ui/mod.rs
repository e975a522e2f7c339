//! Presentación de mensajes en Discord.

pub mod embeds;
