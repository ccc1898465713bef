pub mod audit;
pub mod bridge;
pub mod clock;
pub mod commands;
pub mod config;
pub mod data;
pub mod enforcement;
pub mod handlers;
pub mod ledger;
pub mod links;
pub mod logging;
pub mod platform;
pub mod punishment;

pub const BOT_NAME: &str = "punishment_link";
pub const COMMAND_TARGET: &str = "punishment_link::command";
pub const ERROR_TARGET: &str = "punishment_link::error";
pub const EVENT_TARGET: &str = "punishment_link::handlers";
pub const CONSOLE_TARGET: &str = "punishment_link";
pub const AUDIT_TARGET: &str = "punishment_link::audit";

pub use data::Data;
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
