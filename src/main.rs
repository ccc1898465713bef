use std::env;
use std::sync::Arc;

use poise::serenity_prelude::{self as serenity, GatewayIntents, Http};
use punishment_link::bridge::PunishmentBridge;
use punishment_link::clock::SystemClock;
use punishment_link::config::{CONFIG_FILE, LinkConfig};
use punishment_link::enforcement::{Enforcer, ExpirySweeper, SweepRequest};
use punishment_link::ledger::LiteBansLedger;
use punishment_link::links::AccountLinkDirectory;
use punishment_link::platform::SerenityPlatform;
use punishment_link::punishment::{PunishmentTracker, SqlitePunishmentStore};
use punishment_link::{Data, Error, commands, handlers, logging};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Buffer of ledger events waiting to be dispatched
const LEDGER_EVENT_CAPACITY: usize = 256;

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    let config_path = env::var("LINK_CONFIG").unwrap_or_else(|_| CONFIG_FILE.to_string());
    let config = Arc::new(LinkConfig::load(&config_path).await?);

    logging::init(&config.logging, config.debug)?;

    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;

    // Punishment state
    let store = Arc::new(SqlitePunishmentStore::open(&config.database.path)?);
    let tracker = PunishmentTracker::new(store, Arc::new(SystemClock));
    let links = AccountLinkDirectory::load(&config.links_file).await;
    let ledger = LiteBansLedger::open(&config.ledger.database, &config.ledger.table_prefix)?;
    let (ledger_tx, ledger_events) = mpsc::channel(LEDGER_EVENT_CAPACITY);

    // Enforcement
    let http = Arc::new(Http::new(&token));
    let platform = Arc::new(SerenityPlatform::new(http, config.guild_id)?);
    let enforcer = Enforcer::new(
        platform,
        Arc::new(ledger.clone()),
        tracker.clone(),
        Arc::clone(&config),
    );
    let bridge = PunishmentBridge::new(enforcer.clone(), Arc::new(links.clone()));

    let dispatch = bridge.run_ledger_events(ledger_events);
    let poller = ledger.start_polling(config.ledger_poll_interval(), ledger_tx);
    let (sweeper, sweeper_task) =
        ExpirySweeper::new(enforcer, config.expiry_check_interval()).start();
    let sweeper_shutdown = sweeper.clone();

    log_startup_summary(&config);

    let data = Data::new(bridge.clone(), links);

    // Configure the Poise framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![commands::ping(), commands::punishments(), commands::link()],
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged() | GatewayIntents::GUILD_MEMBERS;
    let mut client = serenity::ClientBuilder::new(&token, intents)
        .event_handler(handlers::Handler::new(bridge))
        .framework(framework)
        .await?;

    // Stop everything on Ctrl-C
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
            return;
        }
        info!("Shutting down");
        if sweeper.send(SweepRequest::Shutdown).await.is_err() {
            warn!("Expiry sweeper already stopped");
        }
        poller.abort();
        dispatch.abort();
        shard_manager.shutdown_all().await;
    });

    info!("Starting bot...");
    if let Err(err) = client.start().await {
        error!("Client error: {err}");
    }

    // The sweeper may still be running if the client stopped on its own
    let _ = sweeper_shutdown.send(SweepRequest::Shutdown).await;
    let _ = sweeper_task.await;
    tracker.close().await;
    info!("Punishment store closed");
    Ok(())
}

fn log_startup_summary(config: &LinkConfig) {
    info!(
        "Expiry check interval: {} minute(s)",
        config.expiry_check_interval().as_secs() / 60
    );
    match config.muted_role() {
        Some(role_id) => info!("Punishment role: {role_id}"),
        None => warn!("No punishment role configured, only message deletion will be used"),
    }
    info!(
        "Reading LiteBans from {} every {}s",
        config.ledger.database,
        config.ledger_poll_interval().as_secs()
    );
    info!(
        "Voice mute enforcement: {}",
        if config.apply_server_mute {
            "enabled"
        } else {
            "disabled"
        }
    );
    if let Some(channel_id) = config.log_channel_id() {
        info!("Logging enforcement actions to channel {channel_id}");
    }
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            return;
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
    }
}
