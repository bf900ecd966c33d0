use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use amelie::chatbot::{to_inbound_event, ChatbotConfig, ChatbotEngine, Database, GeminiClient, TelegramClient};
use amelie::config::Config;

struct BotState {
    bot_user_id: i64,
    engine: ChatbotEngine,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{message}");
    error!("{message}");
    std::process::exit(1);
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "amelie.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("amelie.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    std::panic::set_hook(Box::new(|panic| {
        error!("💥 {panic}");
        std::process::exit(1);
    }));

    info!("🚀 Starting amelie...");
    info!("Loaded config from {config_path}");
    info!("Model: {}, bot name: {}, max history: {}", config.model, config.bot_name, config.max_history);

    let bot = Bot::new(&config.telegram_bot_token);

    let me = match bot.get_me().await {
        Ok(me) => me,
        Err(e) => fail(format!("Failed to get bot info: {e}")),
    };
    info!("Bot user ID: {}, username: @{}", me.id, me.username());

    let database = match Database::open(&config.database_path(), config.max_history) {
        Ok(db) => Arc::new(db),
        Err(e) => fail(format!("Failed to open database: {e}")),
    };

    let gemini = match GeminiClient::new(
        config.gemini_api_key.clone(),
        config.model.clone(),
        config.safety_threshold.clone(),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => fail(e),
    };

    let chatbot_config = ChatbotConfig {
        bot_user_id: me.id.0 as i64,
        bot_username: Some(me.username().to_string()),
        default_bot_name: config.bot_name.clone(),
        defaults: config.generation,
        inactivity: config.inactivity_period(),
        reset_history_on_inactivity: config.reset_history_on_inactivity,
    };

    let telegram = Arc::new(TelegramClient::new(bot.clone()));
    let engine = ChatbotEngine::new(chatbot_config, database, telegram, gemini);

    let state = Arc::new(BotState {
        bot_user_id: me.id.0 as i64,
        engine,
    });

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("👋 Shutting down");
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let event = to_inbound_event(&msg, state.bot_user_id);
    state.engine.handle_event(event).await;
    Ok(())
}
