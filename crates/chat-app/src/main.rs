use snafu::{ResultExt, Whatever};

use plume_chat::ChatController;

mod repl;
mod settings;

use repl::ChatRepl;
use settings::SettingsStore;

/// Application entry point.
///
/// Bootstraps tracing, loads settings (JSON file plus `PLUME_*` environment
/// overrides), opens the initial chat session, and hands control to the REPL.
#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Whatever> {
    tracing_subscriber::fmt::init();

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();

    let transport = plume_llm::create_transport(settings.to_transport_config())
        .whatever_context("failed to initialize the backend transport (is PLUME_API_KEY set?)")?;

    let controller = ChatController::new(transport, settings.to_session_config())
        .whatever_context("failed to open the initial chat session")?;

    ChatRepl::new(controller, settings_store)
        .whatever_context("failed to start the line editor")?
        .run()
        .await
        .whatever_context("chat loop failed")?;

    Ok(())
}
