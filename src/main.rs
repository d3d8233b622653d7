use actix_web::web;
use anyhow::Context;
use clap::Parser;

use coderun::config::{CliArgs, Config};
use coderun::engine::Engine;
use coderun::engine::profile::LanguageTable;
use coderun::web_server::build_server;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        engine: engine_config,
        languages,
    } = cli.to_config().context("Failed to load configuration")?;

    let table = match languages {
        Some(profiles) => LanguageTable::new(profiles).context("Invalid language table")?,
        None => LanguageTable::builtin(),
    };
    let engine = web::Data::new(Engine::new(&engine_config, table));

    if cli.list_languages {
        for language in engine.languages().await {
            let state = if language.available { "available" } else { "missing" };
            println!("{:<12} {state}", language.name);
        }
        return Ok(());
    }

    log::info!(
        "Workspaces under {}, up to {} concurrent executions",
        engine_config.workspace_root().display(),
        engine_config.max_concurrency()
    );

    // ======= PREPARATION END, EXECUTION START =======

    let server = build_server(server_config, engine.clone()).context("Failed to build server")?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // Lets in-flight executions finish and release their workspaces
    server_handle.stop(true).await;

    let stats = engine.workspace_stats();
    if stats.leaked > 0 {
        log::warn!("{} workspaces could not be removed", stats.leaked);
    }
    log::info!("Shutdown complete");
    Ok(())
}
