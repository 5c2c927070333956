use clap::Parser;
use provena_cli::cli::{AuthCommand, Cli, Commands};
use provena_cli::{config, handlers};
use std::process;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    let config = config::load_config();

    match cli.command {
        Commands::Auth { command } => match command {
            AuthCommand::Login { no_browser } => handlers::handle_login(&config, no_browser).await,
            AuthCommand::Logout => handlers::handle_logout(&config).await,
            AuthCommand::Status => handlers::handle_status(&config),
        },
        Commands::Search { query, subtype, limit } => {
            handlers::handle_search(&config, &query, subtype.as_deref(), limit).await
        }
        Commands::Fetch { id } => handlers::handle_fetch(&config, &id).await,
        Commands::List { page_size } => handlers::handle_list(&config, page_size).await,
        Commands::Count => handlers::handle_count(&config).await,
        Commands::Operations => handlers::handle_operations(),
        Commands::Register { operation } => handlers::handle_register(&config, &operation).await,
    }
}
