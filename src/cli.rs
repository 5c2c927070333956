use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "prov-ctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive a Provena metadata registry from the command line")]
#[command(
    long_about = "A CLI connector for Provena metadata registries. Authenticates via the \
deployment's browser login, then registers people, organisations, models, datasets, templates \
and model runs through guided workflows that validate every field and require explicit \
confirmation before anything is written to the registry."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Authenticate with the registry
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },

    /// Search the registry for items matching a query
    Search {
        /// The search query string
        #[arg(value_name = "QUERY")]
        query: String,

        /// Filter by item subtype (PERSON, ORGANISATION, DATASET, ...)
        #[arg(short, long)]
        subtype: Option<String>,

        /// Maximum number of results to return
        #[arg(short, long, default_value_t = 25)]
        limit: usize,
    },

    /// Fetch a registry item by its handle id
    Fetch {
        /// The handle id of the item (e.g. 10378.1/1234567)
        #[arg(value_name = "ID")]
        id: String,
    },

    /// List general registry items
    List {
        /// Number of items to show
        #[arg(short, long, default_value_t = 20)]
        page_size: usize,
    },

    /// Show registry item counts by subtype
    Count,

    /// Show the registration operations this connector supports
    Operations,

    /// Run a guided registration workflow for an operation
    Register {
        /// Operation name (see `prov-ctl operations`)
        #[arg(value_name = "OPERATION")]
        operation: String,
    },
}

#[derive(Subcommand)]
pub enum AuthCommand {
    /// Log in via the browser redirect flow
    Login {
        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Revoke and remove the stored credential
    Logout,

    /// Show the current authentication status
    Status,
}

impl Cli {
    pub fn init_logging(&self) {
        if self.quiet {
            return;
        }

        let level = match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };

        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }
}
