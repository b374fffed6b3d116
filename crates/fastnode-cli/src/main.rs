#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use commands::bake::{BakeContext, RenderAction, UpdateAction};
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "howth")]
#[command(author, version, about = "Module registry and hot-update harness for bake graphs", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Drive a module registry from a graph snapshot
    Bake {
        /// Config file (defaults to bake.config.json in the working directory)
        #[arg(long, global = true, value_name = "FILE")]
        config: Option<PathBuf>,

        #[command(subcommand)]
        bake_cmd: BakeCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
enum BakeCommands {
    /// Load modules and print their namespaces
    Load {
        /// Graph snapshot (JSON)
        snapshot: PathBuf,

        /// Module ids to load, in order
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Apply a hot update and print the report and manifests
    Update {
        /// Graph snapshot (JSON)
        snapshot: PathBuf,

        /// Instantiate a module before the update is applied
        #[arg(long = "load", value_name = "ID")]
        preload: Vec<String>,

        /// Replacement modules (same format as the snapshot)
        #[arg(long, value_name = "FILE")]
        patch: Option<PathBuf>,

        /// Add a component module to the manifests
        #[arg(long, value_name = "ID")]
        add: Vec<String>,

        /// Remove a component module from the manifests
        #[arg(long, value_name = "ID")]
        delete: Vec<String>,
    },

    /// Render a route through the server entrypoint
    Render {
        /// Graph snapshot (JSON)
        snapshot: PathBuf,

        /// Page module id
        #[arg(long)]
        page: String,

        /// Layout module id, innermost first
        #[arg(long = "layout", value_name = "ID")]
        layouts: Vec<String>,

        /// Request URL
        #[arg(long, default_value = "/")]
        url: String,

        /// Route parameter as key=value
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = commands::bake::parse_param)]
        params: Vec<(String, String)>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(cli.json),
        Some(Commands::Bake { config, bake_cmd }) => {
            let span = tracing::info_span!("bake", cwd = %cwd.display());
            let _guard = span.enter();
            match bake_cmd {
                BakeCommands::Load { snapshot, ids } => {
                    let ctx = BakeContext {
                        cwd,
                        config,
                        snapshot,
                    };
                    commands::bake::load(&ctx, &ids, cli.json)
                }
                BakeCommands::Update {
                    snapshot,
                    preload,
                    patch,
                    add,
                    delete,
                } => {
                    let ctx = BakeContext {
                        cwd,
                        config,
                        snapshot,
                    };
                    let action = UpdateAction {
                        preload,
                        patch,
                        add,
                        delete,
                    };
                    commands::bake::update(&ctx, &action, cli.json)
                }
                BakeCommands::Render {
                    snapshot,
                    page,
                    layouts,
                    url,
                    params,
                } => {
                    let ctx = BakeContext {
                        cwd,
                        config,
                        snapshot,
                    };
                    let action = RenderAction {
                        page,
                        layouts,
                        url,
                        params,
                    };
                    commands::bake::render(&ctx, &action, cli.json)
                }
            }
        }
    }
}
