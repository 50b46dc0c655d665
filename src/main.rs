use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use interface_fetch::commands::{resolve_profile, update_profile};
use interface_fetch::{init_tracing, OpSys};

#[derive(Debug, Parser)]
#[command(name = "interface-fetch", version, about = "InterfaceOficial library and asset fetcher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the local files of the libraries active on an OS
    Resolve {
        #[arg(long)]
        profile: PathBuf,
        /// windows, osx or linux; defaults to the running OS
        #[arg(long)]
        os: Option<OpSys>,
        /// Print JSON instead of one path per line
        #[arg(long)]
        json: bool,
    },
    /// Download everything a profile needs
    Update {
        #[arg(long)]
        profile: PathBuf,
        #[arg(long)]
        os: Option<OpSys>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Folder that receives the legacy FML libraries
        #[arg(long)]
        fml_target: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Resolve { profile, os, json } => {
            resolve_profile(&profile, os.unwrap_or_else(OpSys::current)).and_then(|libraries| {
                if json {
                    println!("{}", serde_json::to_string_pretty(&libraries)?);
                } else {
                    for library in &libraries {
                        for path in library
                            .jar
                            .iter()
                            .chain(&library.native)
                            .chain(&library.native32)
                            .chain(&library.native64)
                        {
                            println!("{}", path.display());
                        }
                    }
                }
                Ok(())
            })
        }
        Command::Update {
            profile,
            os,
            data_dir,
            concurrency,
            fml_target,
        } => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(interface_fetch::FetchError::from)
            .and_then(|runtime| {
                runtime.block_on(update_profile(
                    &profile,
                    os.unwrap_or_else(OpSys::current),
                    data_dir,
                    concurrency,
                    fml_target,
                ))
            }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
