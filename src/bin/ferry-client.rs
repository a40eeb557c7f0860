//! ferry-client: command-line client for a fileferry server.

use clap::{Parser, Subcommand};
use fileferry::client::Client;
use fileferry::error::ClientError;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ferry-client")]
#[command(version = "0.1.0")]
#[command(about = "Client for the fileferry file server", long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    addr: String,

    /// Seconds to wait for each reply
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// The server is configured without a greeting
    #[arg(long)]
    no_greeting: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List files on the server
    List,
    /// Download a file
    Get {
        name: String,
        /// Directory to write into
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Upload a file, stored under its file name
    Put { path: PathBuf },
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), ClientError> {
    let mut client = Client::connect(&args.addr)?;
    client.set_timeout(Some(Duration::from_secs(args.timeout)))?;

    if !args.no_greeting {
        let greeting = client.recv()?;
        if let Some(text) = greeting.as_text() {
            println!("{text}");
        }
    }

    match args.command {
        Command::List => {
            for name in client.list()? {
                println!("{name}");
            }
        }
        Command::Get { name, out } => {
            let dest = out.join(&name);
            let bytes = client.download(&name, &dest)?;
            println!("{} ({bytes} bytes)", dest.display());
        }
        Command::Put { path } => {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("no file name in {}", path.display()),
                    )
                })?
                .to_string();
            let bytes = client.upload(&path, &name)?;
            println!("stored {name} ({bytes} bytes)");
        }
    }
    Ok(())
}
