use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use pssst::{ClientConfig, Identity, MailboxClient};
use tracing_subscriber::EnvFilter;

/// Name of the profile file holding a default identity string.
const PROFILE_FILE: &str = ".pssst";

#[derive(Parser)]
#[command(name = "pssst", version, about = "Pssst CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create user
    Create {
        /// `~`, a profile directory, or `username[:password][@server]`
        #[arg(default_value = "~")]
        profile: String,
    },
    /// Delete user
    Delete {
        #[arg(default_value = "~")]
        profile: String,
    },
    /// Show the public key of a user
    Find { profile: String, user: String },
    /// Pull messages
    Pull {
        #[arg(default_value = "~")]
        profile: String,
    },
    /// Push message
    Push {
        profile: String,
        receiver: String,
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
}

impl Command {
    fn profile(&self) -> &str {
        match self {
            Command::Create { profile }
            | Command::Delete { profile }
            | Command::Find { profile, .. }
            | Command::Pull { profile }
            | Command::Push { profile, .. } => profile,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    tokio::select! {
        result = run(cli.command) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("Error: {err}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Abort");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let identity = load_identity(command.profile())?;
    let mut client = MailboxClient::connect(identity, ClientConfig::from_env()).await?;

    match command {
        Command::Create { .. } => {
            client.create().await?;
            println!("Created {}", client.identity());
        }
        Command::Delete { .. } => {
            client.delete().await?;
            println!("Deleted {}", client.identity());
        }
        Command::Find { user, .. } => {
            let key = client.find(&user).await?;
            print!("{}", String::from_utf8_lossy(&key.export_public()?));
        }
        Command::Pull { .. } => {
            for message in client.pull_all().await? {
                println!("{}", String::from_utf8_lossy(&message));
            }
        }
        Command::Push {
            receiver, message, ..
        } => {
            client.push(&receiver, message.join(" ").as_bytes()).await?;
            println!("Message sent");
        }
    }

    Ok(())
}

/// Resolve the profile argument into an identity, prompting for a missing
/// password.
fn load_identity(profile: &str) -> Result<Identity> {
    let path = if profile == "~" {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("home directory not found"))?;
        Some(home.join(PROFILE_FILE))
    } else if profile.starts_with('/') || profile.starts_with('.') {
        Some(PathBuf::from(profile).join(PROFILE_FILE))
    } else {
        None
    };

    let raw = match path {
        Some(path) => fs::read_to_string(&path)
            .with_context(|| format!("failed to read profile {}", path.display()))?,
        None => profile.to_string(),
    };

    let identity = Identity::parse(&raw)?;
    if identity.password().is_some() {
        return Ok(identity);
    }

    let password = rpassword::prompt_password("Password (hidden): ")?;
    Ok(identity.with_password(password))
}
