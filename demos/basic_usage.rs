use anyhow::Result;
use pssst::{ClientConfig, Error, Identity, KeyStore, Label, Lifecycle, MailboxClient};
use std::env;
use std::io::{self, Write};

#[tokio::main]
async fn main() -> Result<()> {
    // Get command line arguments
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <username> [receiver] [message]", args[0]);
        std::process::exit(1);
    }

    let config = ClientConfig::from_env();
    println!("Using server {}", config.api_url);

    let mut identity = Identity::parse(&args[1])?;
    if identity.password().is_none() {
        print!("Enter password: ");
        io::stdout().flush()?;
        identity = identity.with_password(rpassword::read_password()?);
    }

    let fresh = KeyStore::probe(&config.key_dir, &identity) == Lifecycle::NotCreated;

    println!("Opening key container...");
    let mut client = MailboxClient::connect(identity, config).await?;
    println!("Your address: {}", client.address());

    if fresh {
        println!("Registering {}...", client.identity());
        match client.create().await {
            Ok(()) => println!("Created {}", client.identity()),
            Err(Error::ServerRejected(reason)) => println!("Server says: {reason}"),
            Err(err) => return Err(err.into()),
        }
    }

    // Send a message if a receiver was given
    if let Some(receiver) = args.get(2) {
        let text = args
            .get(3..)
            .map(|words| words.join(" "))
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| "Hello from the pssst demo!".to_string());

        println!("\nSending message to {receiver}...");
        client.push(receiver, text.as_bytes()).await?;
        println!("Message sent");
    }

    // Read everything waiting in our mailbox
    println!("\nPulling messages...");
    let messages = client.pull_all().await?;
    println!("{} message(s) waiting", messages.len());
    for message in &messages {
        println!("  {}", String::from_utf8_lossy(message));
    }

    let peers = client.keys().list(false)?;
    if !peers.is_empty() {
        println!("\nCached peer keys:");
        for peer in peers.iter().filter(|label| matches!(label, Label::Peer(_))) {
            println!("  {peer}");
        }
    }

    Ok(())
}
