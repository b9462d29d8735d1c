#![forbid(unsafe_code)]
//! Generates a keypair and prints the checksummed address.

use chain5470::crypto::KeyPair;
use clap::Parser;

#[derive(Parser)]
#[command(name = "chain5470-keygen", about = "Generate a chain5470 keypair")]
struct Args {
    /// Derive the keypair from an existing hex-encoded secret key instead of
    /// generating a fresh one
    #[arg(long)]
    secret: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let keypair = match args.secret {
        Some(secret_hex) => KeyPair::from_secret_bytes(&hex::decode(secret_hex)?)?,
        None => KeyPair::generate()?,
    };

    println!("address:    {}", keypair.address());
    println!("public key: {}", hex::encode(keypair.public_key_bytes()));
    println!("secret key: {}", hex::encode(keypair.secret_key_bytes()));
    Ok(())
}
