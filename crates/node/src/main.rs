//! `idenstate` command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use idenstate_core::field::fr_to_decimal;
use idenstate_core::{IdentityState, MemoryNodeStore, PrivateKey};
use idenstate_node::services::{identity, transition};
use idenstate_node::{telemetry, AppContext, Config, NodeError};
use idenstate_schema::schema_hash;
use idenstate_store::Role;

/// Iden3 identity node tooling.
#[derive(Parser, Debug)]
#[command(name = "idenstate", version, about, long_about = None)]
struct Cli {
    /// Verbose output; repeat for more (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file. Defaults plus environment overrides when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending database migrations.
    Migrate,

    /// Enrol an identity for a Baby Jubjub key seed and print its DID.
    Enroll {
        /// 32-byte key seed, hex.
        #[arg(long)]
        seed: String,

        #[arg(long, value_enum, default_value_t = RoleArg::Holder)]
        role: RoleArg,
    },

    /// Print the genesis DID of a key seed without touching the database.
    Did {
        /// 32-byte key seed, hex.
        #[arg(long)]
        seed: String,
    },

    /// Print the schema hash bound into claims for a JSON-LD context URL.
    SchemaHash { url: String },

    /// List unpublished state transitions.
    Pending {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Print the effective configuration with secrets omitted.
    ShowConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RoleArg {
    Holder,
    Issuer,
    Verifier,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Holder => Role::Holder,
            RoleArg::Issuer => Role::Issuer,
            RoleArg::Verifier => Role::Verifier,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, NodeError> {
    match path {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
}

async fn run(cli: Cli) -> Result<(), NodeError> {
    let config = load_config(cli.config.as_ref())?;
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Migrate => {
            let pool = idenstate_store::connect(&config.postgres).await?;
            idenstate_store::migrate(&pool).await?;
            println!("migrations applied");
        }
        Commands::Enroll { seed, role } => {
            let key = PrivateKey::from_hex(&seed)?;
            let ctx = AppContext::init(config).await?;
            let shutdown = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown.cancel();
                }
            });
            let record = identity::enrol(&ctx, key.public(), role.into(), &cancel).await?;
            println!("id:    {}", record.id);
            println!("did:   {}", record.did);
            println!("state: {}", fr_to_decimal(&record.state));
        }
        Commands::Did { seed } => {
            let key = PrivateKey::from_hex(&seed)?;
            let (method, blockchain, network) = config.did.resolve()?;
            let mut store = MemoryNodeStore::new();
            let state = IdentityState::create(&mut store, key.public(), config.circuit.mt_level).await?;
            println!("{}", state.did(method, blockchain, network)?);
        }
        Commands::SchemaHash { url } => {
            println!("{}", schema_hash(&url).to_hex());
        }
        Commands::Pending { limit } => {
            let ctx = AppContext::init(config).await?;
            for t in transition::pending(&ctx, limit).await? {
                println!(
                    "{}  identity={}  {} -> {}",
                    t.id,
                    t.identity_id,
                    fr_to_decimal(&t.old.state),
                    fr_to_decimal(&t.new.state)
                );
            }
        }
        Commands::ShowConfig => {
            print!("{}", config.to_redacted_toml()?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.json, cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = %e.code(), "{e}");
            eprintln!("error [{}]: {e}", e.code());
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parse_enroll() {
        let cli = Cli::try_parse_from(["idenstate", "enroll", "--seed", "0x01", "--role", "issuer"]).unwrap();
        match cli.command {
            Commands::Enroll { seed, role } => {
                assert_eq!(seed, "0x01");
                assert_eq!(role, RoleArg::Issuer);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cli_parse_global_flags() {
        let cli = Cli::try_parse_from(["idenstate", "show-config", "-vv", "--json", "--config", "node.toml"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("node.toml")));
        assert!(matches!(cli.command, Commands::ShowConfig));
    }

    #[test]
    fn cli_enroll_defaults_to_holder() {
        let cli = Cli::try_parse_from(["idenstate", "enroll", "--seed", "00"]).unwrap();
        assert!(matches!(cli.command, Commands::Enroll { role: RoleArg::Holder, .. }));
    }

    #[test]
    fn cli_parse_schema_hash() {
        let cli = Cli::try_parse_from(["idenstate", "schema-hash", "ipfs://bafy"]).unwrap();
        assert!(matches!(cli.command, Commands::SchemaHash { url } if url == "ipfs://bafy"));
    }
}
