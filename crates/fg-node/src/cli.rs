//! CLI command definitions and argument parsing

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use fg_agent::{
    CheckpointStore, DirectoryTransport, FileCheckpointStore, HttpDirectoryClient, RetryConfig,
};
use fg_crypto::keystore::{self, DEFAULT_KEY_BITS};
use fg_crypto::{FileKeyStore, Identity, KeyPaths};
use fg_proto::v1::{CheckpointV1, Fingerprint};

use crate::config::{CliOverrides, NodeConfig, Role};
use crate::node;
use crate::output::{IdentitySummary, OutputFormat, OutputFormatter};
use crate::ExitCode;

/// fieldgrid - identity, directory and inbox for autonomous field units
#[derive(Parser, Debug)]
#[command(name = "fieldgrid")]
#[command(version, about = "fieldgrid - identity, directory and inbox for autonomous field units")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: table, json, quiet
    #[arg(long, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the unit keypair
    #[arg(long, global = true, env = "FIELDGRID_KEYS")]
    pub keys: Option<PathBuf>,

    /// Directory endpoint URL
    #[arg(long, global = true, env = "FIELDGRID_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Wait for the keypair to be generated before loading it
    #[arg(long, global = true)]
    pub wait: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured role (directory server or peer loop)
    Run(RunArgs),
    /// Generate the unit keypair and print its fingerprint
    Generate(GenerateArgs),
    /// Print this unit's fingerprint and profile URL
    Whoami,
    /// Read this unit's inbox
    Inbox(InboxArgs),
    /// Sign and send a message
    Send(SendArgs),
    /// Publish this unit's advertisement once
    Advertise,
    /// Show a unit's advertisement
    Lookup(LookupArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Role to run: server or peer
    #[arg(long)]
    pub role: Option<Role>,

    /// Any inbox flag switches `run` to the inbox action
    #[command(flatten)]
    pub inbox: InboxArgs,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Requested key strength in RSA-equivalent bits
    #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
    pub bits: u32,
}

#[derive(Args, Debug, Default)]
pub struct InboxArgs {
    /// Show a single message by id
    #[arg(long)]
    pub id: Option<u64>,

    /// Show messages from one sender
    #[arg(long)]
    pub from: Option<Fingerprint>,

    /// Keep polling and print new messages as they arrive
    #[arg(long = "loop")]
    pub follow: bool,

    /// List messages after this id instead of after the saved checkpoint
    #[arg(long)]
    pub since: Option<u64>,

    /// Seconds between polls in loop mode
    #[arg(long)]
    pub poll_interval: Option<u64>,
}

impl InboxArgs {
    /// Whether any flag selecting an inbox action was given
    pub fn is_requested(&self) -> bool {
        self.id.is_some() || self.from.is_some() || self.follow
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Receiver fingerprint; omit to broadcast
    #[arg(long)]
    pub to: Option<Fingerprint>,

    /// Message text
    pub message: String,
}

#[derive(Args, Debug)]
pub struct LookupArgs {
    /// Fingerprint of the unit
    pub fingerprint: Fingerprint,
}

#[derive(Serialize)]
struct SentOutput {
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<String>,
}

#[derive(Serialize)]
struct AdvertisedOutput {
    fingerprint: String,
}

impl Cli {
    /// Flags that override file configuration
    pub fn overrides(&self) -> CliOverrides {
        let (role, poll_interval_secs) = match &self.command {
            Commands::Run(args) => (args.role, args.inbox.poll_interval),
            Commands::Inbox(args) => (None, args.poll_interval),
            _ => (None, None),
        };
        CliOverrides {
            role,
            endpoint: self.endpoint.clone(),
            keys_path: self.keys.clone(),
            poll_interval_secs,
            log_level: None,
        }
    }

    /// Execute the CLI command with a resolved configuration
    pub async fn execute_with_config(self, config: NodeConfig) -> Result<ExitCode> {
        let formatter = OutputFormatter::new(self.output, self.verbose);
        let wait = self.wait;

        match self.command {
            Commands::Run(args) if args.inbox.is_requested() => {
                inbox(&config, args.inbox, wait, formatter).await
            }
            Commands::Run(_) => {
                node::run(&config, wait, formatter).await?;
                Ok(ExitCode::Success)
            }
            Commands::Generate(args) => generate(&config, args, &formatter),
            Commands::Whoami => whoami(&config, wait, &formatter).await,
            Commands::Inbox(args) => inbox(&config, args, wait, formatter).await,
            Commands::Send(args) => send(&config, args, wait, &formatter).await,
            Commands::Advertise => advertise(&config, wait, &formatter).await,
            Commands::Lookup(args) => lookup(&config, args, &formatter).await,
        }
    }
}

fn summary(identity: &Identity, keys: &Path, profile_url: Option<String>) -> IdentitySummary {
    IdentitySummary {
        fingerprint: identity.fingerprint().to_string(),
        public_key: hex::encode(identity.public_key()),
        keys_path: keys.display().to_string(),
        profile_url,
    }
}

fn print(output: String) {
    if !output.is_empty() {
        println!("{output}");
    }
}

/// Create the keypair; never overwrites an existing one
fn generate(config: &NodeConfig, args: GenerateArgs, formatter: &OutputFormatter) -> Result<ExitCode> {
    let keys = node::keys_dir(config, false)?;
    formatter.progress(&format!("Generating keypair in {}", keys.display()));

    let identity = keystore::generate(&FileKeyStore::new(), &KeyPaths::new(&keys), args.bits)?;
    print(formatter.format_identity(&summary(&identity, &keys, None), "generate"));
    formatter.success(&format!("keypair saved to {}", keys.display()));
    Ok(ExitCode::Success)
}

async fn whoami(config: &NodeConfig, wait: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let keys = node::keys_dir(config, true)?;
    let mut shutdown = node::shutdown_channel();
    let identity = node::load_identity(&keys, wait, &mut shutdown).await?;

    let fingerprint = identity.fingerprint();
    let profile_url = config.profile_url(fingerprint.as_str());
    info!("{}", profile_url);
    print(formatter.format_identity(&summary(&identity, &keys, Some(profile_url)), "whoami"));
    Ok(ExitCode::Success)
}

async fn inbox(
    config: &NodeConfig,
    args: InboxArgs,
    wait: bool,
    formatter: OutputFormatter,
) -> Result<ExitCode> {
    let keys = node::keys_dir(config, true)?;
    let mut shutdown = node::shutdown_channel();
    let identity = node::load_identity(&keys, wait, &mut shutdown).await?;
    let agent = node::peer_agent(config, identity)?;

    if let Some(id) = args.id {
        let message = agent.fetch_message(id).await?;
        print(formatter.format_message(&message));
    } else if let Some(sender) = args.from {
        let messages = agent.fetch_from(&sender).await?;
        print(formatter.format_messages(&messages, "inbox --from"));
    } else if args.follow {
        node::inbox_loop(config, &agent, &keys, formatter, shutdown).await?;
    } else {
        // Listing leaves the saved checkpoint where it is
        let me = agent.fingerprint();
        let since = match args.since {
            Some(since) => since,
            None => FileCheckpointStore::new(config.checkpoint_path(&keys))
                .load(&me)?
                .map(|cp| cp.last_id_seen)
                .unwrap_or(0),
        };
        let checkpoint = CheckpointV1 {
            reader: me,
            last_id_seen: since,
        };
        let (messages, _) = agent.poll_once(&checkpoint).await?;
        print(formatter.format_messages(&messages, "inbox"));
    }
    Ok(ExitCode::Success)
}

async fn send(
    config: &NodeConfig,
    args: SendArgs,
    wait: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let keys = node::keys_dir(config, false)?;
    let mut shutdown = node::shutdown_channel();
    let identity = node::load_identity(&keys, wait, &mut shutdown).await?;
    let agent = node::peer_agent(config, identity)?;

    let id = agent.send_message(args.to.as_ref(), args.message.as_bytes()).await?;
    print(formatter.format_success(
        &SentOutput {
            id,
            to: args.to.as_ref().map(|fp| fp.to_string()),
        },
        "send",
    ));
    match &args.to {
        Some(to) => formatter.success(&format!("message {id} sent to {to}")),
        None => formatter.success(&format!("message {id} broadcast")),
    }
    Ok(ExitCode::Success)
}

async fn advertise(config: &NodeConfig, wait: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let keys = node::keys_dir(config, false)?;
    let mut shutdown = node::shutdown_channel();
    let identity = node::load_identity(&keys, wait, &mut shutdown).await?;
    // One attempt: the operator reruns the command
    let agent = node::peer_agent(config, identity)?.with_retry(RetryConfig::none());

    let fingerprint = agent.advertise_self().await?;
    print(formatter.format_success(
        &AdvertisedOutput {
            fingerprint: fingerprint.to_string(),
        },
        "advertise",
    ));
    formatter.success(&format!("advertised as {fingerprint}"));
    Ok(ExitCode::Success)
}

async fn lookup(config: &NodeConfig, args: LookupArgs, formatter: &OutputFormatter) -> Result<ExitCode> {
    let client = HttpDirectoryClient::new(config.node.endpoint.clone())?;
    let advert = client.lookup(&args.fingerprint).await?;
    print(formatter.format_advert(&advert));
    Ok(ExitCode::Success)
}
