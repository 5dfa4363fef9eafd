use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use gatekeeper_core::{
    config::Config,
    domain::CheckPermissionInput,
    migration, server,
    service::CheckOptions,
    telemetry,
};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "gatekeeper-core", version, about = "Permission resolution engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply database migrations and seed the SuperAdmin role
    Migrate,
    /// Resolve a single permission check against the live store and print the decision
    Check(CheckArgs),
}

#[derive(Args)]
struct CheckArgs {
    #[arg(long)]
    principal: Uuid,
    #[arg(long)]
    tenant: Option<Uuid>,
    #[arg(long)]
    resource: String,
    #[arg(long)]
    action: String,
    #[arg(long)]
    instance: Option<String>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Ignore cached answers
    #[arg(long)]
    bypass_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let metrics = telemetry::init(&config.telemetry)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!(service = %config.telemetry.service_name, "Starting Gatekeeper Core");
            server::run(config, metrics).await
        }
        Command::Migrate => migration::run_migrations(&config).await,
        Command::Check(args) => check(&config, args).await,
    }
}

async fn check(config: &Config, args: CheckArgs) -> Result<()> {
    let components = server::build_components(config).await?;

    let input = CheckPermissionInput {
        principal_id: args.principal,
        tenant_id: args.tenant,
        resource: args.resource,
        action: args.action,
        resource_instance_id: args.instance,
    };
    let mut options = CheckOptions::default();
    if let Some(ms) = args.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    if args.bypass_cache {
        options = options.bypassing_cache();
    }

    let decision = components.state.resolver.decide(&input, options).await;
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}
