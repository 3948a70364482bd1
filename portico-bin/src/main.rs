use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use portico_catalog::{Catalog, ProviderId};
use portico_config::ConfigLoader;
use portico_core::Result;
use portico_gateway::{
    CreditLedger, Dispatcher, InMemoryLedger, LogPipeline, LogStore, ResponseCache,
};
use portico_providers::{
    AdapterRegistry, CredentialResolver, HttpUpstreamClient, OrgContext, UpstreamClient,
};
use portico_server::StaticApiKeys;

#[derive(Parser)]
#[command(name = "portico", version, about = "Multi-provider LLM API gateway")]
struct Cli {
    /// Path to portico.toml (defaults to $PORTICO_CONFIG or ./portico.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway.
    Serve,
    /// Print the model catalog.
    Models,
    /// Validate configuration and report provider credential status.
    Check,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Serve => serve(cli.config).await,
        Command::Models => models(),
        Command::Check => check(cli.config),
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = ConfigLoader::load(config_path.as_deref())?;

    let catalog = Arc::new(Catalog::builtin());
    let store = Arc::new(LogStore::open(&config.log.db_path)?);
    let pipeline = LogPipeline::start(Arc::clone(&store), &config.log);

    let dispatcher = Dispatcher::new(
        Arc::clone(&catalog),
        AdapterRegistry::builtin(config.dispatch.default_max_tokens),
        Arc::new(HttpUpstreamClient::new()?) as Arc<dyn UpstreamClient>,
        CredentialResolver::new(&config),
        ResponseCache::new(&config.cache),
        Arc::new(InMemoryLedger::new(config.ledger.initial_credits.clone()))
            as Arc<dyn CreditLedger>,
        pipeline.handle(),
        config.dispatch.clone(),
    );
    let keys = Arc::new(StaticApiKeys::from_config(&config)?);
    let router = portico_server::build_router(dispatcher, keys, config.server.cors);

    portico_server::start_server(&config.server.listen, router, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;

    // Flush buffered usage logs before exit.
    pipeline.shutdown().await;
    info!("usage log pipeline flushed, exiting");
    Ok(())
}

fn models() -> Result<()> {
    let catalog = Catalog::builtin();
    for view in catalog.model_views(true, false) {
        let providers: Vec<String> = view
            .providers
            .iter()
            .map(|p| p.provider_id.clone())
            .collect();
        println!(
            "{:<28} {:<12} ${:>7.3}/M in  ${:>7.3}/M out  [{}]",
            view.id,
            view.family,
            view.pricing.input * 1_000_000.0,
            view.pricing.output * 1_000_000.0,
            providers.join(", "),
        );
    }
    Ok(())
}

fn check(config_path: Option<PathBuf>) -> Result<()> {
    let config = ConfigLoader::load(config_path.as_deref())?;
    let resolver = CredentialResolver::new(&config);
    let org = OrgContext::default();

    let mut configured = 0;
    for provider in ProviderId::ALL {
        match resolver.resolve(&org, provider) {
            Ok(_) => {
                configured += 1;
                println!("{provider:<14} ok");
            }
            Err(e) => println!("{provider:<14} {e}"),
        }
    }
    if configured == 0 {
        return Err(portico_core::GatewayError::Config(
            "no provider credentials configured".into(),
        ));
    }
    println!("{configured} provider(s) ready");
    Ok(())
}
