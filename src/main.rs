use anyhow::{Context, Result};
use clap::Parser;
use ldap_sync_client::connection::{Connection, ConnectionFactory, LdapConnectionFactory};
use ldap_sync_client::cookie::InMemoryCookieManager;
use ldap_sync_client::{Config, PagedResultsClient, ReferralFollower, SyncReplClient, SyncReplRunner};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ldap-sync-client")]
#[command(about = "LDAP content synchronization client - mirrors a directory subtree with RFC 4533 sync searches")]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Run one paged search to completion, print the entry DNs and exit
    #[arg(long)]
    paged: bool,

    /// Chase referrals and continuation references during --paged
    #[arg(long)]
    follow_referrals: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("ldap_sync_client={},info", log_level))
        .init();

    let config = Config::from_file(&args.config)?;
    let factory = LdapConnectionFactory::new(config.connection_options()?);

    info!("Configuration loaded:");
    info!("  Server: {}", config.connection.url);
    info!("  Base: {}", config.search.base);
    info!("  Sync mode: {:?}", config.sync_mode());

    if args.paged {
        paged_search(&config, factory, args.follow_referrals).await
    } else {
        run_sync(&config, factory).await
    }
}

async fn paged_search(config: &Config, factory: LdapConnectionFactory, follow_referrals: bool) -> Result<()> {
    let url = config.url()?;
    let conn = factory.connect(&url).await.with_context(|| format!("connecting to {}", url.address()))?;
    let request = config.search_request();
    let client = PagedResultsClient::new(&conn, config.page_size());
    let outcome = client.execute_to_completion(&request, &InMemoryCookieManager::new()).await;
    if let Err(e) = conn.close().await {
        warn!("Close failed: {}", e);
    }
    let mut response = outcome.context("paged search")?;
    if follow_referrals {
        let follower = ReferralFollower::new(factory)
            .with_limit(config.referral_limit())
            .with_throw_on_failure(config.referral.throw_on_failure.unwrap_or(false));
        response = follower.follow_search(&request, &[], response).await?;
    }
    for entry in &response.entries {
        println!("{}", entry.dn);
    }
    for reference in &response.references {
        println!("# unresolved reference {}", reference.urls.join(" "));
    }
    info!("{} entries, result {}", response.entries.len(), response.result.code);
    Ok(())
}

async fn run_sync(config: &Config, factory: LdapConnectionFactory) -> Result<()> {
    let sync = SyncReplClient::new(config.sync_mode(), config.cookie_manager())
        .with_reload_hint(config.sync.reload_hint.unwrap_or(false))
        .on_entry(|e| {
            let state = e.state.map(|s| format!("{:?} {}", s.state, s.entry_uuid)).unwrap_or_default();
            println!("entry {} {}", e.entry.dn, state);
            Ok(())
        })
        .on_message(|info| {
            println!("sync info {:?}", info);
            Ok(())
        })
        .on_result(|result| {
            println!("result {} {}", result.code, result.message);
            Ok(())
        })
        .on_error(|e| {
            error!("Sync error: {:#}", e);
            Ok(())
        });

    let runner = SyncReplRunner::new(Arc::new(factory.with_auto_read(false)), config.runner_settings()?, sync);
    runner.start().await.context("starting sync")?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutting down");
    runner.stop().await?;
    Ok(())
}
