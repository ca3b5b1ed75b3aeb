use clap::Parser;
use consulwatch::cache::{CacheConfig, QueryOptions, Snapshot, WatchCache};
use consulwatch::consul::{self, ConsulClient, State};
use consulwatch::error::{Error, Result};
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address of the Consul agent
    #[arg(short, long, default_value = consul::DEFAULT_ADDRESS)]
    addr: String,

    /// Watch the key/value subtree under this root
    #[arg(long, group = "target")]
    kv: Option<String>,

    /// Watch the instances of this service
    #[arg(long, group = "target")]
    service: Option<String>,

    /// Only report passing instances (with --service)
    #[arg(long, requires = "service")]
    passing: bool,

    /// Watch the checks registered on this node
    #[arg(long, group = "target")]
    node: Option<String>,

    /// Watch every check in this state (passing, warning, critical, any)
    #[arg(long, group = "target")]
    state: Option<State>,

    /// Seconds to wait for the first snapshot before giving up
    #[arg(long, default_value_t = 30)]
    init_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let client = ConsulClient::new(&args.addr)?;
    let config = CacheConfig::from_env()?;
    let init_timeout = Duration::from_secs(args.init_timeout);

    if let Some(root) = &args.kv {
        let cache = consul::kv_cache(client, root, config, QueryOptions::BLANK)?;
        watch(cache, init_timeout, |key, value| {
            format!("{key:?} = {:?}", value.value_as_string().unwrap_or_default())
        })
        .await
    } else if let Some(service) = &args.service {
        let cache = consul::service_health_cache(client, service, args.passing, config, QueryOptions::BLANK)?;
        watch(cache, init_timeout, |key, health| {
            format!("{}@{}:{} on {}", key.service_id, key.host, key.port, health.node.name)
        })
        .await
    } else if let Some(node) = &args.node {
        let cache = consul::node_checks_cache(client, node, config, QueryOptions::BLANK)?;
        watch(cache, init_timeout, |key, check| format!("{key}: {}", check.status)).await
    } else if let Some(state) = args.state {
        let cache = consul::checks_by_state_cache(client, state, config, QueryOptions::BLANK)?;
        watch(cache, init_timeout, |key, check| format!("{key} on {}: {}", check.node, check.status)).await
    } else {
        Err(Error::Custom(
            "nothing to watch: pass one of --kv, --service, --node or --state".to_string(),
        ))
    }
}

/// Start `cache`, print every snapshot it publishes, and stop on ctrl-c.
async fn watch<K, V>(
    cache: WatchCache<K, V>,
    init_timeout: Duration,
    describe: impl Fn(&K, &V) -> String + Send + Sync + 'static,
) -> Result<()>
where
    K: Eq + Hash + Ord + Debug + Send + Sync + 'static,
    V: PartialEq + Send + Sync + 'static,
{
    cache.add_listener(move |snapshot: &Snapshot<K, V>| -> anyhow::Result<()> {
        let mut entries: Vec<_> = snapshot.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        println!("--- {} entries", entries.len());
        for (key, value) in entries {
            println!("{}", describe(key, value));
        }
        Ok(())
    })?;
    cache.start()?;

    if !cache.await_initialized(init_timeout).await {
        warn!(timeout_secs = init_timeout.as_secs(), "No snapshot yet, still waiting");
    }

    tokio::signal::ctrl_c().await?;
    info!(stats = ?cache.stats(), "Shutting down");
    cache.shutdown().await;
    Ok(())
}
