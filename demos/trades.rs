//! Streams BTC trades and ETH order book updates from Hyperliquid mainnet.
//!
//! Shows connection state changes as they happen, then unsubscribes and stops.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,hyperliquid_stream=debug cargo run --example trades
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use hyperliquid_stream::MAINNET_WS_URL;
use hyperliquid_stream::ws::{ChannelSpec, Client, Options};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = Client::start(Options::builder().url(MAINNET_WS_URL).name("demo").build())?;

    let mut states = client.state_receiver();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!(?state, "Connection state changed");
        }
    });

    let trades = client
        .subscribe(ChannelSpec::trades("BTC"), |trades: &Value| {
            info!(stream = "trades", %trades);
        })
        .await?;

    let (book, stream) = client.subscribe_stream(ChannelSpec::l2_book("ETH")).await?;
    let mut stream = Box::pin(stream);
    let mut count = 0;
    while let Ok(Some(book)) = timeout(Duration::from_secs(10), stream.next()).await {
        info!(
            stream = "l2Book",
            coin = %book["coin"],
            time = %book["time"],
        );
        count += 1;
        if count >= 5 {
            break;
        }
    }
    info!(stream = "l2Book", received = count);

    let stats = client.stats().await?;
    info!(
        subscriptions = stats.subscription_count,
        last_received_at = ?stats.last_received_at,
        "Stats"
    );

    for id in [trades, book] {
        if let Err(e) = client.unsubscribe(id).await {
            warn!(subscription = %id, error = %e, "Unsubscribe failed");
        }
    }
    debug!(remaining = client.subscriptions().await?.len());

    client.stop().await?;
    Ok(())
}
