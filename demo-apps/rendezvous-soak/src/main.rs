use anyhow::{ensure, Context, Result};
use futures::future::join_all;
use rendezvous_core::{AsyncStore, EvictionReason, Key, SlotError, StoreConfig, StoreError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Payloads carried through the store during the soak run
#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Text(String),
    Reading { sensor: u32, value: i64 },
}

fn payload_for(key: Key) -> Payload {
    if key % 2 == 0 {
        Payload::Text(format!("text-{}", key))
    } else {
        Payload::Reading {
            sensor: (key % 97) as u32,
            value: key as i64 * 3,
        }
    }
}

/// Soak parameters, read from the environment
struct SoakOptions {
    operations: u64,
    concurrency: usize,
}

impl SoakOptions {
    fn from_env() -> Self {
        let operations = std::env::var("SOAK_OPERATIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5_000);
        let concurrency = std::env::var("SOAK_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(64);
        Self {
            operations,
            concurrency,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rendezvous_soak=info,rendezvous_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let options = SoakOptions::from_env();

    tracing::info!("🧪 Rendezvous Soak");
    tracing::info!("   Operations: {}", options.operations);
    tracing::info!("   Concurrency: {}", options.concurrency);

    test_both_orders(&options).await?;
    test_parallel_isolation(&options).await?;
    test_shared_fan_out().await?;
    test_expiration().await?;
    test_dispose().await?;

    tracing::info!("✅ All soak checks passed!");

    Ok(())
}

/// Deliver-first and request-first keys, interleaved, must all reconcile
async fn test_both_orders(options: &SoakOptions) -> Result<()> {
    tracing::info!("Test: Rendezvous in both orders ({} keys)", options.operations);

    let store: AsyncStore<Payload> = AsyncStore::new();
    let start = Instant::now();

    for key in 0..options.operations {
        store.init(key)?;
    }

    let mut pending = Vec::new();
    for key in 0..options.operations {
        if key % 2 == 0 {
            store.deliver(key, payload_for(key))?;
            let value = store.request(key)?.await?;
            ensure!(value == payload_for(key), "value mismatch for key {}", key);
        } else {
            pending.push(store.request(key)?);
        }
    }

    for key in (1..options.operations).step_by(2) {
        store.deliver(key, payload_for(key))?;
    }
    for observer in pending {
        let key = observer.key();
        let value = observer.await?;
        ensure!(value == payload_for(key), "value mismatch for key {}", key);
    }

    let stats = store.stats();
    ensure!(store.is_empty(), "{} entries leaked", store.len());
    ensure!(
        stats.reconciled == options.operations,
        "expected {} reconciled entries, got {}",
        options.operations,
        stats.reconciled
    );

    tracing::info!("   ✓ {} keys reconciled in {:?}", stats.reconciled, start.elapsed());
    store.shutdown().await;
    Ok(())
}

/// Independent producer and consumer tasks; no value may land on the wrong key
async fn test_parallel_isolation(options: &SoakOptions) -> Result<()> {
    tracing::info!(
        "Test: Parallel producers/consumers ({} concurrent tasks)",
        options.concurrency
    );

    let store: AsyncStore<Payload> = AsyncStore::new();
    let semaphore = Arc::new(Semaphore::new(options.concurrency));
    let mismatches = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    for key in 0..options.operations {
        store.init(key)?;
    }

    let consumers: Vec<_> = (0..options.operations)
        .map(|key| {
            let store = store.clone();
            let semaphore = Arc::clone(&semaphore);
            let mismatches = Arc::clone(&mismatches);
            tokio::spawn(async move {
                let _permit = semaphore.acquire().await?;
                let value = store.request(key)?.await?;
                if value != payload_for(key) {
                    tracing::error!("Value mismatch for key {}: got {:?}", key, value);
                    mismatches.fetch_add(1, Ordering::SeqCst);
                }
                Ok::<_, anyhow::Error>(())
            })
        })
        .collect();

    let producers: Vec<_> = (0..options.operations)
        .rev()
        .map(|key| {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                store.deliver(key, payload_for(key))
            })
        })
        .collect();

    for result in join_all(producers).await {
        result.context("producer task panicked")??;
    }
    for result in join_all(consumers).await {
        result.context("consumer task panicked")??;
    }

    let elapsed = start.elapsed();
    ensure!(mismatches.load(Ordering::SeqCst) == 0, "values crossed keys");
    ensure!(store.is_empty(), "{} entries leaked", store.len());

    tracing::info!(
        "   Throughput: {:.0} rendezvous/sec",
        options.operations as f64 / elapsed.as_secs_f64()
    );
    tracing::info!("   ✓ All {} values verified correctly", options.operations);
    store.shutdown().await;
    Ok(())
}

/// A shared observer replays one result to many readers
async fn test_shared_fan_out() -> Result<()> {
    tracing::info!("Test: Shared observer fan-out");

    let store: AsyncStore<Payload> = AsyncStore::new();
    store.init(1)?;
    let shared = store.request_shared(1)?;

    let readers: Vec<_> = (0..16)
        .map(|_| {
            let shared = shared.clone();
            tokio::spawn(async move { shared.get().await })
        })
        .collect();
    store.deliver(1, payload_for(1))?;

    for reader in join_all(readers).await {
        ensure!(reader?? == payload_for(1), "shared reader saw a different value");
    }
    ensure!(store.is_empty(), "shared request leaked its entry");

    tracing::info!("   ✓ 16 readers saw the same value");
    store.shutdown().await;
    Ok(())
}

/// Idle entries are failed and removed once the TTL passes
async fn test_expiration() -> Result<()> {
    tracing::info!("Test: TTL Expiration");

    let expired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&expired);
    let config = StoreConfig::default()
        .with_ttl(Duration::from_millis(500))
        .with_listener(move |_key: Key, reason: EvictionReason| {
            if reason == EvictionReason::Expired {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
    let store: AsyncStore<Payload> = AsyncStore::with_config(config);

    store.init(1)?;
    store.init(2)?;
    let waiting = store.request(1)?;

    tracing::info!("   Waiting 1 second for expiration...");
    tokio::time::sleep(Duration::from_secs(1)).await;

    ensure!(
        matches!(waiting.await, Err(SlotError::Expired { key: 1 })),
        "held observer should fail with Expired"
    );
    ensure!(
        matches!(store.request(2), Err(StoreError::UnknownKey(2))),
        "expired key should be gone"
    );
    ensure!(store.is_empty(), "expired entries still present");
    ensure!(expired.load(Ordering::SeqCst) == 2, "listener should see both keys");

    tracing::info!("   ✓ TTL expiration works correctly");
    store.shutdown().await;
    Ok(())
}

/// `dispose` releases waiting consumers and empties the store
async fn test_dispose() -> Result<()> {
    tracing::info!("Test: Dispose");

    let store: AsyncStore<Payload> = AsyncStore::new();
    let mut waiting = Vec::new();
    for key in 0..100 {
        store.init(key)?;
        if key % 2 == 0 {
            waiting.push(store.request(key)?);
        } else {
            store.deliver(key, payload_for(key))?;
        }
    }

    let removed = store.dispose();
    ensure!(removed == 100, "dispose removed {} entries", removed);
    ensure!(store.is_empty(), "store not empty after dispose");

    for observer in waiting {
        let key = observer.key();
        match observer.await {
            Err(SlotError::Disposed { .. }) => {}
            other => anyhow::bail!("key {} should be disposed, got {:?}", key, other),
        }
    }

    tracing::info!("   ✓ 50 waiting consumers released");
    store.shutdown().await;
    Ok(())
}
