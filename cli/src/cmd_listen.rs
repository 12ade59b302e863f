//! `chainevents listen`: live event listening until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use chainevents_core::{EventBus, EventHandlerService, EventKind, HandlerTable, LogDecoder};
use chainevents_listener::{BlockListener, EventListener, PoolDiscovery};
use chainevents_rpc::HttpNodeClient;

use crate::config::AppConfig;
use crate::sinks::ConsoleSink;

pub async fn run(app: AppConfig, print_events: bool) -> Result<()> {
    // Pool discovery supplies its own watches.
    let watches = match app.pool_discovery {
        Some(_) => app.watches(),
        None => app.require_watches(),
    }
    .context("nothing to listen for")?;
    let client = Arc::new(
        HttpNodeClient::default_for(app.ethereum.node_url.clone())
            .context("building node client")?,
    );

    let bus = Arc::new(EventBus::new());
    let service = Arc::new(EventHandlerService::new(app.handler.clone()));
    bus.subscribe(Arc::clone(&service))
        .context("registering event handler service")?;
    if print_events {
        bus.register(console_table()).context("registering console printer")?;
    }

    let listener = Arc::new(EventListener::new(
        Arc::clone(&client),
        Arc::clone(&bus),
        LogDecoder::default(),
        watches,
        app.ethereum.listener.clone(),
    ));
    let discovery = match app.pool_discovery.clone() {
        Some(config) => {
            let discovery = Arc::new(PoolDiscovery::new(&listener, config));
            bus.subscribe(Arc::clone(&discovery))
                .context("registering pool discovery")?;
            discovery.start().await;
            Some(discovery)
        }
        None => None,
    };
    let subscribed = listener.start_listening().await;
    if subscribed == 0 {
        warn!("no filters could be created, polling will retry lost subscriptions only");
    }
    let listen_task = {
        let l = Arc::clone(&listener);
        tokio::spawn(async move { l.run().await })
    };

    let blocks = app.block_listener_enabled().then(|| {
        Arc::new(BlockListener::new(
            Arc::clone(&client),
            Arc::clone(&bus),
            app.block_listener_config(),
        ))
    });
    let block_task = blocks.as_ref().map(|b| {
        let b = Arc::clone(b);
        tokio::spawn(async move { b.run().await })
    });
    if blocks.is_none() {
        info!("no realtime block source configured, block listener disabled");
    }

    info!(filters = subscribed, "listening, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutting down");

    listener.stop_listening().await;
    if let Some(b) = &blocks {
        b.stop();
    }
    listen_task.await.context("event listener task")?;
    if let Some(task) = block_task {
        task.await.context("block listener task")?;
    }

    if let Some(d) = &discovery {
        info!(pools = d.known_pools(), "pool discovery stopped");
    }
    let metrics = listener.metrics();
    let stats = service.stats();
    info!(
        sweeps = metrics.sweeps,
        logs = metrics.logs_received,
        published = metrics.events_published,
        decode_errors = metrics.decode_errors,
        poll_errors = metrics.poll_errors,
        large_transfers = stats.large_transfers,
        congested_blocks = stats.congested_blocks,
        "listener stopped"
    );
    Ok(())
}

/// Prints one line per event of every kind.
fn console_table() -> HandlerTable {
    EventKind::ALL
        .into_iter()
        .fold(HandlerTable::new("console"), |table, kind| {
            table.bind(kind, format!("print_{kind}"), |event| {
                println!("{}", ConsoleSink::event_line(event));
                Ok(())
            })
        })
}
