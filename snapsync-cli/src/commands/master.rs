// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `snapsync master` command - Run the completion barrier.
//!
//! Serves `arm` / `report` / `status` over RPC, optionally the datagram
//! ingress and a prometheus exporter, until Ctrl+C.

use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;

use snapsync_core::{ConfigLoader, Endpoint, LatencyMetrics, LogObserver, Master, RoundObserver};

use crate::metrics::{self, MetricsObserver};

pub async fn execute(
    config_path: &str,
    listen_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let master_config = config
        .master
        .ok_or("configuration has no master section")?;

    let listen: Endpoint = match listen_override {
        Some(addr) => addr.parse()?,
        None => master_config.listen.clone(),
    };

    let log_observer: Arc<dyn RoundObserver> = Arc::new(LogObserver::new(&master_config.label));
    let observer: Arc<dyn RoundObserver> = match master_config.metrics_port {
        Some(port) => {
            metrics::start_metrics_server(port.value());
            Arc::new(MetricsObserver::new(log_observer))
        }
        None => log_observer,
    };

    let master = Master::new(observer);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = TcpListener::bind((listen.host(), listen.port().value())).await?;
    let rpc = tokio::spawn(
        master
            .rpc_server()
            .serve_until(listener, wait_for_shutdown(shutdown_rx.clone())),
    );

    let ingress = match &master_config.datagram_listen {
        Some(endpoint) => {
            let socket = UdpSocket::bind((endpoint.host(), endpoint.port().value())).await?;
            let master = master.clone();
            let shutdown = wait_for_shutdown(shutdown_rx.clone());
            Some(tokio::spawn(async move {
                master.serve_datagrams(socket, shutdown).await;
            }))
        }
        None => None,
    };

    println!("snapsync master listening on {}", listen);
    if let Some(endpoint) = &master_config.datagram_listen {
        println!("  datagram ingress on {}", endpoint);
    }
    println!("Press Ctrl+C to stop...");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down master");
    let _ = shutdown_tx.send(true);

    rpc.await?;
    if let Some(ingress) = ingress {
        ingress.await?;
    }

    let history = master.barrier().history();
    if history.is_empty() {
        println!("No rounds satisfied.");
    } else {
        let stats = LatencyMetrics::from_rounds(&history);
        println!("[{}] rounds: {}", master_config.label, stats.summary_line());
    }

    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}
