// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `snapsync worker` command - Wait, run the workload, report.

use std::sync::Arc;

use tokio::net::TcpListener;

use snapsync_core::worker::sync_worker_dispatcher;
use snapsync_core::{
    CommandWorkload, ConfigLoader, DatagramWake, MasterClient, MmapSignal, RpcClient, RpcServer,
    SnapsyncError, WakeConfig, WakeSource, Worker, WorkerConfig, WorkerSummary,
};

use crate::cpu_affinity;

pub async fn execute(config_path: &str, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let worker_config = config
        .worker(id)
        .cloned()
        .ok_or_else(|| format!("no worker '{}' in {}", id, config_path))?;

    tracing::info!(
        worker = %worker_config.id,
        master = %worker_config.master,
        command = %worker_config.command,
        rounds = worker_config.rounds,
        "Starting worker"
    );

    if let Some(endpoint) = &worker_config.sync_listen {
        let dispatcher = sync_worker_dispatcher(CommandWorkload::new(&worker_config.command));
        let listener = TcpListener::bind((endpoint.host(), endpoint.port().value())).await?;
        tokio::spawn(RpcServer::new(Arc::new(dispatcher)).serve(listener));
        println!("  synchronous invoke endpoint on {}", endpoint);
    }

    // Spinning and blocking receives stay off the async runtime.
    let handle = tokio::task::spawn_blocking(move || run(&worker_config));

    tokio::select! {
        joined = handle => {
            let summary = joined??;
            println!(
                "Worker finished: {} round(s), {} workload failure(s), {} report(s) lost",
                summary.rounds, summary.workload_failures, summary.report_failures
            );
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping worker");
            // The blocking loop cannot be cancelled; runtime shutdown would wait on it.
            std::process::exit(130);
        }
    }

    Ok(())
}

fn run(config: &WorkerConfig) -> Result<WorkerSummary, SnapsyncError> {
    if let Some(cpu) = config.pin_cpu {
        match cpu_affinity::pin_current_thread(cpu) {
            Ok(()) => tracing::info!(
                cpu = cpu,
                affinity = ?cpu_affinity::current_affinity().unwrap_or_default(),
                "Worker pinned"
            ),
            Err(e) => tracing::warn!(cpu = cpu, error = %e, "CPU pinning failed, running unpinned"),
        }
    }

    let wake: Box<dyn WakeSource> = match &config.wake {
        WakeConfig::Datagram(endpoint) => Box::new(DatagramWake::bind((
            endpoint.host(),
            endpoint.port().value(),
        ))?),
        WakeConfig::Mmap { path, armed } => Box::new(MmapSignal::open(path, *armed)?),
    };

    let master = MasterClient::new(RpcClient::new(config.master.clone()));
    let workload = CommandWorkload::new(&config.command);

    Worker::new(wake, workload, master)
        .with_id(config.id.clone())
        .with_rounds(config.rounds)
        .run()
}
