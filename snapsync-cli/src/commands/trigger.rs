// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `snapsync trigger` command - Start rounds and wake workers.

use std::time::Duration;

use snapsync_core::{
    ConfigLoader, Endpoint, LatencyMetrics, MasterClient, RpcClient, SnapsyncError, Trigger,
    TriggerConfig, TriggerOutcome,
};

pub async fn execute(
    config_path: &str,
    rounds_override: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let trigger_config = config
        .trigger
        .ok_or("configuration has no trigger section")?;
    let rounds = rounds_override.unwrap_or(trigger_config.rounds);

    tracing::info!(
        master = %trigger_config.master,
        targets = trigger_config.targets.len(),
        expected = trigger_config.expectation.expected(),
        mode = trigger_config.expectation.mode(),
        rounds = rounds,
        "Starting trigger"
    );

    // The round loop is blocking socket I/O end to end.
    let outcomes =
        tokio::task::spawn_blocking(move || run(&trigger_config, rounds)).await??;

    let round_trips: Vec<Duration> = outcomes.iter().filter_map(|o| o.round_trip).collect();
    let failed: usize = outcomes.iter().map(|o| o.failed_wakes).sum();

    println!(
        "Triggered {} round(s), {} wake(s) failed",
        outcomes.len(),
        failed
    );
    if !round_trips.is_empty() {
        let stats = LatencyMetrics::from_durations(&round_trips, false);
        println!("[trigger] round-trips: {}", stats.summary_line());
    }

    Ok(())
}

fn run(config: &TriggerConfig, rounds: u64) -> Result<Vec<TriggerOutcome>, SnapsyncError> {
    let rpc = |endpoint: Endpoint| {
        let client = RpcClient::new(endpoint);
        match config.connect_timeout {
            Some(timeout) => client.connect_timeout(timeout),
            None => client,
        }
    };

    let targets = config.targets.iter().map(|t| t.target.clone()).collect();
    let mut trigger = Trigger::new(MasterClient::new(rpc(config.master.clone())), targets)?;
    if let Some(endpoint) = &config.sync_worker {
        trigger = trigger.with_sync_worker(rpc(endpoint.clone()));
    }

    trigger.run_rounds(&config.expectation, rounds, config.round_interval)
}
