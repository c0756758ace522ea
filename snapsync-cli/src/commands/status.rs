// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `snapsync status` command - Show the master's barrier state.

use snapsync_core::{ConfigLoader, Endpoint, MasterClient, MasterStatus, RpcClient};

pub async fn execute(
    config_path: &str,
    master: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint: Endpoint = match master {
        Some(addr) => addr.parse()?,
        None => ConfigLoader::load_file(config_path)?
            .trigger
            .map(|t| t.master)
            .ok_or("no --master given and configuration has no trigger section")?,
    };

    let client = MasterClient::new(RpcClient::new(endpoint.clone()));
    let status = tokio::task::spawn_blocking(move || client.status()).await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match status {
        MasterStatus::Idle => println!("{}: idle", endpoint),
        MasterStatus::Armed {
            round,
            mode,
            received,
            expected,
            elapsed_ms,
        } => println!(
            "{}: round {} armed ({} accounting), {}/{} reported, {:.2} ms elapsed",
            endpoint, round, mode, received, expected, elapsed_ms
        ),
    }

    Ok(())
}
