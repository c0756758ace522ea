// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `snapsync validate` command - Validate an experiment file.

use snapsync_core::{ConfigLoader, WakeConfig, WakeTarget};

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");

            if let Some(master) = &config.master {
                println!();
                println!("Master:");
                println!("  RPC Listen:       {}", master.listen);
                if let Some(endpoint) = &master.datagram_listen {
                    println!("  Datagram Ingress: {}", endpoint);
                }
                println!("  Label:            {}", master.label);
                if let Some(port) = master.metrics_port {
                    println!("  Metrics Port:     {}", port);
                }
            }

            if let Some(trigger) = &config.trigger {
                println!();
                println!("Trigger:");
                println!("  Master:     {}", trigger.master);
                println!(
                    "  Expecting:  {} ({} accounting)",
                    trigger.expectation.expected(),
                    trigger.expectation.mode()
                );
                println!(
                    "  Rounds:     {} (interval {}ms)",
                    trigger.rounds,
                    trigger.round_interval.as_millis()
                );
                if let Some(endpoint) = &trigger.sync_worker {
                    println!("  Sync Worker: {}", endpoint);
                }
                println!("  Targets ({}):", trigger.targets.len());
                for target in &trigger.targets {
                    let id = target.id.as_ref().map(|id| id.as_str()).unwrap_or("-");
                    match &target.target {
                        WakeTarget::Datagram(endpoint) => {
                            println!("    - {} datagram {}", id, endpoint)
                        }
                        WakeTarget::Mmap { path, armed, release } => println!(
                            "    - {} mmap {} ({:?} -> {:?})",
                            id,
                            path.display(),
                            *armed as char,
                            *release as char
                        ),
                    }
                }
            }

            if !config.workers.is_empty() {
                println!();
                println!("Workers ({}):", config.workers.len());
                for worker in &config.workers {
                    let wake = match &worker.wake {
                        WakeConfig::Datagram(endpoint) => format!("datagram {}", endpoint),
                        WakeConfig::Mmap { path, .. } => format!("mmap {}", path.display()),
                    };
                    let rounds = if worker.rounds == 0 {
                        "forever".to_string()
                    } else {
                        worker.rounds.to_string()
                    };
                    println!(
                        "  - {} ({}, rounds: {}, master: {})",
                        worker.id, wake, rounds, worker.master
                    );
                    println!("      command: {}", worker.command);
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
