use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::Result;
use log::{error, info};

use pulse_rs::btle::BtleplugAdapter;
use pulse_rs::client::{ClientConfig, HeartRateClient};
use pulse_rs::types::{ClientEvent, ConnectionState};

fn print_help() {
    info!("Commands (type + Enter):");
    info!("  s            – start a scan");
    info!("  x            – stop scanning");
    info!("  l            – list discovered devices");
    info!("  c <n|id>     – connect to device #n from the list, or by id");
    info!("  w <text>     – send text to the connected device");
    info!("  d            – disconnect");
    info!("  q            – quit\n");
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=pulse_rs=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Client ────────────────────────────────────────────────────────────────
    let adapter = Arc::new(BtleplugAdapter::new().await?);
    let (client, mut events) = HeartRateClient::start(adapter, ClientConfig::default()).await?;
    let client = Arc::new(client);
    print_help();

    // ── Stdin command loop ────────────────────────────────────────────────────
    // Lines are read on a dedicated OS thread (a StdinLock is not Send) and
    // relayed to an async task.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if line_tx.send(l.trim().to_owned()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let (quit_tx, mut quit_rx) = tokio::sync::oneshot::channel::<()>();
    let cmd_client = Arc::clone(&client);
    let cmd_task = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            let (cmd, arg) = match line.split_once(' ') {
                Some((cmd, arg)) => (cmd, arg.trim()),
                None => (line.as_str(), ""),
            };
            let result = match cmd {
                "" => continue,
                "q" => break,
                "s" => cmd_client.start_scan().await,
                "x" => cmd_client.stop_scan().await,
                "l" => {
                    for (n, d) in cmd_client.snapshot().devices.iter().enumerate() {
                        let rssi = d.rssi.map_or("N/A".into(), |r| r.to_string());
                        println!("  [{n}] {:24} {}  RSSI {rssi}", d.label(), d.id);
                    }
                    Ok(())
                }
                "c" => {
                    let devices = cmd_client.snapshot().devices;
                    let id = match arg.parse::<usize>() {
                        Ok(n) => devices.get(n).map(|d| d.id.clone()),
                        Err(_) => Some(arg.to_string()),
                    };
                    match id {
                        Some(id) => cmd_client.connect(&id).await,
                        None => {
                            error!("No device #{arg}; use 'l' to list");
                            Ok(())
                        }
                    }
                }
                "w" => cmd_client.send_command(arg).await,
                "d" => cmd_client.disconnect().await,
                _ => {
                    print_help();
                    Ok(())
                }
            };
            if let Err(e) = result {
                error!("{cmd}: {e}");
            }
        }
        let _ = quit_tx.send(());
    });

    // ── Main event loop ───────────────────────────────────────────────────────
    loop {
        let event = tokio::select! {
            _ = &mut quit_rx => break,
            event = events.recv() => event,
        };
        let Some(event) = event else { break };
        match event {
            ClientEvent::AdapterState(state) => info!("Bluetooth {state}"),
            ClientEvent::DeviceDiscovered(d) => {
                let rssi = d.rssi.map_or("N/A".into(), |r| r.to_string());
                println!("[SCAN] {}  id={}  RSSI {rssi}", d.label(), d.id);
            }
            ClientEvent::ScanStopped(reason) => info!("Scan stopped ({reason:?})"),
            ClientEvent::ConnectionState(ConnectionState::Streaming) => {
                info!("✅  Streaming heart rate");
            }
            ClientEvent::ConnectionState(ConnectionState::Disconnected) => {
                info!("❌  Disconnected");
            }
            ClientEvent::ConnectionState(state) => info!("Connection: {state}"),
            ClientEvent::Sample(sample) => {
                println!("[HR] {:3} bpm  row={:?}", sample.heart_rate, sample.row);
            }
            ClientEvent::CommandSent(text) => info!("Sent {text:?}"),
            ClientEvent::Error(e) => error!("{e}"),
        }
    }

    info!("Shutting down …");
    cmd_task.abort();
    let _ = cmd_task.await;
    match Arc::try_unwrap(client) {
        Ok(client) => client.shutdown().await,
        Err(_) => error!("Client still in use; exiting without shutdown"),
    }
    Ok(())
}
