//! Interactive command-line front end for the garage opener service.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::warn;
use tokio::io::{AsyncBufReadExt, BufReader};

use garagelink::{
    BluestRadio, DoorCommand, JsonFileStore, OpenerService, PeripheralIdentity, ScanTicket,
    ServiceConfig,
};

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("garagelink"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn print_help() {
    println!("Commands:");
    println!("  scan              discover nearby openers");
    println!("  devices           list the last scan's results");
    println!("  known             list saved and system-known openers");
    println!("  connect <n|addr>  connect to a scan result or an address");
    println!("  reconnect         connect to the last used opener");
    println!("  disconnect        drop the link, keep the peripheral handle");
    println!("  close             drop the link and release the handle");
    println!("  trigger           fire the door relay");
    println!("  send <text>       send a raw text command");
    println!("  forget            forget the last used opener");
    println!("  status            show connection and operation state");
    println!("  quit              exit");
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let base = data_dir();
    let config_path = base.join("config.json");
    if !config_path.exists() {
        if let Err(e) = ServiceConfig::default().save(&config_path).await {
            warn!("Could not write default config: {}", e);
        }
    }
    let config = ServiceConfig::load(&config_path).await;

    let radio = Arc::new(
        BluestRadio::new()
            .await
            .context("bluetooth adapter unavailable")?,
    );
    let store = Arc::new(JsonFileStore::new(base.join("devices.json")));
    let service = Arc::new(OpenerService::with_config(radio, store, config));

    spawn_state_printer(&service);

    println!("garagelink - BLE garage opener client");
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb {
            "scan" => run_scan(&service).await,
            "devices" => {
                print_devices(&service.events().discovered_devices());
            }
            "known" => {
                print_devices(&service.refresh_known().await);
            }
            "connect" => run_connect(&service, rest).await,
            "reconnect" => report(service.reconnect().await, "Connected"),
            "disconnect" => {
                service.disconnect().await;
                println!("Disconnected.");
            }
            "close" => {
                service.close().await;
                println!("Closed.");
            }
            "trigger" => report(service.trigger().await, "Door triggered"),
            "send" => {
                if rest.is_empty() {
                    println!("Usage: send <text>");
                } else {
                    let command = DoorCommand::custom(rest);
                    report(service.send(&command).await, "Command acknowledged");
                }
            }
            "forget" => {
                service.forget_device().await;
                println!("Forgot the last used opener.");
            }
            "status" => print_status(&service).await,
            "help" => print_help(),
            "quit" | "exit" => break,
            other => println!("Unknown command {:?}, try 'help'", other),
        }
    }

    service.close().await;
    Ok(())
}

fn spawn_state_printer(service: &Arc<OpenerService>) {
    let events = service.events();
    tokio::spawn(async move {
        let mut connection = events.connection();
        let mut operation = events.operation();
        loop {
            tokio::select! {
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    println!("[connection] {:?}", *connection.borrow_and_update());
                }
                changed = operation.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    println!("[operation] {:?}", *operation.borrow_and_update());
                }
            }
        }
    });
}

async fn run_scan(service: &OpenerService) {
    let ticket = match service.start_scan().await {
        Ok(ticket) => ticket,
        Err(e) => {
            println!("Scan failed: {}", e);
            return;
        }
    };
    println!("Scanning...");
    let ScanTicket {
        mut devices,
        mut completion,
    } = ticket;
    loop {
        tokio::select! {
            changed = devices.changed() => {
                if changed.is_err() {
                    break;
                }
                print_devices(&devices.borrow_and_update());
            }
            completed = &mut completion => {
                match completed {
                    Ok(true) => println!("Scan window elapsed."),
                    _ => println!("Scan stopped."),
                }
                break;
            }
        }
    }
}

async fn run_connect(service: &OpenerService, arg: &str) {
    if arg.is_empty() {
        println!("Usage: connect <index|address>");
        return;
    }
    if let Ok(index) = arg.parse::<usize>() {
        let discovered = service.events().discovered_devices();
        match discovered.get(index) {
            Some(peripheral) => report(service.connect(peripheral).await, "Connected"),
            None => println!("No scan result at index {}", index),
        }
    } else {
        report(service.connect_saved(arg).await, "Connected");
    }
}

async fn print_status(service: &OpenerService) {
    println!("Connection: {:?}", service.connection_state());
    println!("Operation:  {:?}", service.operation_state());
    match service.connected_peripheral().await {
        Some(peripheral) => println!(
            "Peripheral: {} ({})",
            peripheral.display_name(),
            peripheral.address
        ),
        None => println!("Peripheral: none"),
    }
    match service.last_connected().await {
        Some(address) => println!("Last used:  {}", address),
        None => println!("Last used:  none"),
    }
    println!(
        "Radio:      {}",
        if service.is_radio_enabled().await {
            "enabled"
        } else {
            "disabled"
        }
    );
}

fn print_devices(devices: &[PeripheralIdentity]) {
    if devices.is_empty() {
        println!("  (none)");
        return;
    }
    for (index, device) in devices.iter().enumerate() {
        println!(
            "  [{}] {} ({}){}",
            index,
            device.display_name(),
            device.address,
            if device.saved { " [saved]" } else { "" }
        );
    }
}

fn report(result: Result<(), garagelink::BleError>, success: &str) {
    match result {
        Ok(()) => println!("{}.", success),
        Err(e) => println!("Error: {}", e),
    }
}
