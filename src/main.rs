use ble_connector::domain::models::{
    ConnectionStatus, MessageSeverity, PeripheralRef, SessionEvent,
};
use ble_connector::domain::settings::{SettingsService, TransportKind};
use ble_connector::infrastructure::bluetooth::central::BtleplugTransport;
use ble_connector::infrastructure::bluetooth::simulated::{SimPeripheral, SimulatedTransport};
use ble_connector::infrastructure::bluetooth::transport::BleTransport;
use ble_connector::infrastructure::bluetooth::BleSession;
use ble_connector::infrastructure::logging::init_logger;
use ble_connector::infrastructure::permissions::StaticPermissionBroker;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Debug, PartialEq, Eq)]
enum ShellCommand {
    Scan,
    Devices,
    Connect(String),
    Disconnect,
    Send(String),
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<ShellCommand> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word {
        "scan" => Some(ShellCommand::Scan),
        "devices" | "ls" => Some(ShellCommand::Devices),
        "connect" if !rest.is_empty() => Some(ShellCommand::Connect(rest.to_string())),
        "disconnect" => Some(ShellCommand::Disconnect),
        "send" => Some(ShellCommand::Send(rest.to_string())),
        "status" => Some(ShellCommand::Status),
        "help" | "?" => Some(ShellCommand::Help),
        "quit" | "exit" => Some(ShellCommand::Quit),
        _ => None,
    }
}

/// Resolve a list index or a raw id against the selectable devices
fn resolve_target(arg: &str, devices: &[PeripheralRef]) -> String {
    arg.parse::<usize>()
        .ok()
        .and_then(|n| devices.get(n))
        .map(|d| d.id.clone())
        .unwrap_or_else(|| arg.to_string())
}

fn demo_transport() -> SimulatedTransport {
    let sim = SimulatedTransport::new();
    sim.add_peripheral(
        SimPeripheral::new("sim-esp32", Some("ESP32 Message Board"))
            .with_message_channel()
            .with_rssi(-48),
    );
    sim.add_peripheral(SimPeripheral::new("sim-beacon", None).with_rssi(-81));
    sim
}

fn print_event(event: SessionEvent) {
    match event {
        SessionEvent::DeviceDiscovered(p) => println!("+ {} ({})", p.label(), p.id),
        SessionEvent::ScanState(state) => println!("scan: {:?}", state),
        SessionEvent::ConnectionStatus(ConnectionStatus::Connected(p)) => {
            println!("connected: {}", p.label())
        }
        SessionEvent::ConnectionStatus(status) => println!("connection: {:?}", status),
        SessionEvent::PermissionResult(granted) => println!("Permission granted? {}", granted),
        SessionEvent::MessageSent(text) => println!("sent: {}", text),
        SessionEvent::LogMessage(msg) => match msg.severity {
            MessageSeverity::Error | MessageSeverity::Warning => eprintln!("! {}", msg.message),
            _ => println!("  {}", msg.message),
        },
    }
}

const HELP: &str = "commands: scan | devices | connect <n|id> | disconnect | send <text> | status | quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings = SettingsService::new()?;

    let _logging_guard = init_logger(&settings.log_settings())
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();
    info!("Starting BLE connector");

    let transport: Arc<dyn BleTransport> = match settings.get().transport {
        TransportKind::Btleplug => Arc::new(BtleplugTransport::new().await?),
        TransportKind::Simulated => Arc::new(demo_transport()),
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let session = BleSession::new(
        transport,
        Arc::new(StaticPermissionBroker),
        settings.get(),
        event_tx,
    )?;

    if let Some(last) = &settings.get().last_connected_id {
        println!("last connected device: {}", last);
    }
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => print_event(event),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let Some(command) = parse_command(&line) else {
                    println!("{}", HELP);
                    continue;
                };

                match command {
                    ShellCommand::Scan => {
                        if let Err(e) = session.toggle_scanning().await {
                            error!("Failed to toggle scanning: {}", e);
                        }
                    }
                    ShellCommand::Devices => {
                        for (n, device) in session.selectable_devices().iter().enumerate() {
                            let rssi = device
                                .rssi
                                .map(|r| format!("{} dBm", r))
                                .unwrap_or_else(|| "N/A".to_string());
                            println!("[{}] {} ({}) RSSI: {}", n, device.label(), device.id, rssi);
                        }
                    }
                    ShellCommand::Connect(arg) => {
                        let id = resolve_target(&arg, &session.selectable_devices());
                        match session.connect(&id).await {
                            Ok(device) => {
                                if let Err(e) = settings.remember_connection(&device.id) {
                                    error!("Failed to save settings: {}", e);
                                }
                            }
                            Err(e) => error!("Connect failed: {}", e),
                        }
                    }
                    ShellCommand::Disconnect => {
                        if let Err(e) = session.disconnect().await {
                            error!("Disconnect failed: {}", e);
                        }
                    }
                    ShellCommand::Send(text) => {
                        if let Err(e) = session.send_message(&text).await {
                            error!("Send failed: {}", e);
                        }
                    }
                    ShellCommand::Status => {
                        println!("scanning: {}", session.is_scanning().await);
                        println!("connection: {:?}", session.connection_state().status());
                    }
                    ShellCommand::Help => println!("{}", HELP),
                    ShellCommand::Quit => break,
                }
            }
        }
    }

    session.disconnect().await.ok();
    session.stop_scan().await.ok();
    info!("BLE connector stopped");
    Ok(())
}
