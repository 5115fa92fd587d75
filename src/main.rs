use fitness_band_ble::domain::models::{PeripheralId, Phase, SessionEvent};
use fitness_band_ble::domain::protocol;
use fitness_band_ble::infrastructure::logging;
use fitness_band_ble::{BtleAdapter, Session, SessionCommand, SessionRunner, SettingsService};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

const HELP: &str = "commands: scan | select <n> | measure | read <uuid> | cancel | quit";

/// Map a line typed on stdin to a session command
fn parse_command(line: &str, discovered: &[PeripheralId]) -> Result<SessionCommand, String> {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (Some("scan"), None) => Ok(SessionCommand::StartScan),
        (Some("select"), Some(n)) => {
            let index: usize = n.parse().map_err(|_| format!("not a number: {}", n))?;
            discovered
                .get(index)
                .cloned()
                .map(SessionCommand::SelectPeripheral)
                .ok_or_else(|| format!("no peripheral #{}", index))
        }
        (Some("measure"), None) => Ok(SessionCommand::MeasureHeartRate),
        (Some("read"), Some(uuid)) => protocol::parse_uuid(uuid)
            .map(SessionCommand::ReadCharacteristic)
            .map_err(|e| e.to_string()),
        (Some("cancel"), None) => Ok(SessionCommand::Cancel),
        (Some("quit"), None) => Ok(SessionCommand::Shutdown),
        _ => Err(HELP.to_string()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = SettingsService::new()?;
    let _log_guard = logging::init_logger(&settings.get().log_settings)?;
    info!("Starting fitness band BLE session");
    info!("Settings: {}", settings.path().display());

    let (adapter_tx, adapter_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();

    let adapter = BtleAdapter::init(settings.get().adapter_index, adapter_tx).await?;
    let session = Session::new(adapter, event_tx, settings.session_config());
    let (handle, runner) = SessionRunner::new(session, adapter_rx);
    let runner_task = tokio::spawn(runner.run());

    // Peripherals in the order they were listed, for `select <n>`
    let discovered: Arc<Mutex<Vec<PeripheralId>>> = Arc::new(Mutex::new(Vec::new()));

    let listed = discovered.clone();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Ok(mut list) = listed.lock() {
                match &event {
                    SessionEvent::PhaseChanged {
                        to: Phase::Scanning,
                        ..
                    } => list.clear(),
                    SessionEvent::PeripheralDiscovered { peripheral } => {
                        eprintln!("#{} {} ({})", list.len(), peripheral.name, peripheral.id);
                        list.push(peripheral.id.clone());
                    }
                    _ => {}
                }
            }
            match serde_json::to_string(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Could not serialize event: {}", e),
            }
        }
    });

    handle.start_scan()?;
    eprintln!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = {
            let list = discovered
                .lock()
                .map_err(|_| anyhow::anyhow!("Lock error"))?;
            parse_command(&line, &list)
        };
        match command {
            Ok(SessionCommand::Shutdown) => break,
            Ok(command) => handle.send(command)?,
            Err(message) => eprintln!("{}", message),
        }
    }

    // The runner also stops once every handle is gone
    let _ = handle.shutdown();
    drop(handle);
    runner_task.await?;
    printer.await?;
    info!("Bye");
    Ok(())
}
