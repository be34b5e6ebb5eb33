use carbus::config::EmulatorConfig;
use carbus::emulator::VehicleEmulator;
use carbus::protocol::{CommandResponse, CommandType, ProtocolError, ResponseStatus};
use carbus::transport::{BroadcastTransport, FrameRecord};
use clap::{App, Arg};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const FRAME_BROADCAST_BUFFER_SIZE: usize = 256;

type SharedEmulator = Arc<Mutex<VehicleEmulator>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("carbus-emulator")
        .version("0.1.0")
        .about("Vehicle ECU emulator")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .value_name("ADDR")
                .help("Control server address, overrides the configuration")
                .takes_value(true),
        )
        .get_matches();

    let mut config = EmulatorConfig::load_or_default(matches.value_of("config").map(Path::new));
    if let Some(listen) = matches.value_of("listen") {
        config.listen_addr = listen.to_string();
    }

    let emulator = Arc::new(Mutex::new(VehicleEmulator::with_config(&config)?));
    emulator.lock().await.start();

    let mut bus = BroadcastTransport::new(FRAME_BROADCAST_BUFFER_SIZE);

    let tcp_emulator = Arc::clone(&emulator);
    let tcp_bus = bus.clone();
    let listen_addr = config.listen_addr.clone();
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(&listen_addr, tcp_emulator, tcp_bus).await {
            error!("TCP server error: {}", e);
        }
    });

    // Poll well below the fastest frame interval
    let mut interval = time::interval(Duration::from_millis(config.poll_interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }

        let result = {
            let mut guard = emulator.lock().await;
            if !guard.is_running() {
                break;
            }
            guard.update(&mut bus)
        };

        if let Err(e) = result {
            error!("emulator error: {}", e);
            break;
        }
    }

    emulator.lock().await.stop();
    tcp_server.abort();

    Ok(())
}

async fn start_tcp_server(
    addr: &str,
    emulator: SharedEmulator,
    bus: BroadcastTransport,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    info!("control server listening on {}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("client connected: {}", peer);
                let client_emulator = Arc::clone(&emulator);
                let frames_rx = bus.subscribe();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_emulator, frames_rx).await {
                        warn!("client {} error: {}", peer, e);
                    }
                    info!("client {} disconnected", peer);
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    emulator: SharedEmulator,
    frames_rx: broadcast::Receiver<FrameRecord>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    let mut frames_rx = Some(frames_rx);
    let mut monitor_task: Option<tokio::task::JoinHandle<()>> = None;

    let mut line = String::new();
    loop {
        line.clear();
        if buf_reader.read_line(&mut line).await? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let (response, subscribe) = {
            let mut guard = emulator.lock().await;
            let now_ms = guard.now_ms();
            match guard.protocol_handler().parse_command(&line) {
                Ok(command) => {
                    debug!(id = command.id, "received command {:?}", command.command_type);
                    let id = command.id;
                    let subscribe = matches!(command.command_type, CommandType::Subscribe);
                    let response = match guard.queue_command(command).and_then(|()| guard.process_commands()) {
                        Ok(()) => guard
                            .get_responses()
                            .into_iter()
                            .find(|r| r.id == id)
                            .unwrap_or_else(|| error_response(id, "no response produced", now_ms)),
                        Err(e) => error_response(id, &e.to_string(), now_ms),
                    };
                    (response, subscribe)
                }
                Err(e) => (parse_error_response(e, now_ms), false),
            }
        };

        let subscribe = subscribe && response.status == ResponseStatus::Success;
        write_json_line(&writer, &response).await?;

        if subscribe {
            if let Some(rx) = frames_rx.take() {
                monitor_task = Some(tokio::spawn(stream_frames(rx, Arc::clone(&writer))));
            }
        }
    }

    if let Some(task) = monitor_task {
        task.abort();
    }
    Ok(())
}

fn error_response(id: u32, message: &str, timestamp: u64) -> CommandResponse {
    CommandResponse {
        id,
        timestamp,
        status: ResponseStatus::Error,
        message: Some(message.to_string()),
    }
}

fn parse_error_response(error: ProtocolError, timestamp: u64) -> CommandResponse {
    CommandResponse {
        id: 0,
        timestamp,
        status: ResponseStatus::InvalidCommand,
        message: Some(format!("Invalid command format: {}", error)),
    }
}

async fn write_json_line(
    writer: &Mutex<OwnedWriteHalf>,
    response: &CommandResponse,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string(response)?;
    let mut guard = writer.lock().await;
    guard.write_all(json.as_bytes()).await?;
    guard.write_all(b"\n").await?;
    Ok(())
}

async fn stream_frames(mut rx: broadcast::Receiver<FrameRecord>, writer: Arc<Mutex<OwnedWriteHalf>>) {
    loop {
        let record = match rx.recv().await {
            Ok(record) => record,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("monitor lagged, {} frames dropped", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to encode frame: {}", e);
                continue;
            }
        };

        let mut guard = writer.lock().await;
        if guard.write_all(json.as_bytes()).await.is_err() || guard.write_all(b"\n").await.is_err() {
            break;
        }
    }
}
