use carbus::gate::SubsystemGroup;
use carbus::protocol::{Command, CommandType, StatusReport};
use carbus::signals::{SignalId, SignalValue};
use carbus::transport::FrameRecord;
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::process;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";
const COMMAND_TIMEOUT_SECS: u64 = 5;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let signal_names: Vec<&str> = SignalId::ALL.iter().map(|s| s.name()).collect();
    let group_names: Vec<&str> = SubsystemGroup::ALL.iter().map(|g| g.name()).collect();

    let matches = App::new("carbus")
        .version("0.1.0")
        .about("Control client for the vehicle ECU emulator")
        .setting(AppSettings::VersionlessSubcommands)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Emulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Emulator control port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(SubCommand::with_name("ping").about("Test connection to the emulator"))
        .subcommand(SubCommand::with_name("status").about("Show signals, subsystem switches and frames"))
        .subcommand(
            SubCommand::with_name("signal")
                .about("Set a signal value")
                .arg(
                    Arg::with_name("name")
                        .help("Signal name")
                        .required(true)
                        .possible_values(&signal_names),
                )
                .arg(
                    Arg::with_name("value")
                        .help("on/off for switches, a number otherwise")
                        .required(true)
                        .allow_hyphen_values(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("get")
                .about("Read a signal value")
                .arg(
                    Arg::with_name("name")
                        .help("Signal name")
                        .required(true)
                        .possible_values(&signal_names),
                ),
        )
        .subcommand(
            SubCommand::with_name("group")
                .about("Enable or disable a subsystem group")
                .arg(
                    Arg::with_name("name")
                        .help("Subsystem group")
                        .required(true)
                        .possible_values(&group_names),
                )
                .arg(
                    Arg::with_name("state")
                        .help("Group state")
                        .required(true)
                        .possible_values(&["on", "off", "enable", "disable"]),
                ),
        )
        .subcommand(SubCommand::with_name("frames").about("Dump the current frame table"))
        .subcommand(SubCommand::with_name("monitor").about("Stream transmitted frames (Ctrl+C to stop)"))
        .subcommand(
            SubCommand::with_name("server")
                .about("Start the emulator")
                .arg(
                    Arg::with_name("config")
                        .short("c")
                        .long("config")
                        .value_name("FILE")
                        .help("JSON configuration file")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("background")
                        .short("b")
                        .long("background")
                        .help("Run server in background"),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");
    let verbose = matches.is_present("verbose");

    if verbose {
        println!("{} {}:{}", "Connecting to".dimmed(), host, port);
    }

    let client = Client { host, port, format };

    match matches.subcommand() {
        ("ping", _) => client.ping().await?,
        ("status", _) => client.status().await?,
        ("signal", Some(sub)) => client.set_signal(sub).await?,
        ("get", Some(sub)) => client.get_signal(sub).await?,
        ("group", Some(sub)) => client.set_group(sub).await?,
        ("frames", _) => client.frames().await?,
        ("monitor", _) => client.monitor().await?,
        ("server", Some(sub)) => handle_server(sub, host, port)?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Start the emulator", "carbus server".bright_cyan());
            println!("  {} Switch the ignition on", "carbus signal ignition on".bright_cyan());
            println!("  {} Watch the bus", "carbus monitor".bright_cyan());
        }
    }

    Ok(())
}

struct Client<'a> {
    host: &'a str,
    port: u16,
    format: &'a str,
}

impl Client<'_> {
    async fn ping(&self) -> CliResult<()> {
        let response = self.send(CommandType::Ping).await?;
        match self.format {
            "json" => println!("{}", response),
            "compact" => println!("{}", "PONG".bright_green()),
            _ => {
                if response["status"] == "Success" {
                    println!("{} {}", "OK".green(), "Emulator is responsive".bright_green());
                } else {
                    println!("{} {}", "FAIL".red(), "Ping failed".bright_red());
                }
            }
        }
        Ok(())
    }

    async fn status(&self) -> CliResult<()> {
        let response = self.send(CommandType::Status).await?;
        if self.format == "json" {
            println!("{}", response);
            return Ok(());
        }

        let report: StatusReport = match response["message"].as_str().map(serde_json::from_str) {
            Some(Ok(report)) => report,
            _ => {
                println!("{} {}", "FAIL".red(), "Status check failed".bright_red());
                return Ok(());
            }
        };

        if self.format == "compact" {
            println!(
                "running={} uptime={}s sent={} failures={}",
                report.running,
                report.uptime_ms / 1000,
                report.frames_sent,
                report.send_failures
            );
            return Ok(());
        }

        println!("{}", "Emulator Status".bright_blue().bold());
        println!("{}", "===============".bright_blue());
        println!("{:<16} {}", "Running:".bright_white(), on_off(report.running));
        println!("{:<16} {}s", "Uptime:".bright_white(), report.uptime_ms / 1000);
        println!("{:<16} {}", "Commands:".bright_white(), report.command_count);
        println!("{:<16} {}", "Frames sent:".bright_white(), report.frames_sent);
        println!("{:<16} {}", "Send failures:".bright_white(), report.send_failures);

        println!("\n{}", "Signals".bright_white().bold());
        for reading in &report.signals {
            println!("  {:<18} {}", reading.signal.name(), reading.value.to_string().bright_cyan());
        }

        println!("\n{}", "Subsystems".bright_white().bold());
        for reading in &report.groups {
            println!("  {:<18} {}", reading.group.name(), on_off(reading.enabled));
        }

        println!("\n{}", "Frames".bright_white().bold());
        for record in &report.frames {
            println!("  {}", record);
        }
        Ok(())
    }

    async fn set_signal(&self, matches: &ArgMatches<'_>) -> CliResult<()> {
        let signal: SignalId = matches.value_of("name").unwrap_or_default().parse()?;
        let raw = matches.value_of("value").unwrap_or_default();
        let value = parse_value(raw).ok_or_else(|| format!("invalid signal value '{}'", raw))?;

        let response = self.send(CommandType::SetSignal { signal, value }).await?;
        self.print_result(signal.name(), &response);
        Ok(())
    }

    async fn get_signal(&self, matches: &ArgMatches<'_>) -> CliResult<()> {
        let signal: SignalId = matches.value_of("name").unwrap_or_default().parse()?;
        let response = self.send(CommandType::GetSignal { signal }).await?;
        self.print_result(signal.name(), &response);
        Ok(())
    }

    async fn set_group(&self, matches: &ArgMatches<'_>) -> CliResult<()> {
        let group: SubsystemGroup = matches.value_of("name").unwrap_or_default().parse()?;
        let enabled = normalize_state(matches.value_of("state").unwrap_or_default());
        let response = self.send(CommandType::SetGroup { group, enabled }).await?;
        self.print_result(group.name(), &response);
        Ok(())
    }

    async fn frames(&self) -> CliResult<()> {
        let response = self.send(CommandType::GetFrames).await?;
        if self.format == "json" {
            println!("{}", response);
            return Ok(());
        }
        let lines: Vec<String> = response["message"]
            .as_str()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or_default();
        for line in lines {
            println!("{}", line);
        }
        Ok(())
    }

    async fn monitor(&self) -> CliResult<()> {
        let stream = TcpStream::connect((self.host, self.port)).await?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(command_line(CommandType::Subscribe)?.as_bytes()).await?;

        eprintln!("{}", "Monitoring frames (Press Ctrl+C to stop)...".bright_blue().bold());

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if self.format == "json" {
                println!("{}", line);
                continue;
            }
            // the subscribe acknowledgement is not a frame
            let Ok(record) = serde_json::from_str::<FrameRecord>(&line) else {
                continue;
            };
            match self.format {
                "compact" => println!("{}", record),
                _ => println!("{} {}", timestamp_now().to_string().dimmed(), record.to_string().bright_cyan()),
            }
        }
        Ok(())
    }

    async fn send(&self, command_type: CommandType) -> CliResult<serde_json::Value> {
        let line = command_line(command_type)?;
        let response = send_command(self.host, self.port, &line).await?;
        Ok(serde_json::from_str(&response)?)
    }

    fn print_result(&self, subject: &str, response: &serde_json::Value) {
        match self.format {
            "json" => println!("{}", response),
            "compact" => println!("{}", response["message"].as_str().unwrap_or("")),
            _ => {
                let message = response["message"].as_str().unwrap_or("");
                match response["status"].as_str().unwrap_or("Unknown") {
                    "Success" => println!("{} {}", "OK".green(), message.bright_cyan()),
                    "NegativeAck" => println!("{} {} rejected: {}", "NACK".red(), subject.bright_white(), message.bright_red()),
                    status => println!("{} {} {}: {}", "FAIL".yellow(), subject.bright_white(), status.bright_blue(), message),
                }
            }
        }
    }
}

fn handle_server(matches: &ArgMatches<'_>, host: &str, port: u16) -> CliResult<()> {
    let background = matches.is_present("background");

    let mut cmd = process::Command::new("cargo");
    cmd.args(["run", "--bin", "carbus-emulator", "--", "--listen"]);
    cmd.arg(format!("{}:{}", host, port));
    if let Some(config) = matches.value_of("config") {
        cmd.args(["--config", config]);
    }

    println!("{}", "Starting vehicle ECU emulator...".bright_green().bold());
    if background {
        cmd.spawn()?;
        println!("{} Server started in background on port {}", "OK".green(), port);
    } else {
        cmd.status()?;
    }
    Ok(())
}

fn normalize_state(state: &str) -> bool {
    matches!(state, "on" | "enable")
}

fn on_off(enabled: bool) -> ColoredString {
    if enabled {
        "on".bright_green()
    } else {
        "off".bright_red()
    }
}

/// `on`/`off`/`true`/`false` are switches, anything else must be numeric.
fn parse_value(raw: &str) -> Option<SignalValue> {
    match raw.to_ascii_lowercase().as_str() {
        "on" | "true" | "open" => Some(SignalValue::Bool(true)),
        "off" | "false" | "closed" => Some(SignalValue::Bool(false)),
        other => other
            .parse::<i32>()
            .map(SignalValue::Int)
            .or_else(|_| other.parse::<f32>().map(SignalValue::Fixed))
            .ok(),
    }
}

fn command_line(command_type: CommandType) -> CliResult<String> {
    let timestamp = timestamp_now();
    let command = Command {
        // never zero, zero is rejected
        id: (timestamp as u32).max(1),
        timestamp,
        command_type,
    };
    let mut line = serde_json::to_string(&command)?;
    line.push('\n');
    Ok(line)
}

async fn send_command(host: &str, port: u16, line: &str) -> CliResult<String> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to emulator at {}", "ERROR".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("Server is not running. Start it with:");
                eprintln!("   {}", "carbus server".bright_cyan());
            }
            return Err(e.into());
        }
    };

    let exchange = async {
        let (reader, mut writer) = stream.into_split();
        writer.write_all(line.as_bytes()).await?;
        let mut response = String::new();
        let n = BufReader::new(reader).read_line(&mut response).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Server closed connection",
            ));
        }
        Ok(response)
    };

    match tokio::time::timeout(std::time::Duration::from_secs(COMMAND_TIMEOUT_SECS), exchange).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            eprintln!("{} Command timed out after {} seconds", "TIMEOUT".yellow(), COMMAND_TIMEOUT_SECS);
            Err("Command timeout".into())
        }
    }
}

fn timestamp_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
