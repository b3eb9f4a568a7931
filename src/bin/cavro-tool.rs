pub mod cli;

use std::io;
use std::process;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, shells::Bash};
use json::JsonValue;
use log::error;

use cavro_link::discovery::{self, FoundDevice};
use cavro_link::{DeviceSession, NativeDriver, PortRegistry, PortSettings, Response, Transport};

use cli::{Cli, Commands};

enum OutputFormat {
    Plain,
    Json,
}

fn slice_to_column<T: ToString>(data: &[T]) -> String {
    data.iter()
        .map(|x| x.to_string())
        .collect::<Vec<String>>()
        .join("\n")
}

fn port_settings(cli: &Cli, base: PortSettings) -> PortSettings {
    PortSettings::new(
        cli.baudrate,
        cli.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(base.timeout),
        cli.attempts.unwrap_or(base.max_attempts),
    )
}

fn device_to_json(device: &FoundDevice) -> JsonValue {
    let mut obj = JsonValue::new_object();
    obj["port"] = device.port_name.clone().into();
    obj["address"] = device.address.value().into();
    obj["config"] = device.config.clone().into();
    obj["firmware"] = device.firmware.clone().into();
    obj
}

fn response_to_json(response: &Response) -> JsonValue {
    let mut obj = JsonValue::new_object();
    obj["status"] = response.status.into();
    obj["ready"] = response.is_ready().into();
    obj["error"] = match response.error() {
        Some(err) => err.to_string().into(),
        None => JsonValue::Null,
    };
    obj["data"] = response.data_str().into_owned().into();
    obj["raw"] = hex::encode(&response.data).into();
    obj
}

fn cmd_list_ports(registry: &PortRegistry, fmt: OutputFormat) -> Result<String> {
    let ports = discovery::list_candidate_ports(registry)?;
    Ok(match fmt {
        OutputFormat::Plain => slice_to_column(&ports),
        OutputFormat::Json => json::stringify(ports),
    })
}

fn cmd_find(
    registry: &PortRegistry,
    port: &str,
    addresses: &[u8],
    settings: PortSettings,
    fmt: OutputFormat,
) -> Result<String> {
    let found = if port == "auto" {
        discovery::find_devices(registry, addresses, settings)
    } else {
        discovery::find_devices_on(registry, &[port.to_string()], addresses, settings)
    }
    .context("Device scan failed")?;

    Ok(match fmt {
        OutputFormat::Plain => slice_to_column(
            &found
                .iter()
                .map(|d| format!("{}\t{}\t{}\t{}", d.port_name, d.address, d.config, d.firmware))
                .collect::<Vec<_>>(),
        ),
        OutputFormat::Json => json::stringify(JsonValue::Array(
            found.iter().map(device_to_json).collect(),
        )),
    })
}

fn guess_port(registry: &PortRegistry, address: u8) -> Result<String> {
    discovery::find_devices(registry, &[address], PortSettings::discovery())?
        .into_iter()
        .next()
        .map(|device| device.port_name)
        .ok_or_else(|| anyhow!("No pump answering at address {}", address))
}

fn cmd_send(
    registry: &PortRegistry,
    port: &str,
    address: u8,
    command: &str,
    settings: PortSettings,
    fmt: OutputFormat,
) -> Result<String> {
    let port_name = if port == "auto" {
        guess_port(registry, address)?
    } else {
        port.to_string()
    };

    let mut session = DeviceSession::open(registry, &port_name, address, settings)
        .with_context(|| format!("Failed to open {}", port_name))?;
    let response = session
        .send_receive(command)
        .with_context(|| format!("Failed to send {:?} to {}#{}", command, port_name, address));
    session.close();
    let response = response?;

    Ok(match fmt {
        OutputFormat::Plain => {
            let state = if response.is_ready() { "ready" } else { "busy" };
            match response.error() {
                Some(err) => format!(
                    "{:#04x} {} ({}) {}",
                    response.status,
                    state,
                    err,
                    response.data_str()
                ),
                None => format!("{:#04x} {} {}", response.status, state, response.data_str()),
            }
        }
        OutputFormat::Json => json::stringify(response_to_json(&response)),
    })
}

fn do_main() -> Result<String> {
    if std::env::var("GENERATE_COMPLETION").is_ok() {
        generate(Bash, &mut Cli::command(), "cavro-tool", &mut io::stdout());

        return Ok(String::default());
    }

    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.debug {
        "debug"
    } else {
        "info"
    }))
    .format_timestamp(None)
    .format_target(false)
    .init();

    let fmt = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Plain
    };

    let registry = PortRegistry::new(NativeDriver {
        force: cli.force,
        rs485: cli.rs485,
    });

    match &cli.command {
        Commands::ListPorts => cmd_list_ports(&registry, fmt),
        Commands::Find { addresses } => cmd_find(
            &registry,
            &cli.port,
            addresses,
            port_settings(&cli, PortSettings::discovery()),
            fmt,
        ),
        Commands::Send { address, command } => cmd_send(
            &registry,
            &cli.port,
            *address,
            command,
            port_settings(&cli, PortSettings::default()),
            fmt,
        ),
    }
}

fn main() {
    match do_main() {
        Ok(s) => println!("{}", s),
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}
