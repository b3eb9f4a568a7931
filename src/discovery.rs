//! Best-effort scan for pumps attached to the host.

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::Address;
use crate::port::PortSettings;
use crate::registry::PortRegistry;
use crate::session::{DeviceSession, Transport};

/// Asks for the pump configuration.
pub const CONFIG_QUERY: &str = "?76";
/// Asks for the firmware version string.
pub const FIRMWARE_QUERY: &str = "&";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundDevice {
    pub port_name: String,
    pub address: Address,
    pub config: String,
    pub firmware: String,
}

/// Ports the driver knows about that can actually be opened right now.
///
/// Ports this registry already holds are kept without probing; opening them
/// again would report them busy.
pub fn list_candidate_ports(registry: &PortRegistry) -> Result<Vec<String>> {
    let driver = registry.driver();
    let names = driver.enumerate().ok_or(Error::UnsupportedPlatform)?;
    let probe = PortSettings::default();

    Ok(names
        .into_iter()
        .filter(|name| {
            if registry.is_open(name) {
                return true;
            }
            match driver.open(name, &probe) {
                Ok(_link) => true,
                Err(err) => {
                    debug!("skipping {}: {}", name, err);
                    false
                }
            }
        })
        .collect())
}

pub fn find_devices(
    registry: &PortRegistry,
    addresses: &[u8],
    settings: PortSettings,
) -> Result<Vec<FoundDevice>> {
    let ports = list_candidate_ports(registry)?;
    find_devices_on(registry, &ports, addresses, settings)
}

/// Tries every address on every port in `ports`. Busy or unopenable ports are
/// skipped; an address that never answers has no device.
pub fn find_devices_on(
    registry: &PortRegistry,
    ports: &[String],
    addresses: &[u8],
    settings: PortSettings,
) -> Result<Vec<FoundDevice>> {
    let mut found = Vec::new();

    'ports: for port_name in ports {
        for &address in addresses {
            match probe(registry, port_name, address, settings) {
                Ok(Some(device)) => {
                    info!(
                        "found pump at {}#{}: config {:?}, firmware {:?}",
                        device.port_name, device.address, device.config, device.firmware
                    );
                    found.push(device);
                }
                Ok(None) => debug!("nothing at {}#{}", port_name, address),
                Err(err @ Error::ResourceBusy { .. }) | Err(err @ Error::Open { .. }) => {
                    warn!("skipping {}: {}", port_name, err);
                    continue 'ports;
                }
                Err(err) => return Err(err),
            }
        }
    }

    Ok(found)
}

fn probe(
    registry: &PortRegistry,
    port_name: &str,
    address: u8,
    settings: PortSettings,
) -> Result<Option<FoundDevice>> {
    let mut session = DeviceSession::open(registry, port_name, address, settings)?;
    let result = identify(&mut session);
    session.close();

    match result {
        Ok((config, firmware)) => Ok(Some(FoundDevice {
            port_name: port_name.to_string(),
            address: Address::new(address)?,
            config,
            firmware,
        })),
        Err(Error::CommunicationTimeout { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

fn identify(session: &mut impl Transport) -> Result<(String, String)> {
    let config = session.send_receive(CONFIG_QUERY)?;
    let firmware = session.send_receive(FIRMWARE_QUERY)?;
    Ok((
        config.data_str().into_owned(),
        firmware.data_str().into_owned(),
    ))
}
