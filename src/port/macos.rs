use super::{PortError, Rs485};
use glob::glob;
use serialport::SerialPort;

pub use serialport::TTYPort as NativePort;

// TODO: check open descriptors via lsof/libproc like the linux /proc scan
pub fn is_port_open(_port_name: &str) -> bool {
    false
}

pub fn port_names() -> Option<Vec<String>> {
    let paths = glob("/dev/tty.*").ok()?;
    Some(
        paths
            .filter_map(|p| p.ok())
            .filter_map(|path| path.to_str().map(str::to_string))
            .collect(),
    )
}

impl Rs485 for NativePort {
    fn rs485_is_enabled(&self) -> Result<bool, PortError> {
        Err(PortError::Rs485Error {
            port_name: self.name().unwrap_or_default(),
        })
    }

    fn rs485_enable(&self, _enable: bool) -> Result<(), PortError> {
        Err(PortError::Rs485Error {
            port_name: self.name().unwrap_or_default(),
        })
    }
}
