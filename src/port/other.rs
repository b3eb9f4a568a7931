use super::{PortError, Rs485};
use serialport::SerialPort;

pub use serialport::TTYPort as NativePort;

pub fn is_port_open(_port_name: &str) -> bool {
    false
}

pub fn port_names() -> Option<Vec<String>> {
    None
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
