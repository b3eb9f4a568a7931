#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(test)]
pub(crate) mod mock;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod other;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux::{is_port_open, port_names, NativePort};
#[cfg(target_os = "macos")]
use macos::{is_port_open, port_names, NativePort};
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
use other::{is_port_open, port_names, NativePort};
#[cfg(target_os = "windows")]
use windows::{is_port_open, port_names, NativePort};

use core::time::Duration;
use log::{debug, warn};
use serialport::{self, SerialPort};
use std::fmt::{self, Display};
use std::io::{self, Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortError {
    #[error("{port_name:?} busy")]
    Busy { port_name: String },
    #[error("rs485 configuration failed on {port_name:?}")]
    Rs485Error { port_name: String },
    #[error("port already closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serial(#[from] serialport::Error),
}

/// Open parameters shared by every session attached to one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl PortSettings {
    pub fn new(baud_rate: u32, timeout: Duration, max_attempts: u32) -> Self {
        Self {
            baud_rate,
            timeout,
            max_attempts,
        }
    }

    /// Shorter retry budget used while scanning for devices.
    pub fn discovery() -> Self {
        Self::new(9600, Duration::from_millis(200), 2)
    }
}

impl Default for PortSettings {
    fn default() -> Self {
        Self::new(9600, Duration::from_millis(100), 5)
    }
}

impl Display for PortSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} baud, {:?} timeout, {} attempts",
            self.baud_rate, self.timeout, self.max_attempts
        )
    }
}

/// An open byte stream. Dropping the link closes it.
pub trait SerialLink: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), PortError>;

    /// Returns 0 when the read timeout elapses with nothing received.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, PortError>;
}

pub trait PortDriver: Send + Sync {
    fn open(&self, port_name: &str, settings: &PortSettings)
        -> Result<Box<dyn SerialLink>, PortError>;

    /// Candidate port names, or `None` if this host has no known way to
    /// list them.
    fn enumerate(&self) -> Option<Vec<String>>;
}

trait Rs485 {
    fn rs485_is_enabled(&self) -> Result<bool, PortError>;
    fn rs485_enable(&self, enable: bool) -> Result<(), PortError>;

    fn rs485_is_supported(&self) -> bool {
        match self.rs485_is_enabled() {
            Ok(enabled) => self.rs485_enable(enabled).is_ok(),
            Err(_) => false,
        }
    }
}

/// Driver for real serial devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDriver {
    /// Skip the "held by another process" and RS-485 sanity checks.
    pub force: bool,
    /// Switch the UART into kernel RS-485 mode (RTS driven on send). Plain
    /// RS-232 links leave this off.
    pub rs485: bool,
}

fn enable_rs485(port: &impl Rs485, port_name: &str, force: bool) -> Result<(), PortError> {
    if port.rs485_is_supported() && port.rs485_enable(true).is_ok() {
        debug!("rs485 enabled on {}", port_name);
        return Ok(());
    }
    if force {
        warn!("rs485 not available on {}, continuing", port_name);
        return Ok(());
    }
    Err(PortError::Rs485Error {
        port_name: port_name.to_string(),
    })
}

impl PortDriver for NativeDriver {
    fn open(
        &self,
        port_name: &str,
        settings: &PortSettings,
    ) -> Result<Box<dyn SerialLink>, PortError> {
        if !self.force && is_port_open(port_name) {
            return Err(PortError::Busy {
                port_name: port_name.to_string(),
            });
        }

        let port = serialport::new(port_name, settings.baud_rate)
            .timeout(settings.timeout)
            .open_native()
            .map_err(|err| match err.kind() {
                serialport::ErrorKind::Io(io::ErrorKind::ResourceBusy) => PortError::Busy {
                    port_name: port_name.to_string(),
                },
                _ => err.into(),
            })?;

        if self.rs485 {
            enable_rs485(&port, port_name, self.force)?;
        }

        debug!("open_port OK: {} @ {} baud", port_name, settings.baud_rate);
        Ok(Box::new(NativeLink { port }))
    }

    fn enumerate(&self) -> Option<Vec<String>> {
        port_names()
    }
}

struct NativeLink {
    port: NativePort,
}

impl SerialLink for NativeLink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for NativeLink {
    fn drop(&mut self) {
        debug!("close_port: {}", self.port.name().unwrap_or_default());
    }
}
