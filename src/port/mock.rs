//! Simulated bus for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use super::{PortDriver, PortError, PortSettings, SerialLink};
use crate::frame::OemCodec;

const READY: u8 = 0x60;

pub(crate) enum Reply {
    Frame(Vec<u8>),
    Silence,
    Fault,
}

struct Device {
    config: String,
    firmware: String,
}

#[derive(Default)]
struct Bus {
    written: Vec<Vec<u8>>,
    replies: VecDeque<Reply>,
    devices: HashMap<u8, Device>,
    pending: VecDeque<u8>,
}

impl Bus {
    /// Scripted replies win; otherwise an addressed device answers the
    /// config and firmware queries.
    fn respond(&mut self, frame: &[u8]) -> Result<(), PortError> {
        match self.replies.pop_front() {
            Some(Reply::Fault) => {
                return Err(io::Error::new(io::ErrorKind::Other, "simulated fault").into())
            }
            Some(Reply::Frame(bytes)) => self.pending.extend(bytes),
            Some(Reply::Silence) => {}
            None => {
                if let Ok(request) = OemCodec.decode_request(frame) {
                    if let Some(device) = self.devices.get(&request.address.value()) {
                        let data = match request.command.as_str() {
                            "?76" => device.config.as_bytes(),
                            "&" => device.firmware.as_bytes(),
                            _ => &[][..],
                        };
                        let reply = OemCodec.encode_status(READY, data);
                        self.pending.extend(reply);
                    }
                }
            }
        }
        self.written.push(frame.to_vec());
        Ok(())
    }
}

#[derive(Default)]
struct DriverState {
    ports: Vec<String>,
    busy: HashSet<String>,
    buses: HashMap<String, Arc<Mutex<Bus>>>,
    unsupported: bool,
    opened: usize,
    closed: usize,
}

#[derive(Clone, Default)]
pub(crate) struct MockDriver {
    state: Arc<Mutex<DriverState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(self, port_name: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.ports.push(port_name.to_string());
            state.buses.insert(port_name.to_string(), Arc::default());
        }
        self
    }

    pub fn with_busy_port(self, port_name: &str) -> Self {
        let driver = self.with_port(port_name);
        driver.set_busy(port_name);
        driver
    }

    /// Later opens of `port_name` fail as busy; links already open keep
    /// working.
    pub fn set_busy(&self, port_name: &str) {
        self.state
            .lock()
            .unwrap()
            .busy
            .insert(port_name.to_string());
    }

    pub fn unsupported(self) -> Self {
        self.state.lock().unwrap().unsupported = true;
        self
    }

    fn bus(&self, port_name: &str) -> Arc<Mutex<Bus>> {
        self.state.lock().unwrap().buses[port_name].clone()
    }

    pub fn add_device(&self, port_name: &str, address: u8, config: &str, firmware: &str) {
        self.bus(port_name).lock().unwrap().devices.insert(
            address,
            Device {
                config: config.to_string(),
                firmware: firmware.to_string(),
            },
        );
    }

    pub fn push_reply(&self, port_name: &str, reply: Reply) {
        self.bus(port_name).lock().unwrap().replies.push_back(reply);
    }

    pub fn written(&self, port_name: &str) -> Vec<Vec<u8>> {
        self.bus(port_name).lock().unwrap().written.clone()
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

impl PortDriver for MockDriver {
    fn open(
        &self,
        port_name: &str,
        _settings: &PortSettings,
    ) -> Result<Box<dyn SerialLink>, PortError> {
        let mut state = self.state.lock().unwrap();
        if state.busy.contains(port_name) {
            return Err(PortError::Busy {
                port_name: port_name.to_string(),
            });
        }
        let bus = state
            .buses
            .get(port_name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such port"))?;
        state.opened += 1;

        Ok(Box::new(MockLink {
            bus,
            driver: self.state.clone(),
        }))
    }

    fn enumerate(&self) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        (!state.unsupported).then(|| state.ports.clone())
    }
}

struct MockLink {
    bus: Arc<Mutex<Bus>>,
    driver: Arc<Mutex<DriverState>>,
}

impl SerialLink for MockLink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        self.bus.lock().unwrap().respond(bytes)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        let mut bus = self.bus.lock().unwrap();
        let n = buf.len().min(bus.pending.len());
        for (dst, src) in buf.iter_mut().zip(bus.pending.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.driver.lock().unwrap().closed += 1;
    }
}
