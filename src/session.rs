use log::{debug, warn};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::frame::{Address, Frame, FrameCodec, FrameKind, OemCodec, Response, Sequence};
use crate::port::{PortError, PortSettings};
use crate::registry::{PortRegistry, RegistryHandle, SessionId};
use crate::retry::{Attempt, Failure, RetryMachine, RetryPolicy};

/// What an instrument model needs from its link: send one command, get the
/// decoded reply.
pub trait Transport {
    fn send_receive(&mut self, command: &str) -> Result<Response>;
}

/// One addressed device on a (possibly shared) serial port.
pub struct DeviceSession {
    address: Address,
    handle: RegistryHandle,
    codec: Arc<dyn FrameCodec>,
    policy: RetryPolicy,
    sequence: Sequence,
    last_frame: Option<Frame>,
}

impl DeviceSession {
    pub fn open(
        registry: &PortRegistry,
        port_name: &str,
        address: u8,
        settings: PortSettings,
    ) -> Result<Self> {
        Self::with_codec(registry, port_name, address, settings, Arc::new(OemCodec))
    }

    pub fn with_codec(
        registry: &PortRegistry,
        port_name: &str,
        address: u8,
        settings: PortSettings,
        codec: Arc<dyn FrameCodec>,
    ) -> Result<Self> {
        let address = Address::new(address)?;
        let handle = registry.attach(port_name, settings, SessionId::next())?;
        debug!("{} bound to {}#{}", handle.session(), port_name, address);

        Ok(Self {
            address,
            handle,
            codec,
            policy: RetryPolicy::from(&settings),
            sequence: Sequence::FIRST,
            last_frame: None,
        })
    }

    /// Overrides the backoff delays; the attempt budget stays the port's.
    pub fn with_delays(mut self, base_delay: Duration, fault_delay: Duration) -> Self {
        self.policy = self.policy.with_delays(base_delay, fault_delay);
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn port_name(&self) -> &str {
        self.handle.port_name()
    }

    pub fn settings(&self) -> PortSettings {
        self.handle.settings()
    }

    /// Detaches from the port; the last session on a port closes it.
    pub fn close(self) {
        debug!("{} closing", self);
        self.handle.detach();
    }

    fn frame_for(&mut self, attempt: Attempt, command: &str) -> Result<Frame> {
        if let (FrameKind::Repeat, Some(last)) = (attempt.kind, &self.last_frame) {
            return Ok(self.codec.encode_repeat(last));
        }

        let sequence = self.sequence;
        let frame = self.codec.encode_command(self.address, sequence, command)?;
        self.sequence = sequence.next();
        self.last_frame = Some(frame.clone());
        Ok(frame)
    }

    fn exchange(&self, frame: &Frame) -> Result<Vec<u8>, PortError> {
        let mut port = self.handle.lock();
        port.write(frame.as_bytes())?;
        port.read_until_idle()
    }
}

impl Transport for DeviceSession {
    fn send_receive(&mut self, command: &str) -> Result<Response> {
        let started = Instant::now();
        let mut retry = RetryMachine::new(self.policy);

        while let Some(attempt) = retry.next_attempt() {
            let frame = self.frame_for(attempt, command)?;

            let failure = match self.exchange(&frame) {
                Ok(raw) => match self.codec.decode_response(&raw) {
                    Ok(response) => {
                        retry.succeed();
                        debug!(
                            "{} {:?} -> status {:#04x} {:?}",
                            self,
                            command,
                            response.status,
                            response.data_str()
                        );
                        return Ok(response);
                    }
                    Err(err) => {
                        debug!("{} attempt {}: {}", self, attempt.number, err);
                        Failure::NoResponse
                    }
                },
                Err(err) => {
                    warn!("{} attempt {}: {}", self, attempt.number, err);
                    Failure::Fault
                }
            };

            if retry.has_remaining() {
                thread::sleep(retry.delay_after(failure));
            }
        }

        Err(Error::CommunicationTimeout {
            attempts: self.policy.max_attempts,
            elapsed: started.elapsed(),
        })
    }
}

impl fmt::Display for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.handle.port_name(), self.address)
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("address", &self.address)
            .field("handle", &self.handle)
            .field("policy", &self.policy)
            .field("sequence", &self.sequence)
            .finish()
    }
}
