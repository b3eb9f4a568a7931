//! Attempt bookkeeping for one command exchange.

use std::time::Duration;

use crate::frame::FrameKind;
use crate::port::PortSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Multiplied by the attempt number after an empty or garbled reply.
    pub base_delay: Duration,
    /// Fixed wait after the port itself failed.
    pub fault_delay: Duration,
}

impl RetryPolicy {
    pub const BASE_DELAY: Duration = Duration::from_millis(50);
    pub const FAULT_DELAY: Duration = Duration::from_millis(200);

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Self::BASE_DELAY,
            fault_delay: Self::FAULT_DELAY,
        }
    }

    pub fn with_delays(self, base_delay: Duration, fault_delay: Duration) -> Self {
        Self {
            base_delay,
            fault_delay,
            ..self
        }
    }
}

impl From<&PortSettings> for RetryPolicy {
    fn from(settings: &PortSettings) -> Self {
        Self::new(settings.max_attempts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempting(u32),
    Success,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub number: u32,
    pub kind: FrameKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Nothing decodable came back.
    NoResponse,
    /// Writing or reading the port failed.
    Fault,
}

/// `Idle -> Attempting(1..=max) -> Success | Exhausted`
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
    attempts: u32,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_attempt(&mut self) -> Option<Attempt> {
        let number = match self.state {
            RetryState::Idle => 1,
            RetryState::Attempting(n) => n + 1,
            RetryState::Success | RetryState::Exhausted => return None,
        };

        if number > self.policy.max_attempts {
            self.state = RetryState::Exhausted;
            return None;
        }

        self.state = RetryState::Attempting(number);
        self.attempts = number;
        Some(Attempt {
            number,
            kind: if number == 1 {
                FrameKind::Command
            } else {
                FrameKind::Repeat
            },
        })
    }

    pub fn succeed(&mut self) {
        if let RetryState::Attempting(_) = self.state {
            self.state = RetryState::Success;
        }
    }

    pub fn has_remaining(&self) -> bool {
        match self.state {
            RetryState::Idle => self.policy.max_attempts > 0,
            RetryState::Attempting(n) => n < self.policy.max_attempts,
            RetryState::Success | RetryState::Exhausted => false,
        }
    }

    /// Wait before the next attempt after the current one failed.
    pub fn delay_after(&self, failure: Failure) -> Duration {
        match failure {
            Failure::NoResponse => self.policy.base_delay * self.attempts,
            Failure::Fault => self.policy.fault_delay,
        }
    }
}
