use clap::{Parser, Subcommand};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp;
use std::ops::Deref;
use std::str::FromStr;
use thiserror::Error;

use cavro_link::frame::MAX_ADDRESS;

#[derive(Error, Debug, PartialEq)]
pub enum RangeError {
    #[error("invalid range '{0}'")]
    BadRange(String),
    #[error("address {0} out of range 0..=14")]
    OutOfRange(u8),
}

/// Sorted, deduplicated bus addresses, written as `0,2-4`.
#[derive(Debug, PartialEq)]
pub struct AddressList(Vec<u8>);

impl Deref for AddressList {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for AddressList {
    type Err = RangeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^(\d+)(?:-(\d+))?$").unwrap();
        }

        let mut result: Vec<u8> = Vec::new();

        for s in input.split(',') {
            let bad = || RangeError::BadRange(s.to_string());
            let c = RE.captures(s.trim()).ok_or_else(bad)?;
            let first: u8 = c[1].parse().map_err(|_| bad())?;

            match c.get(2) {
                None => result.push(first),
                Some(m) => {
                    let last: u8 = m.as_str().parse().map_err(|_| bad())?;
                    result.extend(cmp::min(first, last)..=cmp::max(first, last));
                }
            }
        }

        if let Some(&address) = result.iter().find(|&&a| a > MAX_ADDRESS) {
            return Err(RangeError::OutOfRange(address));
        }

        Ok(AddressList(result.into_iter().sorted().dedup().collect()))
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Skip port sanity checks
    #[clap(long, short)]
    pub force: bool,

    /// Put the port into kernel RS-485 mode
    #[clap(long)]
    pub rs485: bool,

    /// enable debug output
    #[clap(long, short)]
    pub debug: bool,

    /// Serial device or 'auto'
    #[clap(long, short, default_value = "auto")]
    pub port: String,

    /// Serial baud rate
    #[clap(long, short, default_value_t = 9600)]
    pub baudrate: u32,

    /// Read timeout in milliseconds
    #[clap(long, short)]
    pub timeout_ms: Option<u64>,

    /// Attempts per command before giving up
    #[clap(long, short)]
    pub attempts: Option<u32>,

    /// Use json-formatted output
    #[clap(long, short)]
    pub json: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List serial ports that can be opened
    ListPorts,

    /// Scan ports for pumps
    Find {
        #[clap(default_value = "0")]
        addresses: AddressList,
    },

    /// Send one command and print the reply
    Send { address: u8, command: String },
}
