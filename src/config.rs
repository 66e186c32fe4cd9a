// MIT License - Copyright (c) 2026 Peter Wright
// Receiver and account configuration

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::constants::{
    DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_CAPACITY, MAX_FRAME_SIZE,
};
use crate::crypto::AccountCipher;
use crate::error::{Result, SiaError};
use crate::replay::ClockSkew;

/// Which listeners the receiver opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Tcp,
    Udp,
    /// TCP and UDP on the same port.
    Both,
}

impl TransportMode {
    pub fn tcp(&self) -> bool {
        matches!(self, Self::Tcp | Self::Both)
    }

    pub fn udp(&self) -> bool {
        matches!(self, Self::Udp | Self::Both)
    }
}

/// A panel account known to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// 3-16 hex characters, upper-cased.
    pub id: String,
    /// AES key as 16, 24 or 32 hex characters; `None` for cleartext.
    pub key: Option<String>,
    /// Number of zones (areas) configured on the panel.
    pub zones: u32,
    pub clock_skew: ClockSkew,
}

impl Account {
    pub fn builder(id: impl Into<String>) -> AccountBuilder {
        AccountBuilder {
            account: Account {
                id: id.into().to_ascii_uppercase(),
                key: None,
                zones: 1,
                clock_skew: ClockSkew::default(),
            },
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Check the account id and key.
    pub fn validate(&self) -> Result<()> {
        if !(3..=16).contains(&self.id.len()) || !self.id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SiaError::config(format!(
                "account id {:?} must be 3-16 hex characters",
                self.id
            )));
        }
        self.cipher().map(|_| ())
    }

    /// Build the account's cipher, if it has a key.
    pub fn cipher(&self) -> Result<Option<AccountCipher>> {
        self.key
            .as_deref()
            .map(|key| {
                AccountCipher::new(key)
                    .map_err(|e| SiaError::config(format!("account {}: {}", self.id, e)))
            })
            .transpose()
    }
}

/// Builder for Account.
#[derive(Debug, Clone)]
pub struct AccountBuilder {
    account: Account,
}

impl AccountBuilder {
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.account.key = Some(key.into());
        self
    }

    pub fn zones(mut self, zones: u32) -> Self {
        self.account.zones = zones;
        self
    }

    pub fn clock_skew(mut self, skew: ClockSkew) -> Self {
        self.account.clock_skew = skew;
        self
    }

    pub fn build(self) -> Account {
        self.account
    }
}

/// Configuration for a SIA receiver.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Address to listen on (default: 0.0.0.0)
    pub bind_address: IpAddr,
    /// Listen port; 0 picks a free port (default: 7777)
    pub port: u16,
    pub transport: TransportMode,
    pub accounts: Vec<Account>,
    /// Events buffered per account before the oldest is dropped
    pub queue_capacity: usize,
    /// Frames buffered per account worker
    pub worker_capacity: usize,
    /// Longest an ACK waits for subscribers, in milliseconds
    pub ack_timeout_ms: u64,
    /// Time a partial UDP datagram waits for its continuation
    pub udp_reassembly_timeout_ms: u64,
    pub max_frame_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            transport: TransportMode::Tcp,
            accounts: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_capacity: DEFAULT_WORKER_CAPACITY,
            ack_timeout_ms: 5000,
            udp_reassembly_timeout_ms: 2000,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ReceiverConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> ReceiverConfigBuilder {
        ReceiverConfigBuilder::default()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn udp_reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.udp_reassembly_timeout_ms)
    }

    pub fn account(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id.eq_ignore_ascii_case(id))
    }

    /// Validate every account and the limits.
    pub fn validate(&self) -> Result<()> {
        if self.accounts.is_empty() {
            return Err(SiaError::config("at least one account is required"));
        }
        let mut seen = HashSet::new();
        for account in &self.accounts {
            account.validate()?;
            if !seen.insert(account.id.as_str()) {
                return Err(SiaError::config(format!("duplicate account {}", account.id)));
            }
        }
        if self.queue_capacity == 0 || self.worker_capacity == 0 {
            return Err(SiaError::config("queue capacities must be at least 1"));
        }
        if self.max_frame_size == 0 || self.max_frame_size > MAX_FRAME_SIZE {
            return Err(SiaError::config(format!(
                "max_frame_size must be 1-{}",
                MAX_FRAME_SIZE
            )));
        }
        Ok(())
    }
}

/// Builder for ReceiverConfig.
#[derive(Debug, Clone, Default)]
pub struct ReceiverConfigBuilder {
    config: ReceiverConfig,
}

impl ReceiverConfigBuilder {
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.config.bind_address = address;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn transport(mut self, mode: TransportMode) -> Self {
        self.config.transport = mode;
        self
    }

    pub fn account(mut self, account: Account) -> Self {
        self.config.accounts.push(account);
        self
    }

    pub fn accounts(mut self, accounts: impl IntoIterator<Item = Account>) -> Self {
        self.config.accounts.extend(accounts);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn worker_capacity(mut self, capacity: usize) -> Self {
        self.config.worker_capacity = capacity;
        self
    }

    pub fn ack_timeout_ms(mut self, ms: u64) -> Self {
        self.config.ack_timeout_ms = ms;
        self
    }

    pub fn udp_reassembly_timeout_ms(mut self, ms: u64) -> Self {
        self.config.udp_reassembly_timeout_ms = ms;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn build(self) -> ReceiverConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ReceiverConfig::builder()
            .port(0)
            .transport(TransportMode::Both)
            .account(Account::builder("abc123").zones(4).build())
            .ack_timeout_ms(250)
            .build();

        assert_eq!(config.port, 0);
        assert!(config.transport.tcp() && config.transport.udp());
        assert_eq!(config.accounts[0].id, "ABC123");
        assert_eq!(config.accounts[0].zones, 4);
        assert_eq!(config.ack_timeout(), Duration::from_millis(250));
        assert!(config.account("abc123").is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = ReceiverConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.transport, TransportMode::Tcp);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.max_frame_size, MAX_FRAME_SIZE);
    }

    #[test]
    fn test_validation() {
        assert!(ReceiverConfig::default().validate().is_err());

        let duplicate = ReceiverConfig::builder()
            .account(Account::builder("1234").build())
            .account(Account::builder("1234").build())
            .build();
        assert!(duplicate.validate().is_err());

        let bad_id = ReceiverConfig::builder()
            .account(Account::builder("12").build())
            .build();
        assert!(bad_id.validate().is_err());

        let bad_key = ReceiverConfig::builder()
            .account(Account::builder("1234").key("tooshort").build())
            .build();
        assert!(matches!(
            bad_key.validate(),
            Err(SiaError::InvalidConfig { .. })
        ));

        let keyed = Account::builder("1234").key("AAAAAAAAAAAAAAAA").build();
        assert!(keyed.is_encrypted());
        assert_eq!(keyed.cipher().unwrap().unwrap().bits(), 128);
    }
}
