//! Engine configuration

use crate::cidr::MAX_CHILD_PREFIX_LEN;
use crate::lock::LockWaitPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable overriding [`IpamConfig::gateway_reservation`]
pub const GATEWAY_RESERVATION_ENV: &str = "IPAM_GATEWAY_RESERVATION";

/// Configuration for [`crate::IpamManager`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpamConfig {
    /// Addresses skipped after the network address; the gateway is the next one
    pub gateway_reservation: u32,
    /// Longest child prefix callers may request
    pub max_child_prefix_len: u8,
    /// How long to wait for a block's lock
    pub lock_wait: LockWaitPolicy,
}

impl Default for IpamConfig {
    fn default() -> Self {
        Self {
            gateway_reservation: 1,
            max_child_prefix_len: MAX_CHILD_PREFIX_LEN,
            lock_wait: LockWaitPolicy::default(),
        }
    }
}

impl IpamConfig {
    /// Set the gateway reservation
    pub fn with_gateway_reservation(mut self, reserved: u32) -> Self {
        self.gateway_reservation = reserved;
        self
    }

    /// Set the lock wait policy
    pub fn with_lock_wait(mut self, policy: LockWaitPolicy) -> Self {
        self.lock_wait = policy;
        self
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file, apply environment overrides, then validate
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut config: Self = serde_yaml::from_str(&content)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;

        tracing::info!(
            path = %path.display(),
            gateway_reservation = config.gateway_reservation,
            max_child_prefix_len = config.max_child_prefix_len,
            "Loaded IPAM configuration"
        );
        Ok(config)
    }

    /// Apply overrides found through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(GATEWAY_RESERVATION_ENV) {
            self.gateway_reservation = value.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{} must be a non-negative integer, got {:?}",
                    GATEWAY_RESERVATION_ENV, value
                ))
            })?;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_child_prefix_len == 0 || self.max_child_prefix_len > MAX_CHILD_PREFIX_LEN {
            return Err(Error::Config(format!(
                "max_child_prefix_len must be in 1..={}, got {}",
                MAX_CHILD_PREFIX_LEN, self.max_child_prefix_len
            )));
        }

        // The longest child must still fit the reservation plus one host
        let smallest = crate::cidr::address_count(self.max_child_prefix_len);
        if u64::from(self.gateway_reservation) + 1 > smallest {
            return Err(Error::Config(format!(
                "gateway_reservation {} leaves no host in a /{}",
                self.gateway_reservation, self.max_child_prefix_len
            )));
        }

        if let LockWaitPolicy::Retry { attempts: 0, .. } = self.lock_wait {
            return Err(Error::Config("lock_wait.attempts must be greater than 0".into()));
        }

        Ok(())
    }
}
