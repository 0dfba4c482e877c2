//! Negotiation engine configuration
//!
//! Provides [`EngineConfig`] and its builder. Every knob has a default that
//! matches common IKEv1 deployments, so `EngineConfig::default()` is usable
//! as is.

use super::ikev1::constants::DOI_DEFAULT_LIFETIME_SECS;
use super::ikev1::payload::DecodeLimits;
use super::{Error, Result};
use std::time::Duration;

/// Quick Mode / Informational engine configuration
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Maximum proposal payloads sent or decoded in one SA payload
    pub max_proposals: usize,

    /// Maximum transforms decoded per proposal payload
    pub max_transforms: usize,

    /// Nonce length in bytes
    pub nonce_len: usize,

    /// Whole-exchange timeout, after which a Phase 2 handle is discarded
    pub phase2_timeout: Duration,

    /// Initial retransmission interval, doubled on each resend
    pub resend_interval: Duration,

    /// Maximum number of resends of one message
    pub resend_count: u32,

    /// How long one datagram may wait for socket buffer space
    pub send_timeout: Duration,

    /// Offset between the hard and soft lifetime of installed SAs
    pub soft_lifetime_offset: Duration,

    /// Lifetime applied when a transform carries none (seconds)
    pub default_lifetime: u32,

    /// Maximum SPIs decoded in one Delete payload
    pub max_delete_spis: usize,

    /// Set the commit bit on exchanges we initiate
    pub commit_bit: bool,

    /// Leave AUTH_ALGO out of proposals using ESP without authentication
    pub allow_null_auth_omission: bool,

    /// Send INITIAL-CONTACT on the first exchange with a peer
    pub initial_contact: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_proposals: 4,
            max_transforms: 5,
            nonce_len: 20,
            phase2_timeout: Duration::from_secs(45),
            resend_interval: Duration::from_secs(2),
            resend_count: 5,
            send_timeout: Duration::from_secs(1),
            soft_lifetime_offset: Duration::from_secs(10),
            default_lifetime: DOI_DEFAULT_LIFETIME_SECS,
            max_delete_spis: 2,
            commit_bit: false,
            allow_null_auth_omission: true,
            initial_contact: true,
        }
    }
}

impl EngineConfig {
    /// Create builder for engine configuration
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(1..=50).contains(&self.max_proposals) {
            return Err(Error::InvalidParameter(
                "max_proposals must be between 1 and 50".into(),
            ));
        }
        if self.max_transforms == 0 {
            return Err(Error::InvalidParameter(
                "max_transforms cannot be zero".into(),
            ));
        }
        if !(4..=252).contains(&self.nonce_len) {
            return Err(Error::InvalidParameter(
                "nonce_len must be between 4 and 252 bytes".into(),
            ));
        }
        if !(1..=10).contains(&self.resend_count) {
            return Err(Error::InvalidParameter(
                "resend_count must be between 1 and 10".into(),
            ));
        }
        if self.resend_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "resend_interval cannot be zero".into(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(Error::InvalidParameter("send_timeout cannot be zero".into()));
        }
        if self.phase2_timeout <= self.resend_interval {
            return Err(Error::InvalidParameter(
                "phase2_timeout must exceed resend_interval".into(),
            ));
        }
        if self.default_lifetime == 0 {
            return Err(Error::InvalidParameter(
                "default_lifetime cannot be zero".into(),
            ));
        }
        if self.max_delete_spis == 0 {
            return Err(Error::InvalidParameter(
                "max_delete_spis cannot be zero".into(),
            ));
        }
        Ok(())
    }

    /// Decode bounds derived from this configuration
    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_proposals: self.max_proposals,
            max_transforms: self.max_transforms,
            max_delete_spis: self.max_delete_spis,
        }
    }

    /// Delay before the `attempt`-th resend (zero-based)
    pub fn resend_delay(&self, attempt: u32) -> Duration {
        self.resend_interval
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }
}

/// Builder for EngineConfig
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum proposal payloads
    pub fn with_max_proposals(mut self, max: usize) -> Self {
        self.config.max_proposals = max;
        self
    }

    /// Set maximum transforms per proposal
    pub fn with_max_transforms(mut self, max: usize) -> Self {
        self.config.max_transforms = max;
        self
    }

    /// Set nonce length
    pub fn with_nonce_len(mut self, len: usize) -> Self {
        self.config.nonce_len = len;
        self
    }

    /// Set whole-exchange timeout
    pub fn with_phase2_timeout(mut self, timeout: Duration) -> Self {
        self.config.phase2_timeout = timeout;
        self
    }

    /// Set retransmission interval and count
    pub fn with_resend(mut self, interval: Duration, count: u32) -> Self {
        self.config.resend_interval = interval;
        self.config.resend_count = count;
        self
    }

    /// Set the bound on waiting for socket buffer space
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = timeout;
        self
    }

    /// Set soft lifetime offset
    pub fn with_soft_lifetime_offset(mut self, offset: Duration) -> Self {
        self.config.soft_lifetime_offset = offset;
        self
    }

    /// Set default SA lifetime in seconds
    pub fn with_default_lifetime(mut self, secs: u32) -> Self {
        self.config.default_lifetime = secs;
        self
    }

    /// Set maximum SPIs per Delete payload
    pub fn with_max_delete_spis(mut self, max: usize) -> Self {
        self.config.max_delete_spis = max;
        self
    }

    /// Request the commit bit on initiated exchanges
    pub fn with_commit_bit(mut self, commit: bool) -> Self {
        self.config.commit_bit = commit;
        self
    }

    /// Allow AUTH_ALGO omission for ESP without authentication
    pub fn with_null_auth_omission(mut self, allow: bool) -> Self {
        self.config.allow_null_auth_omission = allow;
        self
    }

    /// Enable or disable INITIAL-CONTACT
    pub fn with_initial_contact(mut self, enabled: bool) -> Self {
        self.config.initial_contact = enabled;
        self
    }

    /// Build EngineConfig with validation
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.nonce_len, 20);
        assert_eq!(config.phase2_timeout, Duration::from_secs(45));
        assert_eq!(config.default_lifetime, 28800);
        assert_eq!(config.send_timeout, Duration::from_secs(1));
        assert!(!config.commit_bit);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .with_max_proposals(8)
            .with_commit_bit(true)
            .with_resend(Duration::from_millis(500), 3)
            .build()
            .unwrap();
        assert_eq!(config.max_proposals, 8);
        assert!(config.commit_bit);
        assert_eq!(config.resend_count, 3);
        assert_eq!(config.decode_limits().max_proposals, 8);
    }

    #[test]
    fn test_builder_validation() {
        assert!(EngineConfig::builder().with_max_proposals(0).build().is_err());
        assert!(EngineConfig::builder().with_max_proposals(51).build().is_err());
        assert!(EngineConfig::builder().with_nonce_len(2).build().is_err());
        assert!(EngineConfig::builder().with_nonce_len(253).build().is_err());
        assert!(EngineConfig::builder()
            .with_resend(Duration::from_secs(2), 0)
            .build()
            .is_err());
        assert!(EngineConfig::builder()
            .with_phase2_timeout(Duration::from_secs(1))
            .build()
            .is_err());
        assert!(EngineConfig::builder()
            .with_send_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn test_resend_backoff() {
        let config = EngineConfig::default();
        assert_eq!(config.resend_delay(0), Duration::from_secs(2));
        assert_eq!(config.resend_delay(1), Duration::from_secs(4));
        assert_eq!(config.resend_delay(3), Duration::from_secs(16));
    }
}
