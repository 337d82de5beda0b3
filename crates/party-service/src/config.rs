//! Party service configuration.
//!
//! Configuration is loaded from environment variables. `PartyOptions` is the
//! per-party subset handed to every `PartyActor`.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8082";

/// Default registry capacity.
pub const DEFAULT_MAX_PARTIES: usize = 10_000;

/// Member cap used when a party has no `platform.maxMembers` server setting.
pub const DEFAULT_MAX_MEMBERS: usize = 8;

/// Default `clientAckTimeoutSeconds`.
pub const DEFAULT_CLIENT_ACK_TIMEOUT_SECONDS: u64 = 5;

/// Default lifetime of an unclaimed reservation.
pub const DEFAULT_RESERVATION_TTL_SECONDS: u64 = 60;

/// Default instance ID prefix.
pub const DEFAULT_SERVICE_ID_PREFIX: &str = "party";

/// What resets members' ready status to `NotReady`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTrigger {
    SettingsUpdated,
    MemberDataUpdated,
    MemberListChanged,
}

impl ResetTrigger {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResetTrigger::SettingsUpdated => "settings_updated",
            ResetTrigger::MemberDataUpdated => "member_data_updated",
            ResetTrigger::MemberListChanged => "member_list_changed",
        }
    }
}

/// Individually toggleable ready-reset triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyResetPolicy {
    pub on_settings_updated: bool,
    pub on_member_data_updated: bool,
    pub on_member_list_changed: bool,
}

impl ReadyResetPolicy {
    /// Policy with every trigger disabled.
    #[must_use]
    pub const fn never() -> Self {
        Self {
            on_settings_updated: false,
            on_member_data_updated: false,
            on_member_list_changed: false,
        }
    }

    #[must_use]
    pub const fn resets_on(&self, trigger: ResetTrigger) -> bool {
        match trigger {
            ResetTrigger::SettingsUpdated => self.on_settings_updated,
            ResetTrigger::MemberDataUpdated => self.on_member_data_updated,
            ResetTrigger::MemberListChanged => self.on_member_list_changed,
        }
    }
}

impl Default for ReadyResetPolicy {
    fn default() -> Self {
        Self {
            on_settings_updated: true,
            on_member_data_updated: false,
            on_member_list_changed: true,
        }
    }
}

/// Client acknowledgment / back-pressure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPolicy {
    /// When true, the party freezes after each broadcast until every
    /// connected member acknowledged it or `timeout` elapsed.
    pub require_ack: bool,
    pub timeout: Duration,
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self {
            require_ack: false,
            timeout: Duration::from_secs(DEFAULT_CLIENT_ACK_TIMEOUT_SECONDS),
        }
    }
}

/// Per-party options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartyOptions {
    pub ack: AckPolicy,
    pub ready_reset: ReadyResetPolicy,
    pub default_max_members: usize,
    pub reservation_ttl: Duration,
}

impl Default for PartyOptions {
    fn default() -> Self {
        Self {
            ack: AckPolicy::default(),
            ready_reset: ReadyResetPolicy::default(),
            default_max_members: DEFAULT_MAX_MEMBERS,
            reservation_ttl: Duration::from_secs(DEFAULT_RESERVATION_TTL_SECONDS),
        }
    }
}

/// Party service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Health + metrics endpoint bind address (default: "0.0.0.0:8082").
    pub health_bind_address: String,

    /// Unique identifier for this service instance.
    pub service_id: String,

    /// Maximum concurrent parties this instance hosts.
    pub max_parties: usize,

    /// Options applied to every party.
    pub party: PartyOptions,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let health_bind_address = vars
            .get("PARTY_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_parties = vars
            .get("PARTY_MAX_PARTIES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_PARTIES);

        let default_max_members = vars
            .get("PARTY_DEFAULT_MAX_MEMBERS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_MEMBERS);
        if default_max_members == 0 {
            return Err(ConfigError::InvalidValue(
                "PARTY_DEFAULT_MAX_MEMBERS must be at least 1".to_string(),
            ));
        }

        let require_ack = parse_bool(vars, "PARTY_REQUIRE_CLIENT_ACK", false)?;

        let ack_timeout_seconds = vars
            .get("PARTY_CLIENT_ACK_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CLIENT_ACK_TIMEOUT_SECONDS);
        if ack_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "PARTY_CLIENT_ACK_TIMEOUT_SECONDS must be positive".to_string(),
            ));
        }

        let defaults = ReadyResetPolicy::default();
        let ready_reset = ReadyResetPolicy {
            on_settings_updated: parse_bool(
                vars,
                "PARTY_RESET_READY_ON_SETTINGS_UPDATED",
                defaults.on_settings_updated,
            )?,
            on_member_data_updated: parse_bool(
                vars,
                "PARTY_RESET_READY_ON_MEMBER_DATA_UPDATED",
                defaults.on_member_data_updated,
            )?,
            on_member_list_changed: parse_bool(
                vars,
                "PARTY_RESET_READY_ON_MEMBER_LIST_CHANGED",
                defaults.on_member_list_changed,
            )?,
        };

        let reservation_ttl_seconds = vars
            .get("PARTY_RESERVATION_TTL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RESERVATION_TTL_SECONDS);

        let service_id = vars.get("PARTY_SERVICE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SERVICE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            health_bind_address,
            service_id,
            max_parties,
            party: PartyOptions {
                ack: AckPolicy {
                    require_ack,
                    timeout: Duration::from_secs(ack_timeout_seconds),
                },
                ready_reset,
                default_max_members,
                reservation_ttl: Duration::from_secs(reservation_ttl_seconds),
            },
        })
    }
}

/// Parse a boolean flag (`true`/`false`/`1`/`0`), falling back to `default` when unset.
fn parse_bool(
    vars: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) if v == "false" || v == "0" => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(format!(
            "{key} must be a boolean, got '{v}'"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.max_parties, DEFAULT_MAX_PARTIES);
        assert_eq!(config.party.default_max_members, DEFAULT_MAX_MEMBERS);
        assert!(!config.party.ack.require_ack);
        assert_eq!(
            config.party.ack.timeout,
            Duration::from_secs(DEFAULT_CLIENT_ACK_TIMEOUT_SECONDS)
        );
        assert_eq!(config.party.ready_reset, ReadyResetPolicy::default());
        assert!(config.service_id.starts_with("party-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            (
                "PARTY_HEALTH_BIND_ADDRESS".to_string(),
                "127.0.0.1:9000".to_string(),
            ),
            ("PARTY_SERVICE_ID".to_string(), "party-eu-1".to_string()),
            ("PARTY_MAX_PARTIES".to_string(), "50".to_string()),
            ("PARTY_DEFAULT_MAX_MEMBERS".to_string(), "4".to_string()),
            ("PARTY_REQUIRE_CLIENT_ACK".to_string(), "true".to_string()),
            (
                "PARTY_CLIENT_ACK_TIMEOUT_SECONDS".to_string(),
                "2".to_string(),
            ),
            (
                "PARTY_RESET_READY_ON_MEMBER_DATA_UPDATED".to_string(),
                "1".to_string(),
            ),
            (
                "PARTY_RESET_READY_ON_SETTINGS_UPDATED".to_string(),
                "false".to_string(),
            ),
            ("PARTY_RESERVATION_TTL_SECONDS".to_string(), "15".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.health_bind_address, "127.0.0.1:9000");
        assert_eq!(config.service_id, "party-eu-1");
        assert_eq!(config.max_parties, 50);
        assert_eq!(config.party.default_max_members, 4);
        assert!(config.party.ack.require_ack);
        assert_eq!(config.party.ack.timeout, Duration::from_secs(2));
        assert!(config.party.ready_reset.on_member_data_updated);
        assert!(!config.party.ready_reset.on_settings_updated);
        assert!(config.party.ready_reset.on_member_list_changed);
        assert_eq!(config.party.reservation_ttl, Duration::from_secs(15));
    }

    #[test]
    fn test_zero_ack_timeout_rejected() {
        let vars = HashMap::from([(
            "PARTY_CLIENT_ACK_TIMEOUT_SECONDS".to_string(),
            "0".to_string(),
        )]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_invalid_boolean_rejected() {
        let vars = HashMap::from([("PARTY_REQUIRE_CLIENT_ACK".to_string(), "maybe".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("PARTY_REQUIRE_CLIENT_ACK"))
        );
    }

    #[test]
    fn test_reset_policy_triggers() {
        let policy = ReadyResetPolicy::default();
        assert!(policy.resets_on(ResetTrigger::SettingsUpdated));
        assert!(!policy.resets_on(ResetTrigger::MemberDataUpdated));
        assert!(policy.resets_on(ResetTrigger::MemberListChanged));

        let never = ReadyResetPolicy::never();
        assert!(!never.resets_on(ResetTrigger::SettingsUpdated));
    }
}
