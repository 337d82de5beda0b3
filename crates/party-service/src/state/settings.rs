//! `PartyConfiguration` - the typed settings envelope of a party.
//!
//! `custom_data` is opaque game data: coordination logic never looks inside it.

use common::{PartyId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server setting key holding the member cap.
pub const MAX_MEMBERS_SETTING: &str = "platform.maxMembers";

/// Authoritative party settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyConfiguration {
    pub party_id: PartyId,
    pub party_leader_id: UserId,
    pub is_public: bool,
    pub only_leader_can_invite: bool,
    pub is_joinable: bool,
    pub game_finder_name: String,
    /// Opaque game-defined payload.
    pub custom_data: String,
    /// Client-writable (through a settings update) server settings.
    pub server_settings: BTreeMap<String, String>,
    /// Server-writable only; broadcast to clients.
    pub public_server_data: BTreeMap<String, String>,
}

impl PartyConfiguration {
    /// Settings for a freshly created party led by `leader`.
    #[must_use]
    pub fn new(party_id: PartyId, leader: UserId, request: PartySettingsUpdate) -> Self {
        Self {
            party_id,
            party_leader_id: leader,
            is_public: request.is_public,
            only_leader_can_invite: request.only_leader_can_invite,
            is_joinable: request.is_joinable,
            game_finder_name: request.game_finder_name,
            custom_data: request.custom_data,
            server_settings: request.server_settings,
            public_server_data: BTreeMap::new(),
        }
    }

    /// Replace every client-writable field. Leader, party id and public
    /// server data are left untouched.
    pub fn apply(&mut self, update: PartySettingsUpdate) {
        self.is_public = update.is_public;
        self.only_leader_can_invite = update.only_leader_can_invite;
        self.is_joinable = update.is_joinable;
        self.game_finder_name = update.game_finder_name;
        self.custom_data = update.custom_data;
        self.server_settings = update.server_settings;
    }

    /// Member cap from `platform.maxMembers`, if set and valid.
    #[must_use]
    pub fn max_members(&self) -> Option<usize> {
        self.server_settings
            .get(MAX_MEMBERS_SETTING)
            .and_then(|v| v.trim().parse().ok())
    }
}

/// Client-writable part of the settings, as sent with a settings update
/// (and with the creation request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartySettingsUpdate {
    pub is_public: bool,
    pub only_leader_can_invite: bool,
    pub is_joinable: bool,
    pub game_finder_name: String,
    pub custom_data: String,
    #[serde(default)]
    pub server_settings: BTreeMap<String, String>,
}

impl Default for PartySettingsUpdate {
    fn default() -> Self {
        Self {
            is_public: false,
            only_leader_can_invite: true,
            is_joinable: true,
            game_finder_name: String::new(),
            custom_data: String::new(),
            server_settings: BTreeMap::new(),
        }
    }
}

impl PartySettingsUpdate {
    /// Requested member cap. `Err` carries the raw value when it is not a
    /// positive integer.
    pub fn max_members(&self) -> Result<Option<usize>, String> {
        match self.server_settings.get(MAX_MEMBERS_SETTING) {
            None => Ok(None),
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(cap) if cap > 0 => Ok(Some(cap)),
                _ => Err(raw.clone()),
            },
        }
    }
}

impl From<&PartyConfiguration> for PartySettingsUpdate {
    fn from(settings: &PartyConfiguration) -> Self {
        Self {
            is_public: settings.is_public,
            only_leader_can_invite: settings.only_leader_can_invite,
            is_joinable: settings.is_joinable,
            game_finder_name: settings.game_finder_name.clone(),
            custom_data: settings.custom_data.clone(),
            server_settings: settings.server_settings.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn settings() -> PartyConfiguration {
        PartyConfiguration::new(
            PartyId::new(),
            UserId::from("leader"),
            PartySettingsUpdate::default(),
        )
    }

    #[test]
    fn test_apply_keeps_leader_and_public_server_data() {
        let mut config = settings();
        config
            .public_server_data
            .insert("gameSession".to_string(), "gs-1".to_string());

        config.apply(PartySettingsUpdate {
            game_finder_name: "duo".to_string(),
            ..PartySettingsUpdate::default()
        });

        assert_eq!(config.game_finder_name, "duo");
        assert_eq!(config.party_leader_id, UserId::from("leader"));
        assert_eq!(
            config.public_server_data.get("gameSession").map(String::as_str),
            Some("gs-1")
        );
    }

    #[test]
    fn test_max_members_parsing() {
        let mut config = settings();
        assert_eq!(config.max_members(), None);

        config
            .server_settings
            .insert(MAX_MEMBERS_SETTING.to_string(), "4".to_string());
        assert_eq!(config.max_members(), Some(4));

        config
            .server_settings
            .insert(MAX_MEMBERS_SETTING.to_string(), "four".to_string());
        assert_eq!(config.max_members(), None);
    }

    #[test]
    fn test_update_max_members_validation() {
        let mut update = PartySettingsUpdate::default();
        assert_eq!(update.max_members(), Ok(None));

        update
            .server_settings
            .insert(MAX_MEMBERS_SETTING.to_string(), " 6 ".to_string());
        assert_eq!(update.max_members(), Ok(Some(6)));

        update
            .server_settings
            .insert(MAX_MEMBERS_SETTING.to_string(), "0".to_string());
        assert_eq!(update.max_members(), Err("0".to_string()));
    }

    #[test]
    fn test_settings_serialize_camel_case() {
        let json = serde_json::to_value(settings()).unwrap();
        assert!(json.get("partyLeaderId").is_some());
        assert!(json.get("onlyLeaderCanInvite").is_some());
    }
}
