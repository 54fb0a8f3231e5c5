//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Crowmap.
//
// Crowmap is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published by  the Free
// Software Foundation, either version  3 of the License, or (at  your option)
// any later version.
//
// Crowmap is distributed in the hope  that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crowmap. If not, see <http://www.gnu.org/licenses/>.

//! The construction-time configuration surface: user credentials, system
//! flags, enabled capabilities, ID metadata, and seed mailbox state.
//!
//! All of it is plain data, loadable from TOML for the CLI or built in code
//! by tests. None of it is part of the protocol engine's own contract.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::support::error::Error;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// User credential table. Empty means the default test user
    /// (`testuser` / `demo`, XOAUTH2 token `testtoken`).
    pub users: BTreeMap<String, UserConfig>,
    /// System flags; empty means the standard five.
    pub system_flags: Vec<String>,
    /// Capabilities to install, by name.
    pub capabilities: Vec<String>,
    /// Server identification for the ID capability.
    pub id: Option<BTreeMap<String, String>>,
    /// Seed state for INBOX.
    pub inbox: Option<FolderConfig>,
    /// Additional namespaces, keyed by prefix.
    pub namespaces: BTreeMap<String, NamespaceConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, Error> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn default_users() -> HashMap<String, UserConfig> {
        let mut users = HashMap::new();
        users.insert(
            "testuser".to_owned(),
            UserConfig {
                password: "demo".to_owned(),
                xoauth2: Some(XOAuth2Config {
                    access_token: "testtoken".to_owned(),
                }),
            },
        );
        users
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserConfig {
    pub password: String,
    #[serde(default)]
    pub xoauth2: Option<XOAuth2Config>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct XOAuth2Config {
    pub access_token: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    pub separator: String,
    /// `personal`, `other`, or `shared`.
    pub kind: String,
    pub folders: BTreeMap<String, FolderConfig>,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        NamespaceConfig {
            separator: "/".to_owned(),
            kind: "personal".to_owned(),
            folders: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FolderConfig {
    pub flags: Vec<String>,
    pub subscribed: Option<bool>,
    pub special_use: Vec<String>,
    pub uidvalidity: u32,
    pub uidnext: u32,
    pub allow_permanent_flags: Option<bool>,
    pub permanent_flags: Vec<String>,
    pub messages: Vec<MessageConfig>,
    pub folders: BTreeMap<String, FolderConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    pub raw: String,
    pub flags: Vec<String>,
    /// 0 means "assign the next UID at index time".
    pub uid: u32,
    /// Empty means "now".
    pub internaldate: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config: Config = toml::from_str(
            r##"
capabilities = ["ID", "IDLE", "CONDSTORE"]
system_flags = ["\\Seen", "\\Deleted"]

[users.alice]
password = "wonderland"

[users.bob]
password = "builder"
[users.bob.xoauth2]
access_token = "sekrit"

[id]
name = "crowmap"
vendor = "test"

[inbox]
[[inbox.messages]]
raw = "Subject: hi\r\n\r\nhello"
flags = ["\\Seen"]

[namespaces.""]
separator = "/"
[namespaces."".folders.Archive]
subscribed = false
[namespaces."".folders.Archive.folders."2023"]

[namespaces."#news."]
separator = "."
kind = "shared"
"##,
        )
        .unwrap();

        assert_eq!(3, config.capabilities.len());
        assert_eq!(2, config.users.len());
        assert!(config.users["bob"].xoauth2.is_some());
        assert!(config.users["alice"].xoauth2.is_none());
        assert_eq!(
            Some("crowmap"),
            config
                .id
                .as_ref()
                .and_then(|id| id.get("name"))
                .map(String::as_str)
        );
        assert_eq!(
            1,
            config.inbox.as_ref().unwrap().messages.len()
        );
        let root = &config.namespaces[""];
        assert_eq!(Some(false), root.folders["Archive"].subscribed);
        assert!(root.folders["Archive"].folders.contains_key("2023"));
        assert_eq!("shared", config.namespaces["#news."].kind);
    }

    #[test]
    fn default_config_is_empty() {
        let config = Config::default();
        assert!(config.users.is_empty());
        assert!(config.capabilities.is_empty());
        assert!(!Config::default_users().is_empty());
    }
}
