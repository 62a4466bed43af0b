// fmgctl - CLI for the FortiManager JSON-RPC API
// Copyright (C) 2025 fmgctl authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::{Context, Result, anyhow};
use dirs::config_dir;
use ini::Ini;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Connection settings as they appear in config files. Files are JSON or INI;
/// in both cases the settings may sit under a `fortimanager` section so the
/// same files work for other FortiManager tooling.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default, alias = "ip", skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apikey: Option<String>,
}

impl Config {
    pub fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.apikey.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    User,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate a writable config directory for the current user")]
    MissingConfigDir,
    #[error(
        "FortiManager host is required; pass --host or set it with `fmgctl configure --host <host>`"
    )]
    MissingHost,
    #[error(
        "either an API key or a password is required; pass --apikey/--password or set one with `fmgctl configure`"
    )]
    MissingCredentials,
}

/// How the session authenticates. An API key wins over a password when both
/// are configured, matching the original client's preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    Password(String),
}

#[derive(Debug)]
pub struct EffectiveConfig {
    pub host: String,
    pub username: String,
    pub credential: Credential,
}

pub fn config_path(scope: Scope, cwd: &Path) -> Result<PathBuf> {
    match scope {
        Scope::Local => Ok(cwd.join(".fmgctl.json")),
        Scope::User => {
            if let Ok(custom) = env::var("FMGCTL_CONFIG_DIR") {
                return Ok(PathBuf::from(custom).join("config.json"));
            }
            let base = config_dir().ok_or(ConfigError::MissingConfigDir)?;
            Ok(base.join("fmgctl").join("config.json"))
        }
    }
}

pub fn load(cwd: &Path) -> Result<Config> {
    let user = read_if_exists(&config_path(Scope::User, cwd)?)?.unwrap_or_default();
    let local = read_if_exists(&config_path(Scope::Local, cwd)?)?.unwrap_or_default();
    Ok(merge(user, local))
}

pub fn load_scope(scope: Scope, cwd: &Path) -> Result<Config> {
    Ok(read_if_exists(&config_path(scope, cwd)?)?.unwrap_or_default())
}

/// Load an explicit `--config` file. Unlike the scopes, the file must exist.
pub fn load_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    parse_config_str(&contents, path)
}

pub fn save(scope: Scope, config: &Config, cwd: &Path) -> Result<PathBuf> {
    let path = config_path(scope, cwd)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    // Written with the `fortimanager` wrapper so the file round-trips with
    // other tools that read the same format.
    let wrapped = serde_json::json!({ "fortimanager": config });
    let serialized = serde_json::to_string_pretty(&wrapped).context("serializing config")?;
    fs::write(&path, serialized + "\n").with_context(|| format!("writing {:?}", path))?;
    Ok(path)
}

/// Resolve the effective connection settings. An explicit `--config` file
/// replaces scope discovery entirely; CLI overrides win over any file. The
/// username default is applied only after all sources are merged, so a
/// config-file username is honored when the flag is absent.
pub fn resolve(
    cwd: &Path,
    config_file: Option<&Path>,
    overrides: Config,
) -> Result<EffectiveConfig> {
    let base = match config_file {
        Some(path) => load_file(path)?,
        None => load(cwd)?,
    };
    let merged = merge(base, overrides);

    let host = merged
        .host
        .ok_or(ConfigError::MissingHost)
        .map(|h| h.trim().to_string())?;
    let username = merged
        .username
        .unwrap_or_else(|| DEFAULT_USERNAME.to_string());
    let credential = match (merged.apikey, merged.password) {
        (Some(key), _) => Credential::ApiKey(key.trim().to_string()),
        (None, Some(password)) => Credential::Password(password),
        (None, None) => return Err(ConfigError::MissingCredentials.into()),
    };

    Ok(EffectiveConfig {
        host,
        username,
        credential,
    })
}

fn read_if_exists(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    Ok(Some(parse_config_str(&contents, path)?))
}

/// Parse a config file body, probing JSON first and INI second.
fn parse_config_str(contents: &str, path: &Path) -> Result<Config> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(contents) {
        let section = match value.get("fortimanager") {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => value,
        };
        return serde_json::from_value(section).with_context(|| format!("parsing {:?}", path));
    }

    let ini = Ini::load_from_str(contents)
        .map_err(|err| anyhow!("parsing {:?}: not valid JSON or INI: {err}", path))?;
    let section = ini
        .section(Some("fortimanager"))
        .or_else(|| ini.section(Some("DEFAULT")))
        .or_else(|| ini.section(None::<String>));
    let Some(props) = section else {
        return Ok(Config::default());
    };
    Ok(Config {
        host: props
            .get("host")
            .or_else(|| props.get("ip"))
            .map(str::to_string),
        username: props.get("username").map(str::to_string),
        password: props.get("password").map(str::to_string),
        apikey: props.get("apikey").map(str::to_string),
    })
}

fn merge(lower: Config, higher: Config) -> Config {
    Config {
        host: higher.host.or(lower.host),
        username: higher.username.or(lower.username),
        password: higher.password.or(lower.password),
        apikey: higher.apikey.or(lower.apikey),
    }
}
