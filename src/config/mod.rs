//! Realm routing configuration: parses `kdcproxy.conf` and answers
//! per-realm parameter and server-list queries with the precedence rules
//! described by the configuration source contract.

pub mod mit;

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use crate::server_uri::ServerUri;

#[derive(Debug, Error)]
pub enum Error {
    #[error("realm name {0:?} is reserved and cannot be queried directly")]
    ReservedRealmName(String),
}

const GLOBAL_SECTION: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolParam {
    UseDns,
    SilencePortWarn,
    DnsRealmDiscovery,
}

impl BoolParam {
    fn key(self) -> &'static str {
        match self {
            BoolParam::UseDns => "use_dns",
            BoolParam::SilencePortWarn => "silence_port_warn",
            BoolParam::DnsRealmDiscovery => "dns_realm_discovery",
        }
    }

    fn default(self) -> bool {
        match self {
            BoolParam::UseDns => true,
            BoolParam::SilencePortWarn => false,
            BoolParam::DnsRealmDiscovery => false,
        }
    }
}

#[derive(Default, Debug, Clone)]
struct Section {
    kerberos: Vec<ServerUri>,
    kpasswd: Vec<ServerUri>,
    bools: HashMap<&'static str, bool>,
    configs: Option<String>,
}

/// A source of per-realm server URIs and parameters, layered over an INI
/// file: exact realm sections, `*suffix` wildcard sections, and a `global`
/// section.
pub struct KdcProxyConfig {
    global: Section,
    exact: HashMap<String, Section>,
    wildcards: Vec<(String, Section)>,
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_uri_list(raw: &str) -> Vec<ServerUri> {
    raw.split_whitespace()
        .filter_map(|token| match ServerUri::parse(token) {
            Ok(uri) => Some(uri),
            Err(err) => {
                tracing::warn!(uri = token, error = %err, "ignoring unparsable server URI in config");
                None
            }
        })
        .collect()
}

fn section_from_properties(props: &ini::Properties) -> Section {
    let mut section = Section::default();

    if let Some(raw) = props.get("kerberos") {
        section.kerberos = parse_uri_list(raw);
    }
    if let Some(raw) = props.get("kpasswd") {
        section.kpasswd = parse_uri_list(raw);
    }
    for param in [BoolParam::UseDns, BoolParam::SilencePortWarn, BoolParam::DnsRealmDiscovery] {
        if let Some(raw) = props.get(param.key()) {
            match parse_bool(raw) {
                Some(value) => {
                    section.bools.insert(param.key(), value);
                }
                None => tracing::warn!(param = param.key(), value = raw, "ignoring unparsable boolean"),
            }
        }
    }
    if let Some(raw) = props.get("configs") {
        section.configs = Some(raw.to_owned());
    }

    section
}

impl KdcProxyConfig {
    /// Resolves the config file path from an explicit override, then
    /// `KDCPROXY_CONFIG`, then the platform defaults.
    pub fn default_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = explicit {
            return Some(p.to_owned());
        }
        if let Ok(p) = env::var("KDCPROXY_CONFIG") {
            return Some(PathBuf::from(p));
        }
        for candidate in ["/usr/local/etc/kdcproxy.conf", "/etc/kdcproxy.conf"] {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Loads from `path`, logging and falling back to an empty config on
    /// any read/parse failure.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = Self::default_path(path) else {
            tracing::info!("no kdcproxy.conf found, using built-in defaults");
            return Self::empty();
        };

        match Ini::load_from_file(&path) {
            Ok(ini) => Self::from_ini(&ini),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read kdcproxy.conf, using built-in defaults");
                Self::empty()
            }
        }
    }

    pub fn empty() -> Self {
        KdcProxyConfig {
            global: Section::default(),
            exact: HashMap::new(),
            wildcards: Vec::new(),
        }
    }

    pub(crate) fn from_ini(ini: &Ini) -> Self {
        let mut global = Section::default();
        let mut exact = HashMap::new();
        let mut wildcards = Vec::new();

        for (name, props) in ini.iter() {
            let section = section_from_properties(props);
            match name {
                None => {}
                Some(GLOBAL_SECTION) => global = section,
                Some(name) if name.starts_with('*') => {
                    wildcards.push((name[1..].to_owned(), section));
                }
                Some(name) => {
                    exact.insert(name.to_owned(), section);
                }
            }
        }

        // Longest suffix first, so the first match found is the most specific.
        wildcards.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));

        KdcProxyConfig { global, exact, wildcards }
    }

    fn check_realm(realm: &str) -> Result<(), Error> {
        if realm.eq_ignore_ascii_case(GLOBAL_SECTION) {
            return Err(Error::ReservedRealmName(realm.to_owned()));
        }
        Ok(())
    }

    fn matching_wildcard(&self, realm: &str) -> Option<&Section> {
        self.wildcards
            .iter()
            .find(|(suffix, _)| realm == suffix || realm.ends_with(&format!(".{suffix}")))
            .map(|(_, section)| section)
    }

    /// Only the *exact* realm section contributes server URIs; wildcards
    /// never do.
    pub fn lookup(&self, realm: &str, kpasswd: bool) -> Result<Vec<ServerUri>, Error> {
        Self::check_realm(realm)?;
        let Some(section) = self.exact.get(realm) else {
            return Ok(Vec::new());
        };
        Ok(if kpasswd { section.kpasswd.clone() } else { section.kerberos.clone() })
    }

    pub fn realm_configured(&self, realm: &str) -> bool {
        if Self::check_realm(realm).is_err() {
            return false;
        }
        self.exact.contains_key(realm) || self.matching_wildcard(realm).is_some()
    }

    /// Precedence: exact realm > longest-suffix wildcard > global > default.
    /// `realm = None` skips the per-realm tiers.
    pub fn bool_param(&self, realm: Option<&str>, param: BoolParam) -> bool {
        if let Some(realm) = realm {
            if Self::check_realm(realm).is_ok() {
                if let Some(section) = self.exact.get(realm) {
                    if let Some(&value) = section.bools.get(param.key()) {
                        return value;
                    }
                }
                if let Some(section) = self.matching_wildcard(realm) {
                    if let Some(&value) = section.bools.get(param.key()) {
                        return value;
                    }
                }
            }
        }
        if let Some(&value) = self.global.bools.get(param.key()) {
            return value;
        }
        param.default()
    }

    /// Names of compiled-in config-source adapters the `global.configs`
    /// directive asked for (currently only `mit` is recognized).
    pub fn requested_adapters(&self) -> Vec<String> {
        self.global
            .configs
            .as_deref()
            .map(|raw| raw.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default()
    }
}
