//! Adapter exposing the system MIT Kerberos profile (`krb5.conf`) as a
//! config source. Implemented as a small recursive-descent parser of the
//! brace-nested profile grammar rather than a `libkrb5` binding, since no
//! such binding exists in this dependency stack.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::server_uri::{Service, ServerUri, Transport};

#[derive(Debug, Error)]
pub enum Error {
    #[error("unexpected {0:?} at line {1}")]
    Unexpected(char, usize),
    #[error("unterminated section starting at line {0}")]
    Unterminated(usize),
}

#[derive(Debug, Default)]
enum Value {
    #[default]
    Empty,
    Leaf(String),
    Section(HashMap<String, Vec<Value>>),
}

/// Parses the brace-nested `section { key = value }` grammar used by
/// `krb5.conf`. `include`/`includedir` directives are recognized and
/// skipped (out of scope); relations may repeat, and repeats accumulate
/// (matching the profile library's own multi-value semantics).
fn parse(input: &str) -> Result<HashMap<String, Vec<Value>>, Error> {
    let mut lines = input.lines().enumerate().peekable();
    parse_block(&mut lines, 0)
}

type Lines<'a> = std::iter::Peekable<std::iter::Enumerate<std::str::Lines<'a>>>;

fn parse_block(lines: &mut Lines<'_>, depth: usize) -> Result<HashMap<String, Vec<Value>>, Error> {
    let mut out: HashMap<String, Vec<Value>> = HashMap::new();

    while let Some(&(lineno, raw)) = lines.peek() {
        let line = strip_comment(raw).trim();

        if line.is_empty() {
            lines.next();
            continue;
        }

        if line == "}" {
            lines.next();
            if depth == 0 {
                return Err(Error::Unexpected('}', lineno + 1));
            }
            return Ok(out);
        }

        if line.starts_with('[') && line.ends_with(']') {
            // krb5.conf top-level sections are written as `[name]`, not
            // `name = {`; normalize to the brace form.
            lines.next();
            let name = line[1..line.len() - 1].trim().to_owned();
            let inner = parse_block(lines, depth + 1)?;
            out.entry(name).or_default().push(Value::Section(inner));
            continue;
        }

        lines.next();

        if let Some(directive) = line.strip_prefix("include") {
            let _ = directive;
            continue;
        }

        let Some((key, rest)) = line.split_once('=') else {
            return Err(Error::Unexpected(line.chars().next().unwrap_or(' '), lineno + 1));
        };
        let key = key.trim().to_owned();
        let rest = rest.trim();

        if rest == "{" {
            let inner = parse_block(lines, depth + 1)?;
            out.entry(key).or_default().push(Value::Section(inner));
        } else {
            out.entry(key).or_default().push(Value::Leaf(rest.to_owned()));
        }
    }

    if depth != 0 {
        return Err(Error::Unterminated(0));
    }

    Ok(out)
}

fn strip_comment(line: &str) -> &str {
    for (i, c) in line.char_indices() {
        if c == ';' || c == '#' {
            return &line[..i];
        }
    }
    line
}

fn get_leaf<'a>(section: &'a HashMap<String, Vec<Value>>, key: &str) -> Option<&'a str> {
    section.get(key)?.iter().rev().find_map(|v| match v {
        Value::Leaf(s) => Some(s.as_str()),
        _ => None,
    })
}

fn get_section<'a>(section: &'a HashMap<String, Vec<Value>>, key: &str) -> Option<&'a HashMap<String, Vec<Value>>> {
    section.get(key)?.iter().find_map(|v| match v {
        Value::Section(s) => Some(s),
        _ => None,
    })
}

fn parse_krb5_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct MitConfig {
    use_dns: bool,
    realms: HashMap<String, RealmServers>,
}

#[derive(Debug, Default)]
struct RealmServers {
    kdc: Vec<ServerUri>,
    kpasswd_server: Vec<ServerUri>,
    admin_server: Vec<ServerUri>,
}

impl MitConfig {
    pub fn path() -> PathBuf {
        env::var("KRB5_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/krb5.conf"))
    }

    /// Loads and parses the profile at [`Self::path`], logging and
    /// returning an empty config on any failure.
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::info!(path = %path.display(), error = %err, "no krb5.conf, MIT adapter disabled");
                return Self::default_use_dns();
            }
        };

        match parse(&raw) {
            Ok(root) => Self::from_profile(&root),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to parse krb5.conf");
                Self::default_use_dns()
            }
        }
    }

    fn default_use_dns() -> Self {
        MitConfig {
            use_dns: true,
            realms: HashMap::new(),
        }
    }

    fn from_profile(root: &HashMap<String, Vec<Value>>) -> Self {
        let mut use_dns = true;
        if let Some(libdefaults) = get_section(root, "libdefaults") {
            if let Some(raw) = get_leaf(libdefaults, "dns_fallback") {
                if let Some(v) = parse_krb5_bool(raw) {
                    use_dns = v;
                }
            }
            if let Some(raw) = get_leaf(libdefaults, "dns_lookup_kdc") {
                if let Some(v) = parse_krb5_bool(raw) {
                    use_dns = v;
                }
            }
        }

        let mut realms = HashMap::new();
        if let Some(realms_section) = get_section(root, "realms") {
            for (realm, values) in realms_section {
                let Some(Value::Section(realm_conf)) = values.last() else {
                    continue;
                };
                let mut servers = RealmServers::default();
                servers.kdc = collect_uris(realm_conf, "kdc", Service::Kerberos, false);
                servers.kpasswd_server = collect_uris(realm_conf, "kpasswd_server", Service::Kpasswd, false);
                servers.admin_server = collect_uris(realm_conf, "admin_server", Service::Kpasswd, true);
                realms.insert(realm.clone(), servers);
            }
        }

        MitConfig { use_dns, realms }
    }

    pub fn use_dns(&self) -> bool {
        self.use_dns
    }

    pub fn lookup(&self, realm: &str, kpasswd: bool) -> Vec<ServerUri> {
        let Some(servers) = self.realms.get(realm) else {
            return Vec::new();
        };
        if kpasswd {
            servers
                .kpasswd_server
                .iter()
                .chain(servers.admin_server.iter())
                .cloned()
                .collect()
        } else {
            servers.kdc.clone()
        }
    }

    pub fn realm_configured(&self, realm: &str) -> bool {
        self.realms.contains_key(realm)
    }
}

/// `kdc`/`kpasswd_server`/`admin_server` entries are `host[:port]`, normalized
/// to `kerberos://`/`kpasswd://` URIs. For `admin_server`, any explicit port
/// is stripped (the kadmin port differs from the kpasswd port).
fn collect_uris(section: &HashMap<String, Vec<Value>>, key: &str, service: Service, strip_port: bool) -> Vec<ServerUri> {
    let Some(entries) = section.get(key) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|v| match v {
            Value::Leaf(raw) => Some(raw.as_str()),
            _ => None,
        })
        .filter_map(|raw| parse_host_port(raw, service, strip_port))
        .collect()
}

fn parse_host_port(raw: &str, service: Service, strip_port: bool) -> Option<ServerUri> {
    let raw = raw.trim();

    if let Some((scheme, _)) = raw.split_once("://") {
        let _ = scheme;
        return ServerUri::parse(raw).ok();
    }

    let (host, port) = match raw.rsplit_once(':') {
        Some((host, port_str)) if !strip_port => match port_str.parse::<u16>() {
            Ok(port) => (host, Some(port)),
            Err(_) => (raw, None),
        },
        Some((host, _)) if strip_port => (host, None),
        _ => (raw, None),
    };

    let port = port.unwrap_or_else(|| service.default_port());
    Some(ServerUri::new(service, Transport::Any, host, port))
}
