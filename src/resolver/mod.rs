//! Combines the config store, any compiled-in adapters, and DNS SRV
//! discovery into a single per-realm server lookup, with the discovery
//! safety gate and working-server reordering applied on top.

pub mod dns;
pub mod working;

use crate::config::{mit::MitConfig, BoolParam, KdcProxyConfig};
use crate::server_uri::ServerUri;
use dns::DnsResolver;
use working::WorkingServerMap;

pub struct MetaResolver {
    config: KdcProxyConfig,
    mit: Option<MitConfig>,
    dns: DnsResolver,
    working: WorkingServerMap,
}

impl MetaResolver {
    pub fn new(config: KdcProxyConfig, dns: DnsResolver) -> Self {
        let mit = if config.requested_adapters().iter().any(|a| a == "mit") {
            Some(MitConfig::load())
        } else {
            None
        };

        MetaResolver {
            config,
            mit,
            dns,
            working: WorkingServerMap::new(),
        }
    }

    pub fn working_servers(&self) -> &WorkingServerMap {
        &self.working
    }

    fn realm_configured(&self, realm: &str) -> bool {
        self.config.realm_configured(realm) || self.mit.as_ref().is_some_and(|m| m.realm_configured(realm))
    }

    fn dns_discovery_allowed(&self, realm: &str) -> bool {
        let acknowledged =
            self.realm_configured(realm) || self.config.bool_param(None, BoolParam::DnsRealmDiscovery);
        let use_dns = self.config.bool_param(Some(realm), BoolParam::UseDns)
            && self.mit.as_ref().is_none_or(|m| m.use_dns());
        acknowledged && use_dns
    }

    /// Resolves a realm to an ordered, deduplicated list of candidate
    /// servers: config store first, then any adapter, then (if allowed)
    /// DNS SRV, then finally reordered by the working-server memo.
    pub async fn lookup(&self, realm: &str, kpasswd: bool) -> Vec<ServerUri> {
        let mut out = Vec::new();

        if let Ok(servers) = self.config.lookup(realm, kpasswd) {
            extend_dedup(&mut out, servers);
        }

        if let Some(mit) = &self.mit {
            extend_dedup(&mut out, mit.lookup(realm, kpasswd));
        }

        if self.dns_discovery_allowed(realm) {
            let silence_warn = self.config.bool_param(Some(realm), BoolParam::SilencePortWarn);
            let records = self
                .dns
                .lookup(realm, kpasswd, |port| port_is_acceptable(silence_warn, kpasswd, port))
                .await;
            extend_dedup(&mut out, records);
        }

        self.working.reorder(realm, out)
    }
}

/// Whether a discovered port should be passed through without a warning.
/// Non-standard ports are still used either way (DNS SRV is authoritative
/// over the well-known default); this only gates the warning.
fn port_is_acceptable(silence_warn: bool, kpasswd: bool, port: u16) -> bool {
    let expected_port = if kpasswd { 464 } else { 88 };
    silence_warn || port == expected_port
}

fn extend_dedup(out: &mut Vec<ServerUri>, more: Vec<ServerUri>) {
    for uri in more {
        if !out.contains(&uri) {
            out.push(uri);
        }
    }
}
