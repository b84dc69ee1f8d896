//! DNS SRV-based server discovery.

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::server_uri::{Service, ServerUri, Transport};

pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    /// Builds a resolver from the system's `/etc/resolv.conf` (or platform
    /// equivalent), falling back to a built-in default configuration.
    pub fn from_system_conf() -> Self {
        let inner = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read system DNS config, using defaults");
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }
        };
        DnsResolver { inner }
    }

    /// Looks up SRV records for `realm`, trying `tcp` then `udp`, and for
    /// `kpasswd` falling back to `_kerberos-adm` when the primary query is
    /// empty. Ordered by priority only; DNS failures yield an empty vector,
    /// never an error. Each record is checked against `port_ok`, which
    /// should warn (per the realm's `silence_port_warn` setting) when the
    /// port is non-standard.
    pub async fn lookup(&self, realm: &str, kpasswd: bool, mut port_ok: impl FnMut(u16) -> bool) -> Vec<ServerUri> {
        let service = if kpasswd { Service::Kpasswd } else { Service::Kerberos };
        let mut out = Vec::new();

        for proto in ["tcp", "udp"] {
            let mut records = self.srv_query(service.as_str(), proto, realm).await;

            if kpasswd && records.is_empty() {
                records = self.srv_query("kerberos-adm", proto, realm).await;
            }

            // `_tcp`/`_udp` only pick which SRV record set to query; the
            // resulting URI is not transport-pinned, same as a plain
            // `kerberos://`/`kpasswd://` config entry.
            for (target, port) in records {
                if !port_ok(port) {
                    tracing::warn!(realm, target, port, "SRV record uses non-standard port");
                }
                out.push(to_server_uri(service, &target, port));
            }
        }

        out
    }

    async fn srv_query(&self, service: &str, proto: &str, realm: &str) -> Vec<(String, u16)> {
        let name = format!("_{service}._{proto}.{realm}");

        let lookup = match self.inner.srv_lookup(&name).await {
            Ok(lookup) => lookup,
            Err(err) => {
                tracing::debug!(query = name, error = %err, "SRV lookup failed or empty");
                return Vec::new();
            }
        };

        let mut records: Vec<_> = lookup
            .iter()
            .map(|srv| {
                let target = srv.target().to_utf8();
                let target = target.strip_suffix('.').map(str::to_owned).unwrap_or(target);
                (srv.priority(), target, srv.port())
            })
            .collect();

        records.sort_by_key(|(priority, _, _)| *priority);
        records.into_iter().map(|(_, target, port)| (target, port)).collect()
    }
}

fn to_server_uri(service: Service, target: &str, port: u16) -> ServerUri {
    ServerUri::new(service, Transport::Any, target, port)
}
