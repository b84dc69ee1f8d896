//! Per-realm memo of the last server that answered successfully, so the
//! next request for that realm tries it first.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::server_uri::ServerUri;

#[derive(Default)]
pub struct WorkingServerMap {
    inner: Mutex<HashMap<String, ServerUri>>,
}

impl WorkingServerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the remembered server for `realm` to the front of `servers`,
    /// if present; otherwise returns `servers` unchanged.
    pub fn reorder(&self, realm: &str, mut servers: Vec<ServerUri>) -> Vec<ServerUri> {
        let remembered = self.inner.lock().get(realm).cloned();
        let Some(remembered) = remembered else {
            return servers;
        };
        if let Some(pos) = servers.iter().position(|s| *s == remembered) {
            let server = servers.remove(pos);
            servers.insert(0, server);
        }
        servers
    }

    pub fn mark_working(&self, realm: &str, server: &ServerUri) {
        self.inner.lock().insert(realm.to_owned(), server.clone());
    }

    /// Clears the memo only if it currently points at exactly `server`.
    pub fn mark_broken(&self, realm: &str, server: &ServerUri) {
        let mut guard = self.inner.lock();
        if guard.get(realm) == Some(server) {
            guard.remove(realm);
        }
    }
}
