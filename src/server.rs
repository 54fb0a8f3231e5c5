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

//! The process-wide server: the shared mailbox store, the frozen extension
//! registry, the user table, and the live session set.
//!
//! Notification routing lives here. Store mutations hand back
//! [`Notification`] values; [`Server::notify`] walks the session list and
//! offers each notice to each session's queue. This runs strictly after the
//! store lock has been released, so routing never holds one lock while
//! waiting on another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel;
use log::{info, warn};

use crate::config::{Config, FolderConfig, UserConfig};
use crate::extensions::{install_capability, Registry};
use crate::session::handlers;
use crate::session::Connection;
use crate::store::{NamespaceKind, Notification, Store};
use crate::transport::Socket;

pub struct Server {
    registry: Registry,
    store: Mutex<Store>,
    pub users: HashMap<String, UserConfig>,
    /// Server identification pairs for the ID capability.
    pub id_info: Option<Vec<(String, String)>>,
    connections: Mutex<Vec<Arc<Connection>>>,
    next_session_id: AtomicU64,
}

impl Server {
    pub fn new(config: Config) -> Arc<Self> {
        let mut registry = Registry::new();
        handlers::install(&mut registry);
        for capability in &config.capabilities {
            if !install_capability(capability, &mut registry) {
                warn!("Ignoring unknown capability {:?}", capability);
            }
        }

        let mut store = Store::new(config.system_flags.clone());
        seed_store(&mut store, &config);
        store.index_folders(&registry.message_handlers);

        let users = if config.users.is_empty() {
            Config::default_users()
        } else {
            config.users.clone().into_iter().collect()
        };

        let id_info = config.id.as_ref().map(|pairs| {
            pairs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        });

        Arc::new(Server {
            registry,
            store: Mutex::new(store),
            users,
            id_info,
            connections: Mutex::new(Vec::new()),
            next_session_id: AtomicU64::new(1),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &Mutex<Store> {
        &self.store
    }

    /// Open a new in-memory client connection.
    ///
    /// The returned socket has already received the open event and the
    /// untagged greeting.
    pub fn connect(self: &Arc<Self>) -> Socket {
        {
            let mut store = self.store.lock().unwrap();
            store.index_folders(&self.registry.message_handlers);
        }

        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = channel::unbounded();
        let conn = Connection::new(id, Arc::clone(self), sender);

        {
            let mut engine = conn.engine.lock().unwrap();
            for handler in &self.registry.connection_handlers {
                handler.on_connect(&mut engine);
            }
            conn.sync_shadow(&engine);
        }

        self.connections.lock().unwrap().push(Arc::clone(&conn));
        info!("[sess{}] Connected", id);

        let socket = Socket::new(conn, receiver);
        socket.announce_open();
        socket.connection().greet();
        socket
    }

    /// Route notifications to every interested session. Must be called with
    /// no store lock held.
    pub(crate) fn notify(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        let connections: Vec<Arc<Connection>> =
            self.connections.lock().unwrap().clone();
        for notification in &notifications {
            for connection in &connections {
                connection.on_notify(notification);
            }
        }
    }

    pub(crate) fn remove_connection(&self, id: u64) {
        self.connections.lock().unwrap().retain(|c| c.id != id);
    }
}

fn seed_store(store: &mut Store, config: &Config) {
    if let Some(ref inbox) = config.inbox {
        seed_folder(store, "INBOX", "INBOX", inbox);
    }

    for (prefix, namespace) in &config.namespaces {
        let kind = match namespace.kind.to_ascii_lowercase().as_str() {
            "shared" => NamespaceKind::Shared,
            "other" => NamespaceKind::Other,
            _ => NamespaceKind::Personal,
        };
        store.add_namespace(prefix, &namespace.separator, kind);
        for (name, folder) in &namespace.folders {
            seed_tree(
                store,
                prefix,
                prefix,
                name,
                folder,
                &namespace.separator,
            );
        }
    }
}

fn seed_tree(
    store: &mut Store,
    namespace: &str,
    parent: &str,
    name: &str,
    config: &FolderConfig,
    separator: &str,
) {
    let path = if parent.is_empty() {
        name.to_owned()
    } else if parent.ends_with(separator) {
        format!("{}{}", parent, name)
    } else {
        format!("{}{}{}", parent, separator, name)
    };

    seed_folder(store, namespace, &path, config);
    for (child_name, child) in &config.folders {
        seed_tree(store, namespace, &path, child_name, child, separator);
    }
}

fn seed_folder(
    store: &mut Store,
    namespace: &str,
    path: &str,
    config: &FolderConfig,
) {
    use crate::store::model::Message;
    use std::sync::Mutex as MessageMutex;

    let folder = store.add_folder(namespace, path);
    folder.flags = config.flags.clone();
    if let Some(subscribed) = config.subscribed {
        folder.subscribed = subscribed;
    }
    folder.special_use = config.special_use.clone();
    if config.uidvalidity > 0 {
        folder.uidvalidity = config.uidvalidity;
    }
    if config.uidnext > folder.uidnext {
        folder.uidnext = config.uidnext;
    }
    if let Some(allow) = config.allow_permanent_flags {
        folder.allow_permanent_flags = allow;
    }
    folder.permanent_flags = config.permanent_flags.clone();

    for seed in &config.messages {
        let mut message = Message::new(seed.raw.clone().into_bytes());
        message.flags = seed.flags.clone();
        message.uid = seed.uid;
        message.internal_date = seed.internaldate.clone();
        folder
            .messages
            .push(Arc::new(MessageMutex::new(message)));
    }
}
