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

//! The extension bus: how optional capabilities compose with the base
//! command set without the base knowing about them.
//!
//! A capability may advertise itself (conditionally per session state),
//! install or wrap command handlers, add fetch/store/search items, install
//! fetch/store filter predicates, attach per-message and per-connection
//! hooks, and intercept responses on their way out. Handler wrapping is a
//! chain of responsibility: installing a handler for a verb that already has
//! one captures the previous handler, and the wrapper decides whether and
//! how to call through.
//!
//! Everything is registered while the server is being built; the finished
//! [`Registry`] is immutable and shared by every session.

mod auth_plain;
mod condstore;
mod enable;
mod id;
mod idle;
mod sasl_ir;
mod special_use;
mod unselect;
mod xoauth2;

use std::collections::HashMap;
use std::sync::Arc;

use crate::server::Server;
use crate::session::{Connection, Engine, SessionView};
use crate::store::model::{Folder, Message, MessageRef};
use crate::support::error::Error;
use crate::syntax::{Atom, Command, Node, Response};

/// A command handler. Wrappers installed later capture the previous handler
/// and call through to preserve layering.
pub type CommandHandler =
    Arc<dyn Fn(&Arc<Connection>, &mut Engine, &mut Command) + Send + Sync>;

/// Whether a capability is advertised to a session in its current state.
pub type CapabilityPredicate = Arc<dyn Fn(&Engine) -> bool + Send + Sync>;

/// Computes one fetch data item for one message.
pub trait FetchItemHandler: Send + Sync {
    fn fetch(
        &self,
        message: &mut Message,
        query: &mut Atom,
    ) -> Result<Node, Error>;
}

/// Applies one store item to one message.
pub trait StoreItemHandler: Send + Sync {
    fn store(
        &self,
        message: &mut Message,
        values: &[Node],
        seq: u32,
    ) -> Result<(), Error>;
}

/// A capability-registered SEARCH key.
pub trait SearchHandler: Send + Sync {
    /// Number of value operands the key consumes.
    fn arity(&self) -> usize;
    fn matches(
        &self,
        engine: &Engine,
        message: &MessageRef,
        seq: u32,
        args: &[String],
    ) -> bool;
}

/// Consulted for each message before FETCH renders it; rejection skips the
/// message silently.
pub trait FetchFilter: Send + Sync {
    fn accept(
        &self,
        engine: &Engine,
        message: &MessageRef,
        command: &Command,
        seq: u32,
    ) -> bool;
}

/// Consulted for each message before STORE mutates it; rejection skips the
/// message silently.
pub trait StoreFilter: Send + Sync {
    fn accept(
        &self,
        engine: &Engine,
        message: &MessageRef,
        command: &Command,
        seq: u32,
    ) -> bool;
}

/// Runs when a message is appended or (re)indexed.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, folder: &mut Folder, message: &mut Message);
}

/// Runs when a session is created.
pub trait ConnectionHandler: Send + Sync {
    fn on_connect(&self, engine: &mut Engine);
}

/// Why a response is being emitted; the part of the exchange output hooks
/// key their behaviour on.
#[derive(Clone, Debug)]
pub enum ResponseEvent {
    Generic,
    /// An asynchronous notification being flushed from the queue.
    Notification,
    ListItem {
        special_use: Vec<String>,
        special_use_only: bool,
        special_use_flags: bool,
    },
    LsubItem {
        special_use: Vec<String>,
        special_use_only: bool,
        special_use_flags: bool,
    },
    /// The tagged completion of SELECT or EXAMINE.
    SelectComplete,
    /// The tagged completion of STORE; carries the UIDs actually mutated.
    StoreComplete { uids: Vec<u32> },
    /// An untagged per-message flag update from STORE.
    FlagUpdate { uid: u32 },
}

/// What an output hook may do besides mutating the response in place.
#[derive(Default)]
pub struct HookOutput {
    /// Suppress the response entirely.
    pub skip: bool,
    /// Additional responses to emit before this one.
    pub side: Vec<(ResponseEvent, Response)>,
}

/// Intercepts every response just before rendering.
pub trait OutputHook: Send + Sync {
    fn on_response(
        &self,
        server: &Arc<Server>,
        session: &SessionView,
        event: &ResponseEvent,
        response: &mut Response,
        out: &mut HookOutput,
    );
}

/// The frozen registration state shared by all sessions.
#[derive(Default)]
pub struct Registry {
    commands: HashMap<String, CommandHandler>,
    capabilities: Vec<(String, CapabilityPredicate)>,
    pub fetch_handlers: HashMap<String, Arc<dyn FetchItemHandler>>,
    pub store_handlers: HashMap<String, Arc<dyn StoreItemHandler>>,
    pub search_handlers: HashMap<String, Arc<dyn SearchHandler>>,
    pub fetch_filters: Vec<Arc<dyn FetchFilter>>,
    pub store_filters: Vec<Arc<dyn StoreFilter>>,
    pub output_hooks: Vec<Arc<dyn OutputHook>>,
    pub message_handlers: Vec<Arc<dyn MessageHandler>>,
    pub connection_handlers: Vec<Arc<dyn ConnectionHandler>>,
    /// Capability names ENABLE accepts.
    pub enable_available: Vec<String>,
    /// STATUS items the STATUS command accepts.
    pub allowed_status: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        registry.allowed_status = [
            "MESSAGES",
            "RECENT",
            "UIDNEXT",
            "UIDVALIDITY",
            "UNSEEN",
        ]
        .iter()
        .map(|&s| s.to_owned())
        .collect();
        registry
    }

    pub fn command_handler(&self, verb: &str) -> Option<CommandHandler> {
        self.commands.get(verb).cloned()
    }

    /// Install a command handler. Wrappers fetch the previous handler with
    /// [`Registry::command_handler`] before installing themselves.
    pub fn set_command_handler(&mut self, verb: &str, handler: CommandHandler) {
        self.commands.insert(verb.to_ascii_uppercase(), handler);
    }

    /// Advertise `name`, unconditionally.
    pub fn register_capability(&mut self, name: &str) {
        self.register_capability_if(name, Arc::new(|_| true));
    }

    /// Advertise `name` when `predicate` accepts the session's state.
    pub fn register_capability_if(
        &mut self,
        name: &str,
        predicate: CapabilityPredicate,
    ) {
        if let Some(entry) =
            self.capabilities.iter_mut().find(|(n, _)| n == name)
        {
            entry.1 = predicate;
        } else {
            self.capabilities.push((name.to_owned(), predicate));
        }
    }

    /// Whether `name` is registered and currently advertised for `engine`.
    pub fn capability_active(&self, name: &str, engine: &Engine) -> bool {
        self.capabilities
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, predicate)| predicate(engine))
            .unwrap_or(false)
    }

    /// The capability list to advertise to a session in its current state.
    pub fn capabilities_for(&self, engine: &Engine) -> Vec<String> {
        let mut list = vec!["IMAP4rev1".to_owned()];
        for (name, predicate) in &self.capabilities {
            if predicate(engine) {
                list.push(name.clone());
            }
        }
        list
    }

    pub fn allow_status_item(&mut self, name: &str) {
        if !self.allowed_status.iter().any(|s| s == name) {
            self.allowed_status.push(name.to_owned());
        }
    }
}

/// Install the named capability into `registry`.
///
/// Returns false for an unknown name; the caller decides whether that is a
/// configuration error.
pub fn install_capability(name: &str, registry: &mut Registry) -> bool {
    match name.to_ascii_uppercase().as_str() {
        "AUTH=PLAIN" => auth_plain::install(registry),
        "XOAUTH2" => xoauth2::install(registry),
        "SASL-IR" => sasl_ir::install(registry),
        "ID" => id::install(registry),
        "UNSELECT" => unselect::install(registry),
        "IDLE" => idle::install(registry),
        "ENABLE" => enable::install(registry),
        "CONDSTORE" => condstore::install(registry),
        "SPECIAL-USE" => special_use::install(registry),
        _ => return false,
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::session::SessionState;

    #[test]
    fn capability_predicates() {
        let mut registry = Registry::new();
        registry.register_capability("ID");
        registry.register_capability_if(
            "AUTH=PLAIN",
            Arc::new(|eng| SessionState::NotAuthenticated == eng.state),
        );

        let mut engine = Engine::default();
        engine.state = SessionState::NotAuthenticated;
        assert_eq!(
            vec![
                "IMAP4rev1".to_owned(),
                "ID".to_owned(),
                "AUTH=PLAIN".to_owned(),
            ],
            registry.capabilities_for(&engine)
        );
        assert!(registry.capability_active("AUTH=PLAIN", &engine));

        engine.state = SessionState::Authenticated;
        assert_eq!(
            vec!["IMAP4rev1".to_owned(), "ID".to_owned()],
            registry.capabilities_for(&engine)
        );
        assert!(!registry.capability_active("AUTH=PLAIN", &engine));
        assert!(!registry.capability_active("NONESUCH", &engine));
    }

    #[test]
    fn command_handler_wrapping() {
        let mut registry = Registry::new();
        assert!(registry.command_handler("NOOP").is_none());
        registry.set_command_handler("NOOP", Arc::new(|_, _, _| ()));
        assert!(registry.command_handler("NOOP").is_some());

        // Wrapping captures the previous handler; the verb is
        // case-insensitive on installation.
        let previous =
            registry.command_handler("NOOP").expect("just installed");
        registry.set_command_handler(
            "noop",
            Arc::new(move |conn, engine, cmd| {
                previous(conn, engine, cmd);
            }),
        );
        assert!(registry.command_handler("NOOP").is_some());
        assert!(registry.command_handler("NOPE").is_none());
    }

    #[test]
    fn unknown_capability_rejected() {
        let mut registry = Registry::new();
        assert!(!install_capability("X-NOT-A-THING", &mut registry));
    }
}
