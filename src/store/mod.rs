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

//! The mailbox store: namespaces, folders, and the invariants they carry.
//!
//! The store is shared by every session and therefore lives behind a single
//! mutex owned by the server. Mutating operations return [`Notification`]
//! values instead of touching sessions themselves; the server routes those
//! to session queues only after the store lock has been released, so no lock
//! is ever acquired while another is held.

pub mod flags;
pub mod model;
pub mod range;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use log::info;
use regex::Regex;

use self::model::{toggle_flags, Folder, Message, MessageRef};
use crate::extensions::MessageHandler;
use crate::support::chronox;
use crate::support::error::Error;
use crate::syntax::{Node, Response};

/// Default system flags, used when the configuration does not override them.
pub static DEFAULT_SYSTEM_FLAGS: &[&str] = &[
    "\\Answered",
    "\\Flagged",
    "\\Draft",
    "\\Deleted",
    "\\Seen",
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NamespaceKind {
    Personal,
    Other,
    Shared,
}

/// Namespace metadata. The folder tree itself is kept flat in the store,
/// indexed by full path.
#[derive(Clone, Debug)]
pub struct Namespace {
    pub prefix: String,
    pub separator: String,
    pub kind: NamespaceKind,
}

/// Aggregated per-folder counts for STATUS/SELECT.
#[derive(Clone, Debug, Default)]
pub struct FolderStatus {
    pub seen: u32,
    pub unseen: u32,
    /// Count per flag actually present, first-seen order.
    pub flag_counts: Vec<(String, u32)>,
    /// Configured permanent flags plus every other flag observed on a
    /// message, de-duplicated, first-seen order.
    pub permanent_flags: Vec<String>,
}

impl FolderStatus {
    pub fn flag_count(&self, flag: &str) -> u32 {
        self.flag_counts
            .iter()
            .find(|(f, _)| f == flag)
            .map(|&(_, n)| n)
            .unwrap_or(0)
    }
}

/// An asynchronous state-change notice to be routed to interested sessions.
#[derive(Clone, Debug)]
pub struct Notification {
    /// The folder this concerns; `None` broadcasts to every session.
    pub folder: Option<String>,
    pub response: Response,
    /// For the EXISTS notice following an expunge: the folder's message list
    /// as it was before the expunge, for sessions still rendering against
    /// the old sequence numbering.
    pub snapshot: Option<Vec<MessageRef>>,
    /// Session which should not receive this notice.
    pub ignore: Option<u64>,
}

impl Notification {
    pub fn is_expunge(&self) -> bool {
        matches!(
            self.response.args.get(1),
            Some(Node::Atom(a)) if "EXPUNGE" == a.value
        )
    }
}

/// The process-wide mailbox state.
pub struct Store {
    namespaces: BTreeMap<String, Namespace>,
    folders: BTreeMap<String, Folder>,
    reference_namespace: String,
    pub system_flags: Vec<String>,
    /// uidnext values of deleted folders, so a recreated folder continues
    /// the counter instead of reusing UIDs.
    dead_uidnext: HashMap<String, u32>,
    /// uidvalidity stays stable per path for the lifetime of the store,
    /// across folder deletion and recreation.
    uidvalidity_by_path: HashMap<String, u32>,
}

impl Store {
    pub fn new(system_flags: Vec<String>) -> Self {
        let system_flags = if system_flags.is_empty() {
            DEFAULT_SYSTEM_FLAGS.iter().map(|&f| f.to_owned()).collect()
        } else {
            system_flags
        };

        let mut store = Store {
            namespaces: BTreeMap::new(),
            folders: BTreeMap::new(),
            reference_namespace: String::new(),
            system_flags,
            dead_uidnext: HashMap::new(),
            uidvalidity_by_path: HashMap::new(),
        };
        store.add_folder("INBOX", "INBOX");
        store
    }

    pub fn reference_namespace(&self) -> &str {
        &self.reference_namespace
    }

    pub fn add_namespace(
        &mut self,
        prefix: &str,
        separator: &str,
        kind: NamespaceKind,
    ) {
        self.namespaces.insert(
            prefix.to_owned(),
            Namespace {
                prefix: prefix.to_owned(),
                separator: separator.to_owned(),
                kind,
            },
        );
    }

    /// Add a folder under `namespace` with the given full path.
    ///
    /// A folder previously deleted at the same path resumes its UID counter
    /// and keeps its uidvalidity.
    pub fn add_folder(&mut self, namespace: &str, path: &str) -> &mut Folder {
        let dead_uidnext = self.dead_uidnext.get(path).copied().unwrap_or(1);
        let uidvalidity =
            self.uidvalidity_by_path.get(path).copied().unwrap_or(0);
        let folder = self
            .folders
            .entry(path.to_owned())
            .or_insert_with(|| Folder {
                path: path.to_owned(),
                namespace: namespace.to_owned(),
                uidnext: dead_uidnext,
                uidvalidity,
                allow_permanent_flags: true,
                subscribed: true,
                ..Folder::default()
            });
        folder
    }

    /// Delete a folder, remembering enough to keep the UID invariants if it
    /// is later recreated.
    pub fn remove_folder(&mut self, path: &str) -> bool {
        match self.folders.remove(path) {
            Some(folder) => {
                self.dead_uidnext
                    .insert(path.to_owned(), folder.uidnext);
                info!("Removed folder {}", path);
                true
            },
            None => false,
        }
    }

    /// (Re)build folder metadata: uidvalidity, uidnext, message
    /// normalisation, and the children flags.
    ///
    /// Idempotent; running it repeatedly must not disturb UIDs or
    /// uidvalidity. It runs on every new connection.
    pub fn index_folders(&mut self, handlers: &[Arc<dyn MessageHandler>]) {
        // The reference namespace is the first personal one; when none is
        // configured, an unprefixed personal namespace is materialised so
        // unqualified names (and INBOX) always resolve somewhere.
        let reference = self
            .namespaces
            .values()
            .find(|ns| NamespaceKind::Personal == ns.kind)
            .map(|ns| ns.prefix.clone());
        self.reference_namespace = match reference {
            Some(prefix) => prefix,
            None => {
                self.add_namespace("", "/", NamespaceKind::Personal);
                String::new()
            },
        };

        // Compute which folders have children before taking mutable
        // borrows.
        let child_markers: Vec<(String, bool)> = self
            .folders
            .keys()
            .map(|path| {
                let separator = self
                    .folders
                    .get(path)
                    .map(|f| self.separator_of(&f.namespace).to_owned())
                    .unwrap_or_else(|| "/".to_owned());
                let prefix = format!("{}{}", path, separator);
                let has_children = self
                    .folders
                    .keys()
                    .any(|other| other.starts_with(&prefix));
                (path.clone(), has_children)
            })
            .collect();

        for (path, has_children) in child_markers {
            let uidvalidity_cached =
                self.uidvalidity_by_path.get(&path).copied();
            let folder = match self.folders.get_mut(&path) {
                Some(folder) => folder,
                None => continue,
            };

            if 0 == folder.uidvalidity {
                folder.uidvalidity = uidvalidity_cached.unwrap_or(1);
            }

            if folder.permanent_flags.is_empty() {
                folder.permanent_flags = self.system_flags.clone();
            }

            folder.has_children = has_children;
            toggle_flags(
                &mut folder.flags,
                &["\\HasChildren", "\\HasNoChildren"],
                if has_children { 0 } else { 1 },
            );

            if folder.uidnext < 1 {
                folder.uidnext = 1;
            }
            let message_refs: Vec<MessageRef> = folder.messages.clone();
            for message_ref in message_refs {
                let mut message = message_ref.lock().unwrap();
                folder.process_message(&mut message);
                for handler in handlers {
                    handler.on_message(folder, &mut message);
                }
            }

            let uidvalidity = folder.uidvalidity;
            self.uidvalidity_by_path.insert(path, uidvalidity);
        }
    }

    fn canonical_path<'a>(&self, path: &'a str) -> &'a str {
        if path.eq_ignore_ascii_case("INBOX") {
            "INBOX"
        } else {
            path
        }
    }

    /// Look up a folder; `INBOX` resolves regardless of case.
    pub fn resolve(&self, path: &str) -> Option<&Folder> {
        self.folders.get(self.canonical_path(path))
    }

    pub fn resolve_mut(&mut self, path: &str) -> Option<&mut Folder> {
        let path = self.canonical_path(path).to_owned();
        self.folders.get_mut(&path)
    }

    /// The separator for a namespace prefix. The INBOX pseudo-namespace
    /// borrows the reference namespace's separator.
    pub fn separator_of(&self, namespace: &str) -> &str {
        if let Some(ns) = self.namespaces.get(namespace) {
            return &ns.separator;
        }
        self.namespaces
            .get(&self.reference_namespace)
            .map(|ns| ns.separator.as_str())
            .unwrap_or("/")
    }

    pub fn namespace(&self, prefix: &str) -> Option<&Namespace> {
        self.namespaces.get(prefix)
    }

    /// Match folders against a LIST-style pattern.
    ///
    /// `*` matches anything including the separator; `%` stops at the
    /// separator. Matching is anchored and case-sensitive, except that the
    /// literal name `INBOX` matches case-insensitively. `\NonExistent`
    /// folders are hidden unless named exactly.
    pub fn match_folders(
        &self,
        reference: &str,
        pattern: &str,
    ) -> Vec<&Folder> {
        let mut include_inbox = false;
        let reference = if reference.is_empty() {
            include_inbox = true;
            &self.reference_namespace
        } else {
            reference
        };

        let namespace = match self.namespaces.get(reference) {
            Some(ns) => ns,
            None => return Vec::new(),
        };

        let lookup = format!("{}{}", reference, pattern);
        let query = wildcard_regex(&lookup, &namespace.separator, false);
        let inbox_query = wildcard_regex(&lookup, &namespace.separator, true);

        let mut result = Vec::new();

        if include_inbox {
            let inbox_name = if reference.is_empty() {
                "INBOX".to_owned()
            } else {
                format!("{}{}INBOX", reference, namespace.separator)
            };
            if inbox_query.is_match(&inbox_name) {
                if let Some(inbox) = self.folders.get("INBOX") {
                    result.push(inbox);
                }
            }
        }

        for folder in self.folders.values() {
            if folder.namespace == *reference
                && query.is_match(&folder.path)
                && (!folder.has_flag("\\NonExistent")
                    || folder.path == pattern)
            {
                result.push(folder);
            }
        }

        result
    }

    /// Compute STATUS/SELECT counts for a folder.
    pub fn status(&self, folder: &Folder) -> FolderStatus {
        let mut status = FolderStatus {
            permanent_flags: folder.permanent_flags.clone(),
            ..FolderStatus::default()
        };

        for message_ref in &folder.messages {
            let message = message_ref.lock().unwrap();
            if message.has_flag("\\Seen") {
                status.seen += 1;
            } else {
                status.unseen += 1;
            }
            for flag in &message.flags {
                match status
                    .flag_counts
                    .iter_mut()
                    .find(|(f, _)| f == flag)
                {
                    Some((_, n)) => *n += 1,
                    None => status.flag_counts.push((flag.clone(), 1)),
                }
                if !status.permanent_flags.iter().any(|f| f == flag) {
                    status.permanent_flags.push(flag.clone());
                }
            }
        }

        status
    }

    /// Append a message, assigning the next UID, and produce the EXISTS
    /// notice for sessions observing the folder.
    pub fn append(
        &mut self,
        path: &str,
        flag_list: Vec<String>,
        internal_date: Option<String>,
        raw: Vec<u8>,
        handlers: &[Arc<dyn MessageHandler>],
        ignore: Option<u64>,
    ) -> Result<(u32, Notification), Error> {
        let path = self.canonical_path(path).to_owned();
        let folder = self.folders.get_mut(&path).ok_or(Error::NxMailbox)?;

        let mut message = Message::new(raw);
        message.flags = flag_list;
        message.internal_date = internal_date.unwrap_or_default();
        folder.process_message(&mut message);
        for handler in handlers {
            handler.on_message(folder, &mut message);
        }

        let uid = message.uid;
        folder.messages.push(Arc::new(Mutex::new(message)));
        info!("Appended message uid {} to {}", uid, path);

        let notification = Notification {
            folder: Some(path),
            response: Response::bare(vec![
                Node::num(folder.messages.len() as u32),
                Node::atom("EXISTS"),
            ]),
            snapshot: None,
            ignore,
        };
        Ok((uid, notification))
    }

    /// Splice out every `\Deleted` message, producing per-message EXPUNGE
    /// notices and, when anything was removed, a trailing EXISTS notice
    /// carrying the pre-expunge snapshot.
    pub fn expunge_deleted(
        &mut self,
        path: &str,
        session: u64,
        ignore_self: bool,
        ignore_exists: bool,
    ) -> Vec<Notification> {
        let path = self.canonical_path(path).to_owned();
        let folder = match self.folders.get_mut(&path) {
            Some(folder) => folder,
            None => return Vec::new(),
        };

        let snapshot: Vec<MessageRef> = folder.messages.clone();
        let mut notifications = Vec::new();
        let mut ix = 0;
        while ix < folder.messages.len() {
            let deleted =
                folder.messages[ix].lock().unwrap().has_flag("\\Deleted");
            if deleted {
                folder.messages.remove(ix);
                notifications.push(Notification {
                    folder: Some(path.clone()),
                    response: Response::bare(vec![
                        Node::num(ix as u32 + 1),
                        Node::atom("EXPUNGE"),
                    ]),
                    snapshot: None,
                    ignore: if ignore_self { Some(session) } else { None },
                });
            } else {
                ix += 1;
            }
        }

        if !notifications.is_empty() {
            info!(
                "Expunged {} message(s) from {}",
                notifications.len(),
                path
            );
            notifications.push(Notification {
                folder: Some(path.clone()),
                response: Response::bare(vec![
                    Node::num(folder.messages.len() as u32),
                    Node::atom("EXISTS"),
                ]),
                snapshot: Some(snapshot),
                ignore: if ignore_self || ignore_exists {
                    Some(session)
                } else {
                    None
                },
            });
        }

        notifications
    }

    /// Validate an APPEND-supplied internal date.
    pub fn valid_internal_date(raw: &str) -> bool {
        chronox::valid_internal_date(raw)
    }
}

fn wildcard_regex(
    lookup: &str,
    separator: &str,
    case_insensitive: bool,
) -> Regex {
    let mut rx = String::new();
    if case_insensitive {
        rx.push_str("(?i)");
    }
    rx.push('^');
    for c in lookup.chars() {
        match c {
            '*' => rx.push_str(".*"),
            '%' => {
                rx.push_str("[^");
                rx.push_str(&regex::escape(separator));
                rx.push_str("]*");
            },
            c => rx.push_str(&regex::escape(&c.to_string())),
        }
    }
    rx.push('$');
    Regex::new(&rx).expect("Built invalid folder pattern regex?")
}
