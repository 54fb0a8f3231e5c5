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

//! Message-level commands: FETCH, STORE, SEARCH, COPY, APPEND, EXPUNGE,
//! CLOSE, and the UID variants.
//!
//! FETCH, STORE and SEARCH evaluate against the pre-expunge snapshot when an
//! EXPUNGE notice is queued but not yet delivered, so sequence numbers stay
//! coherent for the client. Mutations are applied message by message with no
//! rollback: a semantic failure mid-batch leaves earlier messages mutated
//! and reports a tagged failure.

use std::sync::Arc;

use super::{atom_or_quoted, done, done_with_event, stringish};
use crate::extensions::{Registry, ResponseEvent};
use crate::fetch;
use crate::search::{self, ExtSearch};
use crate::session::{flags_list, Connection, Engine, SessionState};
use crate::store::model::MessageRef;
use crate::store::range::message_range;
use crate::store::{flags as flag_ops, Notification};
use crate::syntax::{Atom, Command, Cond, Node, Response};

fn require_selected(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &Command,
    quip: &str,
) -> Option<String> {
    if SessionState::Selected == engine.state {
        engine.selected.clone()
    } else {
        done(conn, engine, cmd, Cond::Bad, quip);
        None
    }
}

fn folder_messages(conn: &Arc<Connection>, path: &str) -> Vec<MessageRef> {
    let store = conn.server.store().lock().unwrap();
    store
        .resolve(path)
        .map(|folder| folder.messages.clone())
        .unwrap_or_default()
}

/// The message snapshot a sequence-numbered command should run against: the
/// pre-expunge copy when one is pending, the live folder otherwise.
fn sequence_source(conn: &Arc<Connection>, path: &str) -> Vec<MessageRef> {
    conn.pending_snapshot()
        .unwrap_or_else(|| folder_messages(conn, path))
}

// --- FETCH ---

pub(super) fn fetch(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    fetch_impl(conn, engine, cmd, false);
}

pub(super) fn uid_fetch(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    fetch_impl(conn, engine, cmd, true);
}

fn fetch_params(args: &[Node]) -> Result<Vec<Atom>, String> {
    match args[1] {
        Node::Atom(ref atom) => {
            let expanded: &[&str] = match atom.value.to_ascii_uppercase().as_str() {
                "ALL" => &["FLAGS", "INTERNALDATE", "RFC822.SIZE", "ENVELOPE"],
                "FAST" => &["FLAGS", "INTERNALDATE", "RFC822.SIZE"],
                "FULL" => &[
                    "FLAGS",
                    "INTERNALDATE",
                    "RFC822.SIZE",
                    "ENVELOPE",
                    "BODY",
                ],
                _ => return Ok(vec![atom.clone()]),
            };
            Ok(expanded
                .iter()
                .map(|&name| Atom {
                    value: name.to_owned(),
                    section: None,
                    partial: None,
                })
                .collect())
        },
        Node::List(ref items) => {
            let mut params = Vec::new();
            for (ix, item) in items.iter().enumerate() {
                match item.as_atom() {
                    Some(atom) => params.push(atom.clone()),
                    None => {
                        return Err(format!(
                            "Invalid FETCH argument #{}",
                            ix + 1
                        ))
                    },
                }
            }
            Ok(params)
        },
        _ => unreachable!("validated by caller"),
    }
}

fn fetch_impl(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
    by_uid: bool,
) {
    let label = if by_uid { "UID FETCH" } else { "FETCH" };
    let shape_ok = cmd
        .args
        .as_ref()
        .filter(|args| 2 == args.len())
        .filter(|args| args[0].is_atom())
        .filter(|args| {
            args[1].is_atom() || args[1].as_list().is_some()
        })
        .is_some();
    if !shape_ok {
        return done(
            conn,
            engine,
            cmd,
            Cond::Bad,
            "FETCH expects sequence set and message item names",
        );
    }

    let path = match require_selected(conn, engine, cmd, "Select mailbox first")
    {
        Some(path) => path,
        None => return,
    };

    let args = cmd.args.clone().unwrap();
    let spec = stringish(&args[0]).unwrap();
    let mut params = match fetch_params(&args) {
        Ok(params) => params,
        Err(quip) => return done(conn, engine, cmd, Cond::Bad, quip),
    };

    let messages = if by_uid {
        folder_messages(conn, &path)
    } else {
        sequence_source(conn, &path)
    };
    let range = message_range(&messages, &spec, by_uid);

    let mut flags_requested = false;
    let mut uid_requested = false;
    let mut force_seen = false;
    for param in &params {
        let upper = param.value.to_ascii_uppercase();
        if "FLAGS" == upper {
            flags_requested = true;
        }
        if "UID" == upper {
            uid_requested = true;
        }
        if !engine.read_only {
            if "BODY" == upper && param.section.is_some() {
                force_seen = true;
            } else if "RFC822" == upper || "RFC822.HEADER" == upper {
                force_seen = true;
            }
        }
    }
    // The implicit \Seen mutation must be visible in the same exchange, so
    // the flag list is appended when the client did not ask for it.
    if force_seen && !flags_requested {
        params.push(Atom {
            value: "FLAGS".to_owned(),
            section: None,
            partial: None,
        });
    }
    if by_uid && !uid_requested {
        params.push(Atom {
            value: "UID".to_owned(),
            section: None,
            partial: None,
        });
    }

    let registry = conn.server.registry();
    for (seq, message_ref) in range {
        if !accept_fetch(registry, engine, &message_ref, cmd, seq) {
            continue;
        }

        if force_seen {
            let mut message = message_ref.lock().unwrap();
            if !message.has_flag("\\Seen") {
                message.flags.push("\\Seen".to_owned());
            }
        }

        let mut response = Vec::new();
        for param in &params {
            let mut query = param.clone();
            let value = {
                let mut message = message_ref.lock().unwrap();
                fetch::fetch_item(
                    &registry.fetch_handlers,
                    &mut message,
                    &mut query,
                )
            };
            let value = match value {
                Ok(value) => value,
                Err(e) => {
                    return done(conn, engine, cmd, Cond::Bad, e.to_string())
                },
            };
            if let Some(ix) =
                query.value.to_ascii_uppercase().find(".PEEK")
            {
                query.value.replace_range(ix..ix + 5, "");
            }
            response.push(Node::Atom(query));
            response.push(value);
        }

        conn.send_response(
            engine,
            Some(&*cmd),
            ResponseEvent::Generic,
            Response::bare(vec![
                Node::num(seq),
                Node::atom("FETCH"),
                Node::list(response),
            ]),
        );
    }

    done(conn, engine, cmd, Cond::Ok, format!("{} Completed", label));
}

fn accept_fetch(
    registry: &Registry,
    engine: &Engine,
    message: &MessageRef,
    cmd: &Command,
    seq: u32,
) -> bool {
    registry
        .fetch_filters
        .iter()
        .all(|filter| filter.accept(engine, message, cmd, seq))
}

// --- STORE ---

pub(super) fn store(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    store_impl(conn, engine, cmd, false);
}

pub(super) fn uid_store(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    store_impl(conn, engine, cmd, true);
}

fn store_impl(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
    by_uid: bool,
) {
    let label = if by_uid { "UID STORE" } else { "STORE" };
    let shape_ok = cmd
        .args
        .as_ref()
        .filter(|args| 3 == args.len())
        .filter(|args| args[0].is_atom())
        .filter(|args| args[1].is_atom())
        .filter(|args| {
            atom_or_quoted(&args[2]) || args[2].as_list().is_some()
        })
        .is_some();
    if !shape_ok {
        return done(
            conn,
            engine,
            cmd,
            Cond::Bad,
            format!("{} expects sequence set, item name and item value", label),
        );
    }

    let path = match require_selected(conn, engine, cmd, "Select mailbox first")
    {
        Some(path) => path,
        None => return,
    };

    // Refuse to renumber under the client's feet.
    if !by_uid && conn.has_pending_expunge() {
        return done(
            conn,
            engine,
            cmd,
            Cond::No,
            "Pending EXPUNGE messages, can not store",
        );
    }

    let args = cmd.args.clone().unwrap();
    let spec = stringish(&args[0]).unwrap();
    let item_name = stringish(&args[1]).unwrap().to_ascii_uppercase();
    let values: Vec<Node> = match args[2] {
        Node::List(ref items) => items.clone(),
        ref single => vec![single.clone()],
    };

    for (ix, value) in values.iter().enumerate() {
        if !atom_or_quoted(value) {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                format!("Invalid item value #{}", ix + 1),
            );
        }
    }
    let value_flags: Vec<String> =
        values.iter().filter_map(stringish).collect();

    let messages = if by_uid {
        folder_messages(conn, &path)
    } else {
        sequence_source(conn, &path)
    };
    let range = message_range(&messages, &spec, by_uid);

    let (system_flags, permanent_flags, allow_permanent) = {
        let store = conn.server.store().lock().unwrap();
        let folder = store.resolve(&path);
        (
            store.system_flags.clone(),
            folder.map(|f| f.permanent_flags.clone()).unwrap_or_default(),
            folder.map(|f| f.allow_permanent_flags).unwrap_or(true),
        )
    };

    let registry = conn.server.registry();
    let op = flag_ops::parse_store_item(&item_name);
    let custom = registry.store_handlers.get(&item_name).cloned();

    let mut affected = Vec::new();
    let mut broadcasts = Vec::new();
    for (seq, message_ref) in range {
        let rejected = registry
            .store_filters
            .iter()
            .any(|filter| !filter.accept(engine, &message_ref, cmd, seq));
        if rejected {
            continue;
        }

        if let Some(ref handler) = custom {
            let mut message = message_ref.lock().unwrap();
            if let Err(e) = handler.store(&mut message, &values, seq) {
                drop(message);
                return done(conn, engine, cmd, Cond::Bad, e.to_string());
            }
            affected.push(message.uid);
            continue;
        }

        let op = match op {
            Some(op) => op,
            None => {
                return done(
                    conn,
                    engine,
                    cmd,
                    Cond::Bad,
                    format!("Invalid STORE argument {}", item_name),
                )
            },
        };

        let (uid, new_flags) = {
            let mut message = message_ref.lock().unwrap();
            if let Err(e) = flag_ops::apply_store(
                &mut message,
                op,
                &value_flags,
                &system_flags,
                &permanent_flags,
                allow_permanent,
            ) {
                drop(message);
                return done(conn, engine, cmd, Cond::Bad, e.to_string());
            }
            (message.uid, message.flags.clone())
        };
        affected.push(uid);

        let mut update = vec![Node::atom("FLAGS"), flags_list(&new_flags)];
        if by_uid {
            update.push(Node::atom("UID"));
            update.push(Node::num(uid));
        }
        let update = Response::bare(vec![
            Node::num(seq),
            Node::atom("FETCH"),
            Node::list(update),
        ]);

        if !op.silent {
            conn.send_response(
                engine,
                Some(&*cmd),
                ResponseEvent::FlagUpdate { uid },
                update.clone(),
            );
        }

        // Other sessions observing this folder hear about the change
        // regardless of the silent variant.
        broadcasts.push(Notification {
            folder: Some(path.clone()),
            response: update,
            snapshot: None,
            ignore: Some(conn.id),
        });
    }

    conn.server.notify(broadcasts);
    done_with_event(
        conn,
        engine,
        cmd,
        Cond::Ok,
        format!("{} completed", label),
        ResponseEvent::StoreComplete { uids: affected },
    );
}

// --- SEARCH ---

pub(super) fn search(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    search_impl(conn, engine, cmd, false);
}

pub(super) fn uid_search(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    search_impl(conn, engine, cmd, true);
}

/// Adapter exposing registry-installed search handlers to the query engine.
struct RegistrySearch<'a> {
    registry: &'a Registry,
    engine: &'a Engine,
}

impl<'a> ExtSearch for RegistrySearch<'a> {
    fn arity(&self, key: &str) -> Option<usize> {
        self.registry
            .search_handlers
            .get(key)
            .map(|handler| handler.arity())
    }

    fn matches(
        &self,
        key: &str,
        message: &MessageRef,
        seq: u32,
        args: &[String],
    ) -> bool {
        self.registry
            .search_handlers
            .get(key)
            .map(|handler| handler.matches(self.engine, message, seq, args))
            .unwrap_or(false)
    }
}

fn search_impl(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
    by_uid: bool,
) {
    let label = if by_uid { "UID SEARCH" } else { "SEARCH" };
    let path = match require_selected(conn, engine, cmd, "Select mailbox first")
    {
        Some(path) => path,
        None => return,
    };

    let args = match cmd.args.as_ref().filter(|args| !args.is_empty()) {
        Some(args) => args.clone(),
        None => {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                format!("{} expects search criteria, empty query given", label),
            )
        },
    };

    let mut params = Vec::new();
    for (ix, arg) in args.iter().enumerate() {
        match stringish(arg) {
            Some(value) => params.push(value),
            None => {
                return done(
                    conn,
                    engine,
                    cmd,
                    Cond::Bad,
                    format!("Invalid search criteria argument #{}", ix + 1),
                )
            },
        }
    }

    let messages = if by_uid {
        folder_messages(conn, &path)
    } else {
        sequence_source(conn, &path)
    };

    let result = {
        let adapter = RegistrySearch {
            registry: conn.server.registry(),
            engine,
        };
        search::search(&messages, &params, &adapter)
    };
    let result = match result {
        Ok(result) => result,
        Err(e) => return done(conn, engine, cmd, Cond::No, e.to_string()),
    };

    if !result.matched.is_empty() {
        let numbers: Vec<Node> = result
            .matched
            .iter()
            .map(|message| {
                let uid = message.lock().unwrap().uid;
                if by_uid {
                    Node::num(uid)
                } else {
                    Node::num(result.numbers[&uid])
                }
            })
            .collect();
        conn.send_response(
            engine,
            Some(&*cmd),
            ResponseEvent::Generic,
            Response::untagged("SEARCH", numbers),
        );
    }

    done(conn, engine, cmd, Cond::Ok, format!("{} completed", label));
}

// --- COPY ---

pub(super) fn copy(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    copy_impl(conn, engine, cmd, false);
}

pub(super) fn uid_copy(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    copy_impl(conn, engine, cmd, true);
}

fn copy_impl(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
    by_uid: bool,
) {
    let label = if by_uid { "UID COPY" } else { "COPY" };
    let shape_ok = cmd
        .args
        .as_ref()
        .filter(|args| 2 == args.len())
        .filter(|args| args[0].is_atom())
        .filter(|args| atom_or_quoted(&args[1]))
        .is_some();
    if !shape_ok {
        return done(
            conn,
            engine,
            cmd,
            Cond::Bad,
            format!("{} expects sequence set and a mailbox name", label),
        );
    }

    let path = match require_selected(conn, engine, cmd, "Select mailbox first")
    {
        Some(path) => path,
        None => return,
    };

    let args = cmd.args.clone().unwrap();
    let spec = stringish(&args[0]).unwrap();
    let target = stringish(&args[1]).unwrap();

    let message_handlers =
        conn.server.registry().message_handlers.clone();
    let notifications = {
        let mut store = conn.server.store().lock().unwrap();
        if store.resolve(&target).is_none() {
            None
        } else {
            let source = store
                .resolve(&path)
                .map(|folder| folder.messages.clone())
                .unwrap_or_default();
            let range = message_range(&source, &spec, by_uid);

            let mut notifications = Vec::new();
            for (_, message_ref) in range {
                let (flags, internal_date, raw) = {
                    let message = message_ref.lock().unwrap();
                    (
                        message.flags.clone(),
                        message.internal_date.clone(),
                        message.raw.to_vec(),
                    )
                };
                match store.append(
                    &target,
                    flags,
                    Some(internal_date),
                    raw,
                    &message_handlers,
                    Some(conn.id),
                ) {
                    Ok((_, notification)) => {
                        notifications.push(notification)
                    },
                    Err(_) => break,
                }
            }
            Some(notifications)
        }
    };

    match notifications {
        None => done(
            conn,
            engine,
            cmd,
            Cond::No,
            "Target mailbox does not exist",
        ),
        Some(notifications) => {
            conn.server.notify(notifications);
            done(conn, engine, cmd, Cond::Ok, format!("{} Completed", label));
        },
    }
}

// --- APPEND ---

pub(super) fn append(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    if !matches!(
        engine.state,
        SessionState::Authenticated | SessionState::Selected
    ) {
        return done(conn, engine, cmd, Cond::Bad, "Log in first");
    }

    let mut args = cmd.args.clone().unwrap_or_default();
    if args.len() < 2 || args.len() > 4 {
        return done(
            conn,
            engine,
            cmd,
            Cond::Bad,
            "APPEND takes 2 - 4 arguments",
        );
    }

    let path_node = args.remove(0);
    let raw_node = args.pop().unwrap();
    let flags_node = match args.first() {
        Some(Node::List(..)) => Some(args.remove(0)),
        _ => None,
    };
    let date_node = if args.is_empty() {
        None
    } else {
        Some(args.remove(0))
    };

    let path = match path_node {
        ref node if atom_or_quoted(node) => stringish(node).unwrap(),
        _ => {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                "Invalid mailbox argument",
            )
        },
    };
    {
        let store = conn.server.store().lock().unwrap();
        if store.resolve(&path).is_none() {
            drop(store);
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                "Invalid mailbox argument",
            );
        }
    }

    let raw = match raw_node {
        Node::Literal(raw) => raw,
        _ => {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                "Invalid message source argument",
            )
        },
    };

    let mut flags = Vec::new();
    if let Some(Node::List(items)) = flags_node {
        for item in &items {
            if !atom_or_quoted(item) {
                return done(
                    conn,
                    engine,
                    cmd,
                    Cond::Bad,
                    "Invalid flags argument",
                );
            }
            flags.push(stringish(item).unwrap());
        }
    }

    let internal_date = match date_node {
        None => None,
        Some(Node::Str(date)) => {
            if !crate::store::Store::valid_internal_date(&date) {
                return done(
                    conn,
                    engine,
                    cmd,
                    Cond::Bad,
                    "Invalid internaldate argument",
                );
            }
            Some(date)
        },
        Some(_) => {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                "Invalid internaldate argument",
            )
        },
    };

    let message_handlers =
        conn.server.registry().message_handlers.clone();
    let appended = {
        let mut store = conn.server.store().lock().unwrap();
        store.append(
            &path,
            flags,
            internal_date,
            raw,
            &message_handlers,
            Some(conn.id),
        )
    };
    match appended {
        Ok((_, notification)) => {
            conn.server.notify(vec![notification]);
            done(conn, engine, cmd, Cond::Ok, "APPEND Completed");
        },
        Err(e) => done(conn, engine, cmd, Cond::Bad, e.to_string()),
    }
}

// --- EXPUNGE / CLOSE ---

pub(super) fn expunge(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    if cmd.args.is_some() {
        return done(
            conn,
            engine,
            cmd,
            Cond::Bad,
            "EXPUNGE does not take any arguments",
        );
    }
    let path = match require_selected(conn, engine, cmd, "Select mailbox first")
    {
        Some(path) => path,
        None => return,
    };

    let notifications = {
        let mut store = conn.server.store().lock().unwrap();
        store.expunge_deleted(&path, conn.id, false, true)
    };
    conn.server.notify(notifications);

    done(conn, engine, cmd, Cond::Ok, "EXPUNGE Completed");
}

pub(super) fn close(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    if cmd.args.is_some() {
        return done(
            conn,
            engine,
            cmd,
            Cond::Bad,
            "CLOSE does not take any arguments",
        );
    }
    let path =
        match require_selected(conn, engine, cmd, "Select a mailbox first") {
            Some(path) => path,
            None => return,
        };

    let notifications = {
        let mut store = conn.server.store().lock().unwrap();
        store.expunge_deleted(&path, conn.id, true, false)
    };
    conn.server.notify(notifications);

    done(conn, engine, cmd, Cond::Ok, "Mailbox closed");
    engine.state = SessionState::Authenticated;
    engine.selected = None;
    conn.sync_shadow(engine);
}
