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

//! CONDSTORE: a per-mailbox modification sequence.
//!
//! Messages are stamped on append and re-stamped on every flag mutation;
//! `FETCH ... (CHANGEDSINCE n)` filters to messages touched after `n`, and
//! `STORE ... (UNCHANGEDSINCE n)` skips messages touched since. The whole
//! thing attaches through the bus: a message handler for stamping, command
//! wrappers for the modifier syntax, a fetch item, fetch/store filters, and
//! an output hook that bumps modseq when a STORE completes and reports
//! HIGHESTMODSEQ on select.

use std::sync::Arc;

use super::{
    FetchFilter, FetchItemHandler, HookOutput, MessageHandler, OutputHook,
    Registry, ResponseEvent, StoreFilter,
};
use crate::server::Server;
use crate::session::{Engine, SessionView};
use crate::store::model::{Folder, Message, MessageRef};
use crate::support::error::Error;
use crate::syntax::{Atom, Command, Cond, Node, Response};

pub(super) fn install(registry: &mut Registry) {
    registry.register_capability("CONDSTORE");
    registry.enable_available.push("CONDSTORE".to_owned());
    registry.allow_status_item("HIGHESTMODSEQ");

    registry.message_handlers.push(Arc::new(StampModseq));
    registry
        .fetch_handlers
        .insert("MODSEQ".to_owned(), Arc::new(ModseqItem));
    registry.fetch_filters.push(Arc::new(ChangedSince));
    registry.store_filters.push(Arc::new(UnchangedSince));
    registry.output_hooks.push(Arc::new(CondstoreHook));

    wrap_select(registry, "SELECT");
    wrap_select(registry, "EXAMINE");
    wrap_close(registry);
    wrap_modifier(registry, "FETCH", 2, "CHANGEDSINCE", true);
    wrap_modifier(registry, "UID FETCH", 2, "CHANGEDSINCE", true);
    wrap_modifier(registry, "STORE", 1, "UNCHANGEDSINCE", false);
    wrap_modifier(registry, "UID STORE", 1, "UNCHANGEDSINCE", false);
}

struct StampModseq;

impl MessageHandler for StampModseq {
    fn on_message(&self, folder: &mut Folder, message: &mut Message) {
        if message.modseq.is_none() {
            folder.highest_modseq += 1;
            message.modseq = Some(folder.highest_modseq);
        }
    }
}

struct ModseqItem;

impl FetchItemHandler for ModseqItem {
    fn fetch(
        &self,
        message: &mut Message,
        _query: &mut Atom,
    ) -> Result<Node, Error> {
        // MODSEQ renders as a one-element list.
        Ok(Node::list(vec![Node::num(
            message.modseq.unwrap_or(0) as u32,
        )]))
    }
}

struct ChangedSince;

impl FetchFilter for ChangedSince {
    fn accept(
        &self,
        _engine: &Engine,
        message: &MessageRef,
        command: &Command,
        _seq: u32,
    ) -> bool {
        match command.modifiers.changed_since {
            Some(changed_since) => message
                .lock()
                .unwrap()
                .modseq
                .map(|modseq| modseq > changed_since)
                .unwrap_or(false),
            None => true,
        }
    }
}

struct UnchangedSince;

impl StoreFilter for UnchangedSince {
    fn accept(
        &self,
        _engine: &Engine,
        message: &MessageRef,
        command: &Command,
        _seq: u32,
    ) -> bool {
        match command.modifiers.unchanged_since {
            Some(unchanged_since) => message
                .lock()
                .unwrap()
                .modseq
                .map(|modseq| modseq <= unchanged_since)
                .unwrap_or(false),
            None => true,
        }
    }
}

fn wrap_select(registry: &mut Registry, verb: &str) {
    let previous = registry
        .command_handler(verb)
        .expect("wrapping unregistered command");
    registry.set_command_handler(
        verb,
        Arc::new(move |conn, engine, cmd| {
            engine.session_condstore = strip_condstore_option(cmd);
            previous(conn, engine, cmd);
        }),
    );
}

fn wrap_close(registry: &mut Registry) {
    let previous = registry
        .command_handler("CLOSE")
        .expect("wrapping unregistered command");
    registry.set_command_handler(
        "CLOSE",
        Arc::new(move |conn, engine, cmd| {
            engine.session_condstore = false;
            previous(conn, engine, cmd);
        }),
    );
}

/// Pull `(CONDSTORE)` out of the SELECT/EXAMINE argument list.
fn strip_condstore_option(cmd: &mut Command) -> bool {
    let args = match cmd.args.as_mut() {
        Some(args) => args,
        None => return false,
    };
    let mut found = false;
    let mut remove_arg = false;
    if let Some(Node::List(items)) = args.get_mut(1) {
        if let Some(ix) = items.iter().position(|item| {
            item.as_atom()
                .map(|a| a.value.eq_ignore_ascii_case("CONDSTORE"))
                .unwrap_or(false)
        }) {
            items.remove(ix);
            found = true;
            remove_arg = items.is_empty();
        }
    }
    if remove_arg {
        args.remove(1);
    }
    cmd.modifiers.condstore_option = found;
    found
}

/// Wrap a FETCH/STORE-family verb to strip its `(NAME value)` modifier into
/// the command's typed side-band.
fn wrap_modifier(
    registry: &mut Registry,
    verb: &str,
    index: usize,
    name: &'static str,
    is_fetch: bool,
) {
    let previous = registry
        .command_handler(verb)
        .expect("wrapping unregistered command");
    registry.set_command_handler(
        verb,
        Arc::new(move |conn, engine, cmd| {
            match extract_modifier(cmd, index, name) {
                Ok(None) => (),
                Ok(Some(value)) => {
                    if is_fetch {
                        cmd.modifiers.changed_since = Some(value);
                    } else {
                        cmd.modifiers.unchanged_since = Some(value);
                    }
                },
                Err(()) => {
                    let response = Response::cond(
                        cmd.tag.clone(),
                        Cond::Bad,
                        format!(
                            "Invalid syntax for {}, number expected",
                            name
                        ),
                    );
                    conn.send_response(
                        engine,
                        Some(&*cmd),
                        ResponseEvent::Generic,
                        response,
                    );
                    return;
                },
            }
            previous(conn, engine, cmd);
        }),
    );
}

fn extract_modifier(
    cmd: &mut Command,
    index: usize,
    name: &str,
) -> Result<Option<u64>, ()> {
    let args = match cmd.args.as_mut() {
        Some(args) => args,
        None => return Ok(None),
    };

    let mut raw = None;
    let mut remove_arg = false;
    if let Some(Node::List(items)) = args.get_mut(index) {
        let position = (0..items.len()).step_by(2).find(|&ix| {
            items[ix]
                .as_atom()
                .map(|a| a.value.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        });
        if let Some(ix) = position {
            if ix + 1 < items.len() {
                let value = items.remove(ix + 1);
                items.remove(ix);
                raw = Some(value);
                remove_arg = items.is_empty();
            }
        }
    }
    if remove_arg {
        args.remove(index);
    }

    match raw {
        None => Ok(None),
        Some(node) => {
            let value = node
                .string_value()
                .and_then(|v| v.parse::<u64>().ok())
                .ok_or(())?;
            Ok(Some(value))
        },
    }
}

struct CondstoreHook;

impl OutputHook for CondstoreHook {
    fn on_response(
        &self,
        server: &Arc<Server>,
        session: &SessionView,
        event: &ResponseEvent,
        response: &mut Response,
        out: &mut HookOutput,
    ) {
        match *event {
            // Flag mutations bump the mailbox's highest modseq as the STORE
            // completes.
            ResponseEvent::StoreComplete { ref uids } if !uids.is_empty() => {
                let path = match session.selected {
                    Some(ref path) => path,
                    None => return,
                };
                let mut store = server.store().lock().unwrap();
                if let Some(folder) = store.resolve_mut(path) {
                    for &uid in uids {
                        folder.highest_modseq += 1;
                        let modseq = folder.highest_modseq;
                        if let Some(message) = folder
                            .messages
                            .iter()
                            .find(|m| uid == m.lock().unwrap().uid)
                        {
                            message.lock().unwrap().modseq = Some(modseq);
                        }
                    }
                }
            },
            ResponseEvent::SelectComplete => {
                if session.session_condstore {
                    match response.args.last_mut() {
                        Some(Node::Text(text)) => {
                            text.push_str(", CONDSTORE is now enabled");
                        },
                        _ => response
                            .args
                            .push(Node::text("CONDSTORE is now enabled")),
                    }
                }

                let highest = session
                    .selected
                    .as_ref()
                    .and_then(|path| {
                        let store = server.store().lock().unwrap();
                        store.resolve(path).map(|f| f.highest_modseq)
                    })
                    .unwrap_or(0);
                out.side.push((
                    ResponseEvent::Generic,
                    Response {
                        tag: "*".to_owned(),
                        verb: Some("OK".to_owned()),
                        args: vec![Node::section(vec![
                            Node::atom("HIGHESTMODSEQ"),
                            Node::num(highest as u32),
                        ])],
                    },
                ));
            },
            _ => (),
        }
    }
}

