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

//! Mailbox-level commands: LIST, LSUB, STATUS, SELECT, EXAMINE.

use std::sync::Arc;

use log::info;

use super::{done, stringish};
use crate::extensions::ResponseEvent;
use crate::session::{
    flags_list, section_ok, Connection, Engine, SessionState,
};
use crate::syntax::{Command, Cond, Node, Response};

fn in_authenticated_state(engine: &Engine) -> bool {
    matches!(
        engine.state,
        SessionState::Authenticated | SessionState::Selected
    )
}

/// The per-folder data LIST and LSUB emit, copied out while the store lock
/// is held.
struct ListItem {
    flags: Vec<String>,
    separator: String,
    path: String,
    special_use: Vec<String>,
    subscribed: bool,
}

fn collect_items(
    conn: &Arc<Connection>,
    reference: &str,
    pattern: &str,
) -> Vec<ListItem> {
    let store = conn.server.store().lock().unwrap();
    store
        .match_folders(reference, pattern)
        .into_iter()
        .map(|folder| ListItem {
            flags: folder.flags.clone(),
            separator: store.separator_of(&folder.namespace).to_owned(),
            path: folder.path.clone(),
            special_use: folder.special_use.clone(),
            subscribed: folder.subscribed,
        })
        .collect()
}

fn list_impl(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
    lsub: bool,
) {
    let label = if lsub { "LSUB" } else { "LIST" };
    let parsed = cmd.args.as_ref().and_then(|args| {
        if 2 != args.len() {
            return None;
        }
        Some((stringish(&args[0])?, stringish(&args[1])?))
    });
    let (reference, pattern) = match parsed {
        Some(parsed) => parsed,
        None => {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                format!("{} expects 2 string arguments", label),
            )
        },
    };

    if !in_authenticated_state(engine) {
        return done(conn, engine, cmd, Cond::Bad, "Log in first");
    }

    if !lsub && pattern.is_empty() {
        // An empty pattern asks only for the hierarchy separator.
        let separator = {
            let store = conn.server.store().lock().unwrap();
            store.separator_of(store.reference_namespace()).to_owned()
        };
        conn.send_response(
            engine,
            Some(&*cmd),
            ResponseEvent::Generic,
            Response::untagged(
                "LIST",
                vec![
                    Node::list(vec![Node::atom("\\Noselect")]),
                    Node::qstr(separator),
                    Node::qstr(""),
                ],
            ),
        );
        return done(conn, engine, cmd, Cond::Ok, "Completed");
    }

    for item in collect_items(conn, &reference, &pattern) {
        if lsub && !item.subscribed {
            continue;
        }
        let event = if lsub {
            ResponseEvent::LsubItem {
                special_use: item.special_use,
                special_use_only: cmd.modifiers.list_special_use_only,
                special_use_flags: cmd.modifiers.list_special_use_flags,
            }
        } else {
            ResponseEvent::ListItem {
                special_use: item.special_use,
                special_use_only: cmd.modifiers.list_special_use_only,
                special_use_flags: cmd.modifiers.list_special_use_flags,
            }
        };
        conn.send_response(
            engine,
            Some(&*cmd),
            event,
            Response::untagged(
                label,
                vec![
                    flags_list(&item.flags),
                    Node::qstr(item.separator),
                    Node::qstr(item.path),
                ],
            ),
        );
    }

    done(conn, engine, cmd, Cond::Ok, "Completed");
}

pub(super) fn list(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    list_impl(conn, engine, cmd, false);
}

pub(super) fn lsub(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    list_impl(conn, engine, cmd, true);
}

pub(super) fn status(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    let valid = cmd
        .args
        .as_ref()
        .filter(|args| 2 == args.len())
        .filter(|args| args[0].string_value().is_some())
        .filter(|args| {
            args[1].as_list().map(|l| !l.is_empty()).unwrap_or(false)
        })
        .is_some();
    if !valid {
        return done(
            conn,
            engine,
            cmd,
            Cond::Bad,
            "STATUS expects mailbox argument and a list of status items",
        );
    }

    if !in_authenticated_state(engine) {
        return done(conn, engine, cmd, Cond::Bad, "Log in first");
    }

    let args = cmd.args.as_ref().unwrap();
    let path = stringish(&args[0]).unwrap();
    let items = args[1].as_list().unwrap().to_vec();

    struct StatusData {
        messages: u32,
        recent: u32,
        unseen: u32,
        uidnext: u32,
        uidvalidity: u32,
        highest_modseq: u64,
    }
    let data = {
        let store = conn.server.store().lock().unwrap();
        match store.resolve(&path) {
            Some(folder) if folder.is_selectable() => {
                let status = store.status(folder);
                Some(StatusData {
                    messages: folder.messages.len() as u32,
                    recent: status.flag_count("\\Recent"),
                    unseen: status.unseen,
                    uidnext: folder.uidnext,
                    uidvalidity: folder.uidvalidity,
                    highest_modseq: folder.highest_modseq,
                })
            },
            _ => None,
        }
    };
    let data = match data {
        Some(data) => data,
        None => {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                "Invalid mailbox name",
            )
        },
    };

    let allowed = &conn.server.registry().allowed_status;
    let mut response = Vec::new();
    for (ix, item) in items.iter().enumerate() {
        let name = match item.as_atom() {
            Some(atom) => atom.value.to_ascii_uppercase(),
            None => String::new(),
        };
        if name.is_empty() || !allowed.iter().any(|a| a == &name) {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                format!("Invalid status element ({})", ix + 1),
            );
        }

        response.push(Node::atom(name.clone()));
        response.push(match name.as_str() {
            "MESSAGES" => Node::num(data.messages),
            "RECENT" => Node::num(data.recent),
            "UIDNEXT" => Node::num(data.uidnext),
            "UIDVALIDITY" => Node::num(data.uidvalidity),
            "UNSEEN" => Node::num(data.unseen),
            "HIGHESTMODSEQ" => Node::num(data.highest_modseq as u32),
            _ => Node::num(0),
        });
    }

    conn.send_response(
        engine,
        Some(&*cmd),
        ResponseEvent::Generic,
        Response::untagged(
            "STATUS",
            vec![Node::atom(path), Node::list(response)],
        ),
    );
    done(conn, engine, cmd, Cond::Ok, "Status completed");
}

struct SelectData {
    path: String,
    exists: u32,
    recent: u32,
    uidvalidity: u32,
    uidnext: u32,
    permanent_flags: Vec<String>,
    allow_permanent_flags: bool,
}

fn select_impl(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
    read_only: bool,
) {
    let label = if read_only { "EXAMINE" } else { "SELECT" };
    let path = cmd
        .args
        .as_ref()
        .filter(|args| 1 == args.len())
        .and_then(|args| stringish(&args[0]));
    let path = match path {
        Some(path) => path,
        None => {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                format!("{} expects 1 mailbox argument", label),
            )
        },
    };

    if !in_authenticated_state(engine) {
        return done(conn, engine, cmd, Cond::Bad, "Log in first");
    }

    let data = {
        let store = conn.server.store().lock().unwrap();
        match store.resolve(&path) {
            Some(folder) if folder.is_selectable() => {
                let status = store.status(folder);
                Some(SelectData {
                    path: folder.path.clone(),
                    exists: folder.messages.len() as u32,
                    recent: status.flag_count("\\Recent"),
                    uidvalidity: folder.uidvalidity,
                    uidnext: folder.uidnext,
                    permanent_flags: status.permanent_flags,
                    allow_permanent_flags: folder.allow_permanent_flags,
                })
            },
            _ => None,
        }
    };
    let data = match data {
        Some(data) => data,
        None => {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                "Invalid mailbox name",
            )
        },
    };

    engine.state = SessionState::Selected;
    engine.selected = Some(data.path.clone());
    engine.read_only = read_only;
    conn.clear_notifications();
    conn.sync_shadow(engine);
    info!("[sess{}] {} {}", conn.id, label, data.path);

    let mut permanent: Vec<Node> = data
        .permanent_flags
        .iter()
        .map(|f| Node::atom(f.clone()))
        .collect();

    conn.send_response(
        engine,
        Some(&*cmd),
        ResponseEvent::Generic,
        Response::untagged(
            "FLAGS",
            vec![Node::list(permanent.clone())],
        ),
    );

    if data.allow_permanent_flags {
        permanent.push(Node::text("\\*"));
    }
    conn.send_response(
        engine,
        Some(&*cmd),
        ResponseEvent::Generic,
        section_ok(vec![
            Node::atom("PERMANENTFLAGS"),
            Node::list(permanent),
        ]),
    );

    conn.send_response(
        engine,
        Some(&*cmd),
        ResponseEvent::Generic,
        Response::bare(vec![Node::num(data.exists), Node::atom("EXISTS")]),
    );
    conn.send_response(
        engine,
        Some(&*cmd),
        ResponseEvent::Generic,
        Response::bare(vec![Node::num(data.recent), Node::atom("RECENT")]),
    );
    conn.send_response(
        engine,
        Some(&*cmd),
        ResponseEvent::Generic,
        section_ok(vec![
            Node::atom("UIDVALIDITY"),
            Node::num(data.uidvalidity),
        ]),
    );
    conn.send_response(
        engine,
        Some(&*cmd),
        ResponseEvent::Generic,
        section_ok(vec![Node::atom("UIDNEXT"), Node::num(data.uidnext)]),
    );

    let mode = if read_only { "READ-ONLY" } else { "READ-WRITE" };
    let response = Response {
        tag: cmd.tag.clone(),
        verb: Some("OK".to_owned()),
        args: vec![
            Node::section(vec![Node::atom(mode)]),
            Node::text("Completed"),
        ],
    };
    conn.send_response(
        engine,
        Some(&*cmd),
        ResponseEvent::SelectComplete,
        response,
    );
}

pub(super) fn select(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    select_impl(conn, engine, cmd, false);
}

pub(super) fn examine(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    select_impl(conn, engine, cmd, true);
}
