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

//! The base command handler set and the helpers they share.
//!
//! Handlers follow one contract: validate argument shape (malformed shape is
//! an immediate tagged BAD with no side effects), validate session state,
//! perform the operation, emit untagged data, then exactly one tagged
//! completion.

mod any;
mod mailboxes;
mod messages;

use std::sync::Arc;

use crate::extensions::{Registry, ResponseEvent};
use crate::session::{Connection, Engine};
use crate::syntax::{Command, Cond, Node, Response};

/// Install the base IMAP4rev1 command set.
pub fn install(registry: &mut Registry) {
    registry.set_command_handler("CAPABILITY", Arc::new(any::capability));
    registry.set_command_handler("LOGIN", Arc::new(any::login));
    registry.set_command_handler("LOGOUT", Arc::new(any::logout));
    registry.set_command_handler("NOOP", Arc::new(any::noop));
    registry.set_command_handler("CHECK", Arc::new(any::check));

    registry.set_command_handler("LIST", Arc::new(mailboxes::list));
    registry.set_command_handler("LSUB", Arc::new(mailboxes::lsub));
    registry.set_command_handler("STATUS", Arc::new(mailboxes::status));
    registry.set_command_handler("SELECT", Arc::new(mailboxes::select));
    registry.set_command_handler("EXAMINE", Arc::new(mailboxes::examine));

    registry.set_command_handler("FETCH", Arc::new(messages::fetch));
    registry.set_command_handler("UID FETCH", Arc::new(messages::uid_fetch));
    registry.set_command_handler("STORE", Arc::new(messages::store));
    registry.set_command_handler("UID STORE", Arc::new(messages::uid_store));
    registry.set_command_handler("SEARCH", Arc::new(messages::search));
    registry
        .set_command_handler("UID SEARCH", Arc::new(messages::uid_search));
    registry.set_command_handler("COPY", Arc::new(messages::copy));
    registry.set_command_handler("UID COPY", Arc::new(messages::uid_copy));
    registry.set_command_handler("APPEND", Arc::new(messages::append));
    registry.set_command_handler("EXPUNGE", Arc::new(messages::expunge));
    registry.set_command_handler("CLOSE", Arc::new(messages::close));
}

/// Send the tagged completion for `cmd`.
pub(crate) fn done(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &Command,
    cond: Cond,
    quip: impl Into<String>,
) {
    done_with_event(conn, engine, cmd, cond, quip, ResponseEvent::Generic);
}

pub(crate) fn done_with_event(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &Command,
    cond: Cond,
    quip: impl Into<String>,
    event: ResponseEvent,
) {
    let response = Response::cond(cmd.tag.clone(), cond, quip);
    conn.send_response(engine, Some(cmd), event, response);
}

/// Whether `node` is one of the three interchangeable string carriers.
pub(crate) fn stringish(node: &Node) -> Option<String> {
    node.string_value().map(|v| v.into_owned())
}

/// Whether `node` is an atom or quoted string (but not a literal).
pub(crate) fn atom_or_quoted(node: &Node) -> bool {
    matches!(*node, Node::Atom(..) | Node::Str(..))
}
