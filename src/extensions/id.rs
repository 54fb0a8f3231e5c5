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

//! ID: client/server implementation identification exchange. The server
//! side of the list comes from configuration.

use std::sync::Arc;

use super::{Registry, ResponseEvent};
use crate::session::handlers::done;
use crate::session::{Connection, Engine};
use crate::syntax::{Command, Cond, Node, Response};

pub(super) fn install(registry: &mut Registry) {
    registry.register_capability("ID");
    registry.set_command_handler("ID", Arc::new(id));
}

fn id(conn: &Arc<Connection>, engine: &mut Engine, cmd: &mut Command) {
    let args = match cmd.args.as_ref() {
        Some(args) if 1 == args.len() => args,
        _ => {
            return done(conn, engine, cmd, Cond::Bad, "ID expects 1 attribute")
        },
    };

    // The client's list is validated but otherwise only logged.
    match args[0] {
        Node::Nil => (),
        Node::List(ref items) if 0 == items.len() % 2 => {
            for (ix, item) in items.iter().enumerate() {
                let valid = if 0 == ix % 2 {
                    item.is_string()
                } else {
                    item.is_string() || matches!(*item, Node::Nil)
                };
                if !valid {
                    return done(
                        conn,
                        engine,
                        cmd,
                        Cond::Bad,
                        "ID expects valid parameter list",
                    );
                }
            }
        },
        _ => {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                "ID expects valid parameter list",
            )
        },
    }

    let server_list = match conn.server.id_info {
        Some(ref pairs) if !pairs.is_empty() => {
            let mut items = Vec::new();
            for (key, value) in pairs {
                items.push(Node::qstr(key.clone()));
                items.push(Node::qstr(value.clone()));
            }
            Node::list(items)
        },
        _ => Node::Nil,
    };

    conn.send_response(
        engine,
        Some(&*cmd),
        ResponseEvent::Generic,
        Response::untagged("ID", vec![server_list]),
    );
    done(conn, engine, cmd, Cond::Ok, "ID command completed");
}
