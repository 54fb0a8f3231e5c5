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

//! AUTHENTICATE PLAIN, in both flavours: the bare command followed by a
//! continuation line, and (with SASL-IR) the initial response given inline.
//! The payload is base64 of `authzid NUL authcid NUL password`.

use std::sync::Arc;

use log::info;

use super::{Registry, ResponseEvent};
use crate::session::handlers::done;
use crate::session::{Connection, Engine, SessionState};
use crate::syntax::{Command, Cond, Node, Response};

pub(super) fn install(registry: &mut Registry) {
    registry.register_capability_if(
        "AUTH=PLAIN",
        Arc::new(|engine| SessionState::NotAuthenticated == engine.state),
    );
    registry.set_command_handler("AUTHENTICATE PLAIN", Arc::new(authenticate));
}

fn authenticate(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    if SessionState::NotAuthenticated != engine.state {
        return done(
            conn,
            engine,
            cmd,
            Cond::Bad,
            "Already authenticated, identity change not allowed",
        );
    }

    match cmd.args {
        // Old style: prompt for the payload on a continuation line.
        None => {
            let tag = cmd.tag.clone();
            engine.input_handler =
                Some(Box::new(move |conn, engine, line| {
                    let payload = String::from_utf8_lossy(line).into_owned();
                    finish(conn, engine, &tag, &payload);
                }));
            conn.write_raw(b"+\r\n");
        },
        Some(ref args)
            if 1 == args.len() && matches!(args[0], Node::Atom(..)) =>
        {
            if !conn
                .server
                .registry()
                .capability_active("SASL-IR", engine)
            {
                return done(
                    conn,
                    engine,
                    cmd,
                    Cond::Bad,
                    "SASL-IR must be enabled to send Initial Response \
                     with the request",
                );
            }
            let payload = args[0].string_value().unwrap().into_owned();
            let tag = cmd.tag.clone();
            finish(conn, engine, &tag, &payload);
        },
        Some(_) => {
            done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                "Invalid attributes for AUTHENTICATE PLAIN",
            );
        },
    }
}

fn finish(conn: &Arc<Connection>, engine: &mut Engine, tag: &str, payload: &str) {
    let decoded = base64::decode(payload).unwrap_or_default();
    let decoded = String::from_utf8_lossy(&decoded);
    let mut parts = decoded.split('\x00');
    let _authzid = parts.next().unwrap_or("");
    let username = parts.next().unwrap_or("");
    let password = parts.next().unwrap_or("");

    let valid = conn
        .server
        .users
        .get(username)
        .map(|user| user.password == password)
        .unwrap_or(false);

    let response = if valid {
        engine.state = SessionState::Authenticated;
        info!("[sess{}] Authenticated as {} (PLAIN)", conn.id, username);
        Response::cond(tag, Cond::Ok, "User logged in")
    } else {
        Response::cond(tag, Cond::No, "Login failed: authentication failure")
    };
    conn.send_response(engine, None, ResponseEvent::Generic, response);
}
