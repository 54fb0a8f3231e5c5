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

//! AUTHENTICATE XOAUTH2: bearer-token authentication with the OAuth2 error
//! dance. On a bad token the server answers the initial response with a
//! base64 JSON challenge and the client must send an (empty) continuation
//! line before the tagged NO arrives.

use std::sync::Arc;

use log::info;

use super::{Registry, ResponseEvent};
use crate::session::handlers::done;
use crate::session::{Connection, Engine, SessionState};
use crate::syntax::{Command, Cond, Node, Response};

pub(super) fn install(registry: &mut Registry) {
    registry.register_capability_if(
        "AUTH=XOAUTH2",
        Arc::new(|engine| SessionState::NotAuthenticated == engine.state),
    );
    registry
        .set_command_handler("AUTHENTICATE XOAUTH2", Arc::new(authenticate));
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
            "SASL-IR must be enabled to support XOAUTH2",
        );
    }

    let payload = cmd
        .args
        .as_ref()
        .filter(|args| 1 == args.len())
        .and_then(|args| match args[0] {
            Node::Atom(..) | Node::Str(..) => args[0].string_value(),
            _ => None,
        })
        .map(|v| v.into_owned());
    let payload = match payload {
        Some(payload) => payload,
        None => {
            return done(conn, engine, cmd, Cond::No, "Invalid SASL argument")
        },
    };

    let decoded = base64::decode(&payload).unwrap_or_default();
    let decoded = String::from_utf8_lossy(&decoded).into_owned();
    let parts: Vec<&str> = decoded.split('\x01').collect();
    let user = parts
        .first()
        .and_then(|p| p.strip_prefix("user="))
        .unwrap_or("");
    let token = parts
        .get(1)
        .and_then(|p| p.strip_prefix("auth=Bearer "))
        .unwrap_or("");

    let well_formed = 4 == parts.len()
        && !user.is_empty()
        && !token.is_empty()
        && parts[2].is_empty()
        && parts[3].is_empty();
    if !well_formed {
        return done(conn, engine, cmd, Cond::No, "Invalid SASL argument.");
    }

    let user_entry = conn.server.users.get(user);
    if user_entry.is_none() {
        return done(conn, engine, cmd, Cond::No, "Invalid credentials");
    }

    let token_valid = user_entry
        .and_then(|u| u.xoauth2.as_ref())
        .map(|x| x.access_token == token)
        .unwrap_or(false);

    if token_valid {
        engine.state = SessionState::Authenticated;
        info!("[sess{}] Authenticated as {} (XOAUTH2)", conn.id, user);
        return done(conn, engine, cmd, Cond::Ok, "User logged in");
    }

    // Bad token: challenge with the OAuth2 error object and swallow the
    // client's continuation line before failing.
    let challenge = base64::encode(
        "{\"status\":\"400\",\"schemes\":\"Bearer\",\
         \"scope\":\"https://mail.google.com/\"}",
    );
    conn.send_response(
        engine,
        Some(&*cmd),
        ResponseEvent::Generic,
        Response {
            tag: "+".to_owned(),
            verb: None,
            args: vec![Node::atom(challenge)],
        },
    );

    let tag = cmd.tag.clone();
    engine.input_handler = Some(Box::new(move |conn, engine, _line| {
        conn.send_response(
            engine,
            None,
            ResponseEvent::Generic,
            Response::cond(tag, Cond::No, "SASL authentication failed"),
        );
    }));
}
