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

//! Commands legal in any (or nearly any) state.

use std::sync::Arc;

use log::info;

use super::{done, stringish};
use crate::extensions::ResponseEvent;
use crate::session::{Connection, Engine, SessionState};
use crate::syntax::{Command, Cond, Node, Response};

pub(super) fn capability(
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
            "CAPABILITY does not take any arguments",
        );
    }

    let capabilities = conn.server.registry().capabilities_for(engine);
    conn.send_response(
        engine,
        Some(&*cmd),
        ResponseEvent::Generic,
        Response::untagged(
            "CAPABILITY",
            capabilities.into_iter().map(Node::atom).collect(),
        ),
    );
    done(conn, engine, cmd, Cond::Ok, "Completed");
}

pub(super) fn login(
    conn: &Arc<Connection>,
    engine: &mut Engine,
    cmd: &mut Command,
) {
    let credentials = cmd.args.as_ref().and_then(|args| {
        if 2 != args.len() {
            return None;
        }
        Some((stringish(&args[0])?, stringish(&args[1])?))
    });
    let (username, password) = match credentials {
        Some(credentials) => credentials,
        None => {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                "LOGIN takes 2 string arguments",
            )
        },
    };

    if SessionState::NotAuthenticated != engine.state {
        return done(
            conn,
            engine,
            cmd,
            Cond::Bad,
            "Already authenticated, identity change not allowed",
        );
    }

    let valid = conn
        .server
        .users
        .get(&username)
        .map(|user| user.password == password)
        .unwrap_or(false);
    if !valid {
        return done(
            conn,
            engine,
            cmd,
            Cond::No,
            "Login failed: authentication failure",
        );
    }

    engine.state = SessionState::Authenticated;
    info!("[sess{}] Logged in as {}", conn.id, username);
    done(conn, engine, cmd, Cond::Ok, "User logged in");
}

pub(super) fn logout(
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
            "LOGOUT does not take any arguments",
        );
    }

    engine.state = SessionState::Logout;
    conn.send_response(
        engine,
        Some(&*cmd),
        ResponseEvent::Generic,
        Response::cond("*", Cond::Bye, "LOGOUT received"),
    );
    done(conn, engine, cmd, Cond::Ok, "Completed");
    conn.close();
}

pub(super) fn noop(
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
            "NOOP does not take any arguments",
        );
    }
    done(conn, engine, cmd, Cond::Ok, "Completed");
}

pub(super) fn check(
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
            "CHECK does not take any arguments",
        );
    }
    done(conn, engine, cmd, Cond::Ok, "Completed");
}
