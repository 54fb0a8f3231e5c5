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

//! ENABLE: per-connection opt-in to extensions that change base behaviour.
//! Other capabilities register the names clients may enable.

use std::sync::Arc;

use super::Registry;
use crate::session::handlers::done;
use crate::session::{Connection, Engine, SessionState};
use crate::syntax::{Command, Cond};

pub(super) fn install(registry: &mut Registry) {
    registry.register_capability("ENABLE");
    registry.set_command_handler("ENABLE", Arc::new(enable));
}

fn enable(conn: &Arc<Connection>, engine: &mut Engine, cmd: &mut Command) {
    if SessionState::Authenticated != engine.state {
        return done(conn, engine, cmd, Cond::Bad, "ENABLE not allowed now.");
    }

    let args = match cmd.args.as_ref() {
        Some(args) => args.clone(),
        None => {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                "ENABLE expects capability list",
            )
        },
    };

    for (ix, arg) in args.iter().enumerate() {
        if arg.as_atom().is_none() {
            return done(
                conn,
                engine,
                cmd,
                Cond::Bad,
                format!("Attribute nr {} is not an ATOM", ix + 1),
            );
        }
    }

    let available = &conn.server.registry().enable_available;
    for arg in &args {
        let capability = arg.as_atom().unwrap().value.to_ascii_uppercase();
        if available.iter().any(|a| a == &capability)
            && !engine.enabled.iter().any(|e| e == &capability)
        {
            engine.enabled.push(capability);
        }
    }

    done(conn, engine, cmd, Cond::Ok, "ENABLE completed");
}
