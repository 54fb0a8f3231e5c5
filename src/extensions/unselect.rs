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

//! UNSELECT: leave the Selected state without the implicit expunge CLOSE
//! performs.

use std::sync::Arc;

use super::Registry;
use crate::session::handlers::done;
use crate::session::{Connection, Engine, SessionState};
use crate::syntax::{Command, Cond};

pub(super) fn install(registry: &mut Registry) {
    registry.register_capability("UNSELECT");
    registry.set_command_handler("UNSELECT", Arc::new(unselect));
}

fn unselect(conn: &Arc<Connection>, engine: &mut Engine, cmd: &mut Command) {
    if cmd.args.is_some() {
        return done(
            conn,
            engine,
            cmd,
            Cond::Bad,
            "UNSELECT does not take any arguments",
        );
    }
    if SessionState::Selected != engine.state {
        return done(conn, engine, cmd, Cond::Bad, "Select a mailbox first");
    }

    done(conn, engine, cmd, Cond::Ok, "Mailbox unselected");
    engine.state = SessionState::Authenticated;
    engine.selected = None;
    conn.sync_shadow(engine);
}
