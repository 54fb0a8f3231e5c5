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

//! IDLE: the session parks on a continuation, notifications flush the
//! moment they arrive, and `DONE` ends the wait. A session that never
//! acknowledges is cut loose with a BYE after a bounded interval.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use log::info;

use super::{Registry, ResponseEvent};
use crate::session::{Connection, Engine, SessionState};
use crate::session::handlers::done;
use crate::syntax::{Command, Cond, Response};

const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub(super) fn install(registry: &mut Registry) {
    registry.register_capability("IDLE");
    registry.set_command_handler("IDLE", Arc::new(idle));
}

fn idle(conn: &Arc<Connection>, engine: &mut Engine, cmd: &mut Command) {
    if SessionState::NotAuthenticated == engine.state {
        return done(conn, engine, cmd, Cond::No, "Login first");
    }
    if cmd.args.is_some() {
        return done(
            conn,
            engine,
            cmd,
            Cond::Bad,
            "Unexpected arguments to IDLE",
        );
    }

    // Unacknowledged IDLE terminates the session unilaterally.
    let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);
    let weak = Arc::downgrade(conn);
    thread::spawn(move || {
        if cancel_rx.recv_timeout(IDLE_TIMEOUT).is_err() {
            if let Some(conn) = weak.upgrade() {
                if conn.is_open() {
                    info!("[sess{}] IDLE expired", conn.id);
                    conn.write_raw(
                        &Response::cond("*", Cond::Bye, "IDLE terminated")
                            .render_line(),
                    );
                    conn.close();
                }
            }
        }
    });

    engine.direct_notifications = true;
    let tag = cmd.tag.clone();
    engine.input_handler = Some(Box::new(move |conn, engine, line| {
        let _ = cancel_tx.send(());
        engine.direct_notifications = false;
        conn.sync_shadow(engine);

        let line = String::from_utf8_lossy(line);
        let response = if line.trim().eq_ignore_ascii_case("DONE") {
            Response::cond(tag, Cond::Ok, "IDLE terminated")
        } else {
            Response::cond(tag, Cond::Bad, "Invalid Idle continuation")
        };
        conn.send_response(engine, None, ResponseEvent::Generic, response);
    }));

    conn.write_raw(b"+ idling\r\n");
    conn.sync_shadow(engine);
    conn.flush_notifications(None);
}
