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

//! The in-memory client transport.
//!
//! A [`Socket`] is the client's half of a connection: octets written with
//! [`Socket::send`] are processed synchronously by the session, and
//! everything the server emits arrives as ordered [`SocketEvent`]s on a
//! channel. The session engine is transport-agnostic; anything that can
//! pump bytes both ways (a test, or the TCP bridge in the CLI) can sit on
//! this interface.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::Receiver;

use crate::session::Connection;

#[derive(Clone, Debug, PartialEq)]
pub enum SocketEvent {
    Open,
    Data(Vec<u8>),
    Close,
}

pub struct Socket {
    conn: Arc<Connection>,
    events: Receiver<SocketEvent>,
    /// Partial line carried between `read_responses` calls.
    pending: Mutex<Vec<u8>>,
}

impl Socket {
    pub(crate) fn new(
        conn: Arc<Connection>,
        events: Receiver<SocketEvent>,
    ) -> Self {
        Socket {
            conn,
            events,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn announce_open(&self) {
        self.conn.announce_open();
    }

    pub(crate) fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Deliver client octets. Processing is synchronous: by the time this
    /// returns, every command completed by these octets has responded.
    pub fn send(&self, data: &[u8]) {
        self.conn.deliver(data);
    }

    pub fn close(&self) {
        self.conn.close();
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    /// The raw event stream, for callers that want to pump it themselves.
    pub fn events(&self) -> &Receiver<SocketEvent> {
        &self.events
    }

    /// Drain everything the server has sent so far and return it as
    /// CRLF-split lines. A trailing partial line is held for the next call.
    pub fn read_responses(&self) -> Vec<String> {
        let mut buffer = self.pending.lock().unwrap();
        while let Ok(event) = self.events.try_recv() {
            if let SocketEvent::Data(data) = event {
                buffer.extend_from_slice(&data);
            }
        }

        let mut lines = Vec::new();
        while let Some(ix) = buffer.windows(2).position(|w| w == &b"\r\n"[..]) {
            let line: Vec<u8> = buffer.drain(..ix + 2).collect();
            lines.push(
                String::from_utf8_lossy(&line[..line.len() - 2]).into_owned(),
            );
        }
        lines
    }

    /// Wait up to `timeout` for the next event, draining nothing else.
    pub fn recv_event_timeout(
        &self,
        timeout: Duration,
    ) -> Option<SocketEvent> {
        self.events.recv_timeout(timeout).ok()
    }
}
