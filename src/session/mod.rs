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

//! The per-connection session engine.
//!
//! Bytes delivered by the transport run through the [`framer`], producing
//! complete commands which are queued and executed strictly one at a time
//! under the session's engine lock. Handlers follow a uniform contract:
//! validate argument shape, validate session state, perform the operation,
//! emit untagged data followed by exactly one tagged completion. Errors are
//! converted to tagged responses at the handler boundary; the queue always
//! advances.
//!
//! Asynchronous notifications from other sessions land in a side queue and
//! are flushed immediately before the next tagged response — except while a
//! FETCH/STORE/SEARCH exchange is being rendered, and except in IDLE, which
//! flushes them the moment they arrive.

pub mod framer;
pub mod handlers;

#[cfg(test)]
mod integration_tests;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::Sender;
use log::{info, trace};

use self::framer::{Framed, Framer};
use crate::extensions::{HookOutput, ResponseEvent};
use crate::server::Server;
use crate::store::model::MessageRef;
use crate::store::Notification;
use crate::syntax::{
    self, best_effort_tag, parse_command, Command, Cond, Node, Response,
};
use crate::transport::SocketEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    NotAuthenticated,
    Authenticated,
    Selected,
    Logout,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::NotAuthenticated
    }
}

/// A one-shot interceptor for the next input line, used by multi-step
/// AUTHENTICATE and IDLE. While installed, the command queue makes no
/// progress on new input.
pub type InputHandler =
    Box<dyn FnOnce(&Arc<Connection>, &mut Engine, &[u8]) + Send>;

/// The per-session protocol state, guarded by the connection's engine lock.
#[derive(Default)]
pub struct Engine {
    pub state: SessionState,
    /// Path of the selected folder.
    pub selected: Option<String>,
    pub read_only: bool,
    /// Extensions switched on via ENABLE.
    pub enabled: Vec<String>,
    /// Whether (CONDSTORE) was given to SELECT/EXAMINE.
    pub session_condstore: bool,
    /// IDLE mode: flush notifications as they arrive.
    pub direct_notifications: bool,
    pub input_handler: Option<InputHandler>,
    framer: Framer,
    queue: VecDeque<Command>,
    processing: bool,
}

/// A cheap snapshot of the session state hooks and the notification router
/// are allowed to see.
#[derive(Clone, Debug, Default)]
pub struct SessionView {
    pub id: u64,
    pub state: SessionState,
    pub selected: Option<String>,
    pub read_only: bool,
    pub session_condstore: bool,
}

/// One client connection and its session.
pub struct Connection {
    pub id: u64,
    pub server: Arc<Server>,
    outbound: Sender<SocketEvent>,
    pub(crate) engine: Mutex<Engine>,
    notifications: Mutex<Vec<Notification>>,
    shadow: Mutex<SessionView>,
    direct: AtomicBool,
    open: AtomicBool,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        server: Arc<Server>,
        outbound: Sender<SocketEvent>,
    ) -> Arc<Self> {
        Arc::new(Connection {
            id,
            server,
            outbound,
            engine: Mutex::new(Engine::default()),
            notifications: Mutex::new(Vec::new()),
            shadow: Mutex::new(SessionView {
                id,
                ..SessionView::default()
            }),
            direct: AtomicBool::new(false),
            open: AtomicBool::new(true),
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Feed client octets into the session. Processing is synchronous:
    /// every command completed by this delivery has run (and responded) by
    /// the time this returns.
    pub fn deliver(self: &Arc<Self>, data: &[u8]) {
        if !self.is_open() {
            return;
        }

        let mut engine = self.engine.lock().unwrap();
        let events = engine.framer.ingest(data);
        for event in events {
            match event {
                Framed::Continuation => self.write_raw(b"+ Go ahead\r\n"),
                Framed::Line(line) => {
                    trace!(
                        "[sess{}] C: {}",
                        self.id,
                        String::from_utf8_lossy(&line)
                    );
                    if let Some(handler) = engine.input_handler.take() {
                        handler(self, &mut *engine, &line);
                    } else {
                        self.schedule(&mut *engine, &line);
                    }
                },
            }
        }
        self.sync_shadow(&engine);
    }

    /// Close the session: cancel queued commands, drop it from the server,
    /// and deliver the transport close event.
    pub fn close(self: &Arc<Self>) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("[sess{}] Connection closed", self.id);
        self.server.remove_connection(self.id);
        let _ = self.outbound.send(SocketEvent::Close);
    }

    fn schedule(self: &Arc<Self>, engine: &mut Engine, line: &[u8]) {
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(e) => {
                let tag = best_effort_tag(line);
                self.send_response(
                    engine,
                    None,
                    ResponseEvent::Generic,
                    Response {
                        tag: "*".to_owned(),
                        verb: Some("BAD".to_owned()),
                        args: vec![
                            Node::section(vec![Node::atom("SYNTAX")]),
                            Node::text(e.to_string()),
                        ],
                    },
                );
                self.send_response(
                    engine,
                    None,
                    ResponseEvent::Generic,
                    Response::cond(tag, Cond::Bad, "Error parsing command"),
                );
                return;
            },
        };

        if self
            .server
            .registry()
            .command_handler(&command.verb)
            .is_none()
        {
            let quip = format!("Invalid command {}", command.verb);
            let tag = command.tag;
            self.send_response(
                engine,
                None,
                ResponseEvent::Generic,
                Response::cond(tag, Cond::Bad, quip),
            );
            return;
        }

        engine.queue.push_back(command);
        self.process_queue(engine);
    }

    fn process_queue(self: &Arc<Self>, engine: &mut Engine) {
        if engine.processing {
            return;
        }
        engine.processing = true;
        while let Some(mut command) = engine.queue.pop_front() {
            let handler = self
                .server
                .registry()
                .command_handler(&command.verb)
                .expect("queued command lost its handler");
            handler(self, engine, &mut command);
            self.sync_shadow(engine);
            if SessionState::Logout == engine.state {
                engine.queue.clear();
            }
        }
        engine.processing = false;
    }

    /// Send one response. Tagged responses first flush any pending
    /// notifications, unless the command being answered is a
    /// FETCH/STORE/SEARCH exchange.
    pub fn send_response(
        self: &Arc<Self>,
        engine: &mut Engine,
        command: Option<&Command>,
        event: ResponseEvent,
        response: Response,
    ) {
        if response.is_tagged() {
            self.flush_notifications(command);
        }
        let view = self.view(engine);
        self.emit(&view, &event, response);
    }

    /// Flush queued notifications, unless `command` is one of the exchanges
    /// during which they are held back.
    pub fn flush_notifications(self: &Arc<Self>, command: Option<&Command>) {
        if let Some(command) = command {
            if matches!(
                command.verb.as_str(),
                "FETCH" | "STORE" | "SEARCH" | "UID FETCH" | "UID STORE"
                    | "UID SEARCH"
            ) {
                return;
            }
        }

        let pending: Vec<Notification> = {
            let mut queue = self.notifications.lock().unwrap();
            queue.drain(..).collect()
        };
        if pending.is_empty() {
            return;
        }
        let view = self.shadow.lock().unwrap().clone();
        for notification in pending {
            self.emit(
                &view,
                &ResponseEvent::Notification,
                notification.response,
            );
        }
    }

    /// Route one notification into this session, called by the server's
    /// router after the store lock has been released.
    pub(crate) fn on_notify(self: &Arc<Self>, notification: &Notification) {
        if !self.is_open() {
            return;
        }
        if Some(self.id) == notification.ignore {
            return;
        }
        let relevant = match notification.folder {
            None => true,
            Some(ref folder) => {
                let shadow = self.shadow.lock().unwrap();
                shadow.selected.as_deref() == Some(folder.as_str())
            },
        };
        if !relevant {
            return;
        }

        self.notifications
            .lock()
            .unwrap()
            .push(notification.clone());
        if self.direct.load(Ordering::SeqCst) {
            self.flush_notifications(None);
        }
    }

    /// The first pre-expunge snapshot in the pending queue, if any; FETCH,
    /// STORE and SEARCH render against it until the expunge notices have
    /// been delivered.
    pub fn pending_snapshot(&self) -> Option<Vec<MessageRef>> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .find_map(|n| n.snapshot.clone())
    }

    /// Whether an EXPUNGE notice is queued but not yet delivered.
    pub fn has_pending_expunge(&self) -> bool {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .any(Notification::is_expunge)
    }

    pub(crate) fn clear_notifications(&self) {
        self.notifications.lock().unwrap().clear();
    }

    pub fn view(&self, engine: &Engine) -> SessionView {
        SessionView {
            id: self.id,
            state: engine.state,
            selected: engine.selected.clone(),
            read_only: engine.read_only,
            session_condstore: engine.session_condstore,
        }
    }

    /// Keep the router-visible state snapshot in step with the engine.
    pub(crate) fn sync_shadow(&self, engine: &Engine) {
        *self.shadow.lock().unwrap() = self.view(engine);
        self.direct
            .store(engine.direct_notifications, Ordering::SeqCst);
    }

    fn emit(
        self: &Arc<Self>,
        view: &SessionView,
        event: &ResponseEvent,
        mut response: Response,
    ) {
        let mut out = HookOutput::default();
        for hook in &self.server.registry().output_hooks {
            hook.on_response(
                &self.server,
                view,
                event,
                &mut response,
                &mut out,
            );
        }
        for (side_event, side_response) in out.side {
            self.emit(view, &side_event, side_response);
        }
        if out.skip {
            return;
        }
        self.write_raw(&response.render_line());
    }

    /// Write raw octets to the transport, bypassing hooks. Used for
    /// continuation prompts and the greeting.
    pub(crate) fn write_raw(&self, bytes: &[u8]) {
        if !self.is_open() {
            return;
        }
        trace!(
            "[sess{}] S: {}",
            self.id,
            String::from_utf8_lossy(bytes).trim_end()
        );
        let _ = self.outbound.send(SocketEvent::Data(bytes.to_vec()));
    }

    /// Send the untagged greeting. Bypasses the hook pipeline, like every
    /// raw write.
    pub(crate) fn greet(&self) {
        self.write_raw(b"* OK Crowmap ready for rumble\r\n");
    }

    /// Deliver the transport open event.
    pub(crate) fn announce_open(&self) {
        let _ = self.outbound.send(SocketEvent::Open);
    }
}

/// Helpers shared by command handlers for building responses in the
/// argument-tree shape.
pub(crate) fn flags_list(flags: &[String]) -> Node {
    Node::list(flags.iter().map(|f| Node::atom(f.clone())).collect())
}

pub(crate) fn section_ok(code: Vec<Node>) -> Response {
    Response {
        tag: "*".to_owned(),
        verb: Some("OK".to_owned()),
        args: vec![syntax::Node::section(code)],
    }
}
