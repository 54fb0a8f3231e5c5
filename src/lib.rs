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

//! Crowmap is an in-memory IMAP4rev1 server emulation, intended for
//! exercising IMAP client implementations against fully controlled mailbox
//! state without a real server in the loop.
//!
//! The typical shape of a test looks like this:
//!
//! ```no_run
//! use crowmap::config::Config;
//! use crowmap::server::Server;
//!
//! let server = Server::new(Config::default());
//! let socket = server.connect();
//! socket.send(b"a1 LOGIN testuser demo\r\n");
//! let responses = socket.read_responses();
//! assert!(responses.last().unwrap().starts_with("a1 OK"));
//! ```
//!
//! Everything lives in memory and dies with the [`server::Server`]. Mailbox
//! state is seeded through [`config::Config`]; optional protocol behaviour
//! (IDLE, CONDSTORE, and so forth) is switched on per-server through the
//! capability list and composes with the base command set through the
//! extension registry.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod config;
pub mod extensions;
pub mod fetch;
pub mod mime;
pub mod search;
pub mod server;
pub mod session;
pub mod store;
pub mod support;
pub mod syntax;
pub mod transport;

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        use log4rs::append::console::{ConsoleAppender, Target};
        use log4rs::config::{Appender, Config, Root};

        let stderr = ConsoleAppender::builder().target(Target::Stderr).build();
        let config = Config::builder()
            .appender(Appender::builder().build("stderr", Box::new(stderr)))
            .build(
                Root::builder()
                    .appender("stderr")
                    .build(log::LevelFilter::Debug),
            )
            .unwrap();
        let _ = log4rs::init_config(config);
    })
}
