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

//! Input framing: turning an arbitrarily chunked octet stream into complete
//! command lines.
//!
//! The subtle part is literals. A line ending in `{N}` (or the
//! non-synchronizing `{N+}`) is not a complete command: exactly N of the
//! following octets belong to the same command verbatim, and must never be
//! scanned for line terminators, no matter how many transport deliveries
//! they are spread across. Only once the literal is fully consumed does
//! line-oriented scanning resume for the remainder of that command. Already
//! consumed octets are never re-scanned.

use lazy_static::lazy_static;
use memchr::memchr;
use regex::bytes::Regex;

lazy_static! {
    static ref LITERAL_AT_EOL: Regex =
        Regex::new(r"\{([0-9]+)(\+)?\}$").unwrap();
}

/// One framing event.
#[derive(Debug, PartialEq)]
pub enum Framed {
    /// A synchronizing literal was opened; the continuation prompt must be
    /// sent before the client will deliver the literal octets.
    Continuation,
    /// One complete command, literal octets in-line.
    Line(Vec<u8>),
}

/// Per-session framing state.
#[derive(Debug, Default)]
pub struct Framer {
    /// Bytes scanned so far that belong to no complete line yet.
    remainder: Vec<u8>,
    /// The partial command accumulated across literals.
    command: Vec<u8>,
    /// Octets of the current literal still owed.
    literal_remaining: usize,
}

impl Framer {
    /// Feed one transport delivery, returning the framing events it
    /// completes, in order.
    pub fn ingest(&mut self, data: &[u8]) -> Vec<Framed> {
        let mut events = Vec::new();
        let mut data = data;

        // An outstanding literal swallows input before any scanning.
        if self.literal_remaining > 0 {
            let take = self.literal_remaining.min(data.len());
            self.command.extend_from_slice(&data[..take]);
            self.literal_remaining -= take;
            data = &data[take..];
            if self.literal_remaining > 0 {
                return events;
            }
        }

        self.remainder.extend_from_slice(data);

        while let Some(nl) = memchr(b'\n', &self.remainder) {
            let mut line_end = nl;
            if line_end > 0 && b'\r' == self.remainder[line_end - 1] {
                line_end -= 1;
            }

            match literal_marker(&self.remainder[..line_end]) {
                Some((length, literal_plus)) => {
                    if !literal_plus {
                        events.push(Framed::Continuation);
                    }
                    // The marker line, terminator included, stays part of
                    // the command so the parser sees the literal in-line.
                    self.command
                        .extend_from_slice(&self.remainder[..=nl]);
                    self.remainder.drain(..=nl);
                    self.literal_remaining = length;

                    let take = self.literal_remaining.min(self.remainder.len());
                    self.command.extend_from_slice(&self.remainder[..take]);
                    self.remainder.drain(..take);
                    self.literal_remaining -= take;
                    if self.literal_remaining > 0 {
                        break;
                    }
                },
                None => {
                    let mut line = std::mem::take(&mut self.command);
                    line.extend_from_slice(&self.remainder[..line_end]);
                    self.remainder.drain(..=nl);
                    events.push(Framed::Line(line));
                },
            }
        }

        events
    }
}

fn literal_marker(line: &[u8]) -> Option<(usize, bool)> {
    let captures = LITERAL_AT_EOL.captures(line)?;
    let length = std::str::from_utf8(captures.get(1)?.as_bytes())
        .ok()?
        .parse()
        .ok()?;
    Some((length, captures.get(2).is_some()))
}
