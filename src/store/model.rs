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

//! The in-memory mailbox data model.
//!
//! Messages are shared as `Arc<Mutex<Message>>` so that the pre-expunge
//! snapshots attached to notifications alias the same objects a folder
//! holds; a session still rendering against an old snapshot sees the same
//! message identities the folder had before the expunge.

use std::sync::{Arc, Mutex};

use crate::mime::{self, Part};
use crate::support::chronox;

pub type MessageRef = Arc<Mutex<Message>>;

/// A single stored message.
#[derive(Debug, Default)]
pub struct Message {
    /// Assigned once at append; never reused within a folder.
    pub uid: u32,
    pub flags: Vec<String>,
    /// `INTERNALDATE` string, fixed format.
    pub internal_date: String,
    /// The appended octets, immutable.
    pub raw: Arc<Vec<u8>>,
    /// Modification sequence, attached by the CONDSTORE capability.
    pub modseq: Option<u64>,
    pub(crate) parsed: Option<Arc<Part>>,
}

impl Message {
    pub fn new(raw: Vec<u8>) -> Self {
        Message {
            raw: Arc::new(raw),
            ..Message::default()
        }
    }

    /// The parsed MIME representation, computed on first use and cached.
    pub fn parsed(&mut self) -> Arc<Part> {
        if let Some(ref parsed) = self.parsed {
            return Arc::clone(parsed);
        }
        let parsed = Arc::new(mime::parse(&self.raw));
        self.parsed = Some(Arc::clone(&parsed));
        parsed
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn size(&self) -> u32 {
        self.raw.len() as u32
    }
}

/// One mailbox.
#[derive(Debug, Default)]
pub struct Folder {
    /// Full path, unique within the store.
    pub path: String,
    /// The namespace prefix this folder belongs to. `INBOX` belongs to its
    /// own pseudo-namespace, also named `INBOX`.
    pub namespace: String,
    pub flags: Vec<String>,
    pub uidvalidity: u32,
    /// Strictly greater than every UID ever assigned in this folder,
    /// including across folder deletion and recreation.
    pub uidnext: u32,
    /// When set, clients may set flags outside `permanent_flags` and the
    /// folder advertises `\*`.
    pub allow_permanent_flags: bool,
    pub permanent_flags: Vec<String>,
    pub subscribed: bool,
    pub special_use: Vec<String>,
    /// Highest modification sequence, maintained by CONDSTORE.
    pub highest_modseq: u64,
    pub messages: Vec<MessageRef>,
    pub(super) has_children: bool,
}

impl Folder {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_selectable(&self) -> bool {
        !self.has_flag("\\Noselect")
    }

    pub fn next_uid(&mut self) -> u32 {
        let uid = self.uidnext;
        self.uidnext += 1;
        uid
    }

    /// Normalise one message in place: default internal date, de-duplicated
    /// flags, UID assignment.
    pub fn process_message(&mut self, message: &mut Message) {
        if message.internal_date.is_empty() {
            message.internal_date = chronox::now_internal_date();
        }
        let mut flags = Vec::new();
        for flag in message.flags.drain(..) {
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        }
        message.flags = flags;
        if 0 == message.uid {
            message.uid = self.next_uid();
        } else if message.uid >= self.uidnext {
            self.uidnext = message.uid + 1;
        }
    }
}

/// Add `flag` unless already present. Order-stable.
pub fn ensure_flag(flags: &mut Vec<String>, flag: &str) {
    if !flags.iter().any(|f| f == flag) {
        flags.push(flag.to_owned());
    }
}

/// Remove every occurrence of `flag`.
pub fn remove_flag(flags: &mut Vec<String>, flag: &str) {
    flags.retain(|f| f != flag);
}

/// Keep exactly `options[selected]` of the mutually exclusive `options`,
/// removing the rest. Used for the `\HasChildren` / `\HasNoChildren` pair.
pub fn toggle_flags(flags: &mut Vec<String>, options: &[&str], selected: usize) {
    for (ix, option) in options.iter().enumerate() {
        if ix == selected {
            ensure_flag(flags, option);
        } else {
            remove_flag(flags, option);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn message_parse_cache() {
        let mut message = Message::new(b"Subject: x\r\n\r\nbody".to_vec());
        let first = message.parsed();
        let second = message.parsed();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(Some("x".to_owned()), first.parsed_header.subject);
    }

    #[test]
    fn process_message_assigns_uids_and_defaults() {
        let mut folder = Folder {
            uidnext: 5,
            ..Folder::default()
        };
        let mut message = Message::new(Vec::new());
        message.flags = vec![
            "\\Seen".to_owned(),
            "\\Seen".to_owned(),
            "custom".to_owned(),
        ];
        folder.process_message(&mut message);
        assert_eq!(5, message.uid);
        assert_eq!(6, folder.uidnext);
        assert_eq!(vec!["\\Seen".to_owned(), "custom".to_owned()], message.flags);
        assert!(!message.internal_date.is_empty());

        // A message carrying a UID at or past uidnext pushes uidnext up.
        let mut seeded = Message::new(Vec::new());
        seeded.uid = 100;
        folder.process_message(&mut seeded);
        assert_eq!(101, folder.uidnext);
    }

    #[test]
    fn flag_helpers() {
        let mut flags = vec!["\\Seen".to_owned()];
        ensure_flag(&mut flags, "\\Seen");
        assert_eq!(1, flags.len());
        ensure_flag(&mut flags, "\\Deleted");
        assert_eq!(2, flags.len());
        remove_flag(&mut flags, "\\Seen");
        assert_eq!(vec!["\\Deleted".to_owned()], flags);

        toggle_flags(&mut flags, &["\\HasChildren", "\\HasNoChildren"], 1);
        assert!(flags.iter().any(|f| "\\HasNoChildren" == f));
        assert!(!flags.iter().any(|f| "\\HasChildren" == f));
        toggle_flags(&mut flags, &["\\HasChildren", "\\HasNoChildren"], 0);
        assert!(flags.iter().any(|f| "\\HasChildren" == f));
        assert!(!flags.iter().any(|f| "\\HasNoChildren" == f));
    }
}
