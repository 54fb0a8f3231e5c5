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

use std::io;

use thiserror::Error;

/// Failures raised by the mailbox store and the engines layered on top of it.
///
/// Every variant that can surface during command execution is caught at the
/// handler boundary and converted into a tagged `BAD`/`NO`; nothing here ever
/// crosses a session's command queue as a panic.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Mailbox does not exist")]
    NxMailbox,
    #[error("Mailbox is not selectable")]
    MailboxUnselectable,
    #[error("Invalid system flag {0}")]
    BadSystemFlag(String),
    #[error("Invalid FETCH argument {0}")]
    BadFetchItem(String),
    #[error("Invalid STORE argument {0}")]
    BadStoreItem(String),
    #[error("Invalid query element: {0} (Failure)")]
    BadSearchKey(String),
    #[error("Invalid BODY[<section>] identifier {0}")]
    BadSectionPath(String),
    #[error("Not implemented: {0}")]
    UnimplementedSection(String),
    #[error("{0}")]
    BadArguments(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    ConfigParse(#[from] toml::de::Error),
}
