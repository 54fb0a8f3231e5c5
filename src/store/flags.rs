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

//! The STORE-side flag mutation rules.
//!
//! Three operations (replace, add, remove), each with a `.SILENT` variant.
//! Two validation layers apply:
//!
//! - A flag beginning with `\` must be one of the configured system flags;
//!   anything else is a hard error which aborts the remainder of the STORE
//!   batch (mutations already applied to earlier messages stay applied).
//! - A flag outside the folder's permanent-flag set is silently dropped,
//!   unless the folder allows arbitrary permanent flags. Removal skips this
//!   check so clients can always clear whatever is present.

use super::model::Message;
use crate::support::error::Error;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StoreAction {
    Replace,
    Add,
    Remove,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StoreOp {
    pub action: StoreAction,
    pub silent: bool,
}

/// Parse a STORE item name (`FLAGS`, `+FLAGS.SILENT`, ...).
pub fn parse_store_item(name: &str) -> Option<StoreOp> {
    let (base, silent) = match name.strip_suffix(".SILENT") {
        Some(base) => (base, true),
        None => (name, false),
    };
    let action = match base {
        "FLAGS" => StoreAction::Replace,
        "+FLAGS" => StoreAction::Add,
        "-FLAGS" => StoreAction::Remove,
        _ => return None,
    };
    Some(StoreOp { action, silent })
}

/// Apply one store operation to one message.
pub fn apply_store(
    message: &mut Message,
    op: StoreOp,
    flags: &[String],
    system_flags: &[String],
    permanent_flags: &[String],
    allow_permanent_flags: bool,
) -> Result<(), Error> {
    let permitted = |flag: &str| {
        allow_permanent_flags || permanent_flags.iter().any(|f| f == flag)
    };

    match op.action {
        StoreAction::Replace => {
            let mut new_flags = Vec::new();
            for flag in flags {
                check_system_flag(flag, system_flags)?;
                if !permitted(flag) {
                    continue;
                }
                if !new_flags.contains(flag) {
                    new_flags.push(flag.clone());
                }
            }
            message.flags = new_flags;
        },
        StoreAction::Add => {
            for flag in flags {
                check_system_flag(flag, system_flags)?;
                if !permitted(flag) {
                    continue;
                }
                if !message.has_flag(flag) {
                    message.flags.push(flag.clone());
                }
            }
        },
        StoreAction::Remove => {
            for flag in flags {
                check_system_flag(flag, system_flags)?;
                message.flags.retain(|f| f != flag);
            }
        },
    }
    Ok(())
}

fn check_system_flag(flag: &str, system_flags: &[String]) -> Result<(), Error> {
    if flag.starts_with('\\') && !system_flags.iter().any(|f| f == flag) {
        return Err(Error::BadSystemFlag(flag.to_owned()));
    }
    Ok(())
}
