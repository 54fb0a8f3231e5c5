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

//! SPECIAL-USE: folder use annotations (`\Sent`, `\Trash`, ...) surfaced on
//! LIST/LSUB. `LIST (SPECIAL-USE) ...` narrows the listing to annotated
//! folders, and `RETURN (SPECIAL-USE)` projects only the annotations into
//! the flags column. A LIST wrapper strips the selection syntax into the
//! command's side-band; an output hook rewrites each listing line.

use std::sync::Arc;

use super::{HookOutput, OutputHook, Registry, ResponseEvent};
use crate::server::Server;
use crate::session::SessionView;
use crate::syntax::{Command, Node, Response};

pub(super) fn install(registry: &mut Registry) {
    registry.register_capability("SPECIAL-USE");

    let previous = registry
        .command_handler("LIST")
        .expect("wrapping unregistered command");
    registry.set_command_handler(
        "LIST",
        Arc::new(move |conn, engine, cmd| {
            rewrite_arguments(cmd);
            previous(conn, engine, cmd);
        }),
    );

    registry.output_hooks.push(Arc::new(SpecialUseHook));
}

fn is_special_use_atom(node: &Node) -> bool {
    node.as_atom()
        .map(|a| a.value.eq_ignore_ascii_case("SPECIAL-USE"))
        .unwrap_or(false)
}

fn rewrite_arguments(cmd: &mut Command) {
    let args = match cmd.args.as_mut() {
        Some(args) => args,
        None => return,
    };

    // Selection option: LIST (SPECIAL-USE) reference pattern
    let mut remove_first = false;
    if let Some(Node::List(items)) = args.first_mut() {
        let before = items.len();
        items.retain(|item| !is_special_use_atom(item));
        if items.len() != before {
            cmd.modifiers.list_special_use_only = true;
        }
        remove_first = items.is_empty();
    }
    if remove_first {
        args.remove(0);
    }

    // Return option: LIST reference pattern RETURN (SPECIAL-USE)
    let has_return = args.len() >= 4
        && args[2]
            .as_atom()
            .map(|a| a.value.eq_ignore_ascii_case("RETURN"))
            .unwrap_or(false);
    if has_return {
        let mut remove_return = false;
        if let Some(Node::List(items)) = args.get_mut(3) {
            let before = items.len();
            items.retain(|item| !is_special_use_atom(item));
            if items.len() != before {
                cmd.modifiers.list_special_use_flags = true;
            }
            remove_return = items.is_empty();
        }
        if remove_return {
            args.drain(2..=3);
        }
    }
}

struct SpecialUseHook;

impl OutputHook for SpecialUseHook {
    fn on_response(
        &self,
        _server: &Arc<Server>,
        _session: &SessionView,
        event: &ResponseEvent,
        response: &mut Response,
        out: &mut HookOutput,
    ) {
        let (special_use, only, flags_mode) = match *event {
            ResponseEvent::ListItem {
                ref special_use,
                special_use_only,
                special_use_flags,
            }
            | ResponseEvent::LsubItem {
                ref special_use,
                special_use_only,
                special_use_flags,
            } => (special_use, special_use_only, special_use_flags),
            _ => return,
        };

        let flag_list = match response.args.first_mut() {
            Some(Node::List(items)) => items,
            _ => return,
        };

        if !special_use.is_empty() {
            let annotations: Vec<Node> = special_use
                .iter()
                .map(|attr| Node::atom(attr.clone()))
                .collect();
            if flags_mode {
                *flag_list = annotations;
            } else {
                flag_list.extend(annotations);
            }
        } else {
            if flags_mode {
                flag_list.clear();
            }
            if only {
                out.skip = true;
            }
        }
    }
}
