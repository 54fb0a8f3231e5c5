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

//! Projection from a [`Part`] tree to the `BODY` / `BODYSTRUCTURE` response
//! shape.
//!
//! The non-extended form is what the `BODY` fetch item (without a section)
//! returns; `BODYSTRUCTURE` appends the extension fields. Fields crowmap has
//! no data for (MD5, disposition, language) render as `NIL`, which is what
//! clients expect from servers that do not compute them.

use super::envelope::envelope;
use super::Part;
use crate::syntax::Node;

/// Compute the structure response for `part`.
pub fn bodystructure(part: &Part, extended: bool) -> Node {
    if "multipart" == part.content_type {
        let mut items: Vec<Node> = part
            .children
            .iter()
            .map(|child| bodystructure(child, extended))
            .collect();
        items.push(Node::qstr(part.content_subtype.to_ascii_uppercase()));
        if extended {
            items.push(parameter_list(part));
            items.push(Node::Nil); // disposition
            items.push(Node::Nil); // language
        }
        return Node::list(items);
    }

    let mut items = vec![
        Node::qstr(part.content_type.to_ascii_uppercase()),
        Node::qstr(part.content_subtype.to_ascii_uppercase()),
        parameter_list(part),
        optional_header(part, "Content-ID"),
        optional_header(part, "Content-Description"),
        Node::qstr(part.encoding.to_ascii_uppercase()),
        Node::num(part.body.len() as u32),
    ];

    if let Some(ref message) = part.message {
        items.push(envelope(message));
        items.push(bodystructure(message, extended));
        items.push(Node::num(part.line_count));
    } else if "text" == part.content_type {
        items.push(Node::num(part.line_count));
    }

    if extended {
        items.push(Node::Nil); // MD5
        items.push(Node::Nil); // disposition
        items.push(Node::Nil); // language
    }

    Node::list(items)
}

fn parameter_list(part: &Part) -> Node {
    if part.parameters.is_empty() {
        return Node::Nil;
    }
    let mut items = Vec::new();
    for (key, value) in &part.parameters {
        items.push(Node::qstr(key.to_ascii_uppercase()));
        items.push(Node::qstr(value.clone()));
    }
    Node::list(items)
}

fn optional_header(part: &Part, name: &str) -> Node {
    match part.header_value(name) {
        Some(value) => Node::qstr(value),
        None => Node::Nil,
    }
}
