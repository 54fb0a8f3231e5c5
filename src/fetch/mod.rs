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

//! Projection of FETCH data items from a message.
//!
//! Each item is a pure function of the message (and its lazily parsed MIME
//! tree); the one piece of mutability here is the partial-range echo: when a
//! requested `<start.length>` runs past the end of the resolved section, the
//! length is dropped from the echoed item so the response reflects what was
//! actually returned. The implicit `\Seen` mutation lives with the FETCH
//! command handler, not here.

use std::collections::HashMap;
use std::sync::Arc;

use crate::extensions::FetchItemHandler;
use crate::mime::bodystructure::bodystructure;
use crate::mime::envelope::envelope;
use crate::mime::Part;
use crate::store::model::Message;
use crate::support::error::Error;
use crate::syntax::{Atom, Node};

/// Compute the response value for one fetch item against one message.
///
/// `plugins` is consulted before the built-in items, so capabilities may
/// both add new items and shadow existing ones.
pub fn fetch_item(
    plugins: &HashMap<String, Arc<dyn FetchItemHandler>>,
    message: &mut Message,
    query: &mut Atom,
) -> Result<Node, Error> {
    let key = query.value.to_ascii_uppercase();

    if let Some(handler) = plugins.get(&key) {
        return handler.fetch(message, query);
    }

    match key.as_str() {
        "UID" => Ok(Node::num(message.uid)),
        "FLAGS" => Ok(Node::list(
            message.flags.iter().map(|f| Node::atom(f.clone())).collect(),
        )),
        "INTERNALDATE" => Ok(Node::qstr(message.internal_date.clone())),
        "RFC822" => Ok(Node::Literal(message.raw.to_vec())),
        "RFC822.SIZE" => Ok(Node::num(message.size())),
        "RFC822.HEADER" => {
            let parsed = message.parsed();
            Ok(Node::Literal(parsed.header_block()))
        },
        "BODYSTRUCTURE" => {
            let parsed = message.parsed();
            Ok(bodystructure(&parsed, true))
        },
        "ENVELOPE" => {
            let parsed = message.parsed();
            Ok(envelope(&parsed))
        },
        "BODY" | "BODY.PEEK" => body_item(message, query, &key),
        _ => Err(Error::BadFetchItem(key)),
    }
}

fn body_item(
    message: &mut Message,
    query: &mut Atom,
    key: &str,
) -> Result<Node, Error> {
    let parsed = message.parsed();

    let section = match query.section {
        Some(ref section) => section,
        None if "BODY.PEEK" == key => {
            return Err(Error::BadArguments(
                "BODY.PEEK requires an argument list".to_owned(),
            ))
        },
        None => return Ok(bodystructure(&parsed, false)),
    };

    let mut value = if section.is_empty() {
        message.raw.to_vec()
    } else {
        resolve_section(&parsed, section)?
    };

    if let Some((start, length)) = query.partial {
        let start = start as usize;
        let remaining = value.len().saturating_sub(start);
        value = match length {
            Some(length) if (length as usize) <= remaining => value
                [start..start + length as usize]
                .to_vec(),
            // Length omitted or running past the end: take everything and
            // drop the length from the echoed item.
            _ => {
                query.partial = Some((start as u32, None));
                value.get(start..).map(<[u8]>::to_vec).unwrap_or_default()
            },
        };
    }

    Ok(Node::Literal(value))
}

fn resolve_section(parsed: &Part, section: &[Node]) -> Result<Vec<u8>, Error> {
    let head = match section[0] {
        Node::Atom(ref atom)
            if atom.section.is_none() && atom.partial.is_none() =>
        {
            &atom.value
        },
        ref other => {
            return Err(Error::BadSectionPath(format!("{:?}", other)))
        },
    };

    let (path, suffix) = split_section_name(head);
    let context = match resolve_path(parsed, &path) {
        Some(context) => context,
        None => return Err(Error::BadSectionPath(head.clone())),
    };

    // HEADER and TEXT against a message/rfc822 part address the embedded
    // message, not the part wrapper; MIME and the bare content do not.
    let context = match suffix.as_str() {
        "HEADER" | "TEXT" | "HEADER.FIELDS" | "HEADER.FIELDS.NOT" => {
            context.message.as_deref().unwrap_or(context)
        },
        _ => context,
    };

    match suffix.as_str() {
        "HEADER" | "MIME" => {
            if section.len() > 1 {
                return Err(Error::BadArguments(format!(
                    "{} does not take any arguments",
                    suffix
                )));
            }
            Ok(context.header_block())
        },
        "TEXT" | "" => {
            if section.len() > 1 {
                return Err(Error::BadArguments(format!(
                    "{} does not take any arguments",
                    suffix
                )));
            }
            if context.children.is_empty() {
                Ok(context.body.clone())
            } else {
                Ok(context.text.clone().into_bytes())
            }
        },
        "HEADER.FIELDS" => header_fields(context, section, false),
        "HEADER.FIELDS.NOT" => header_fields(context, section, true),
        _ => Err(Error::UnimplementedSection(head.clone())),
    }
}

/// Split a section name into its leading dotted numeric path and the
/// remaining suffix keyword, e.g. `1.2.TEXT` into (`1.2`, `TEXT`).
fn split_section_name(name: &str) -> (String, String) {
    let mut numeric = Vec::new();
    let mut rest = Vec::new();
    for segment in name.split('.') {
        if rest.is_empty()
            && !segment.is_empty()
            && segment.bytes().all(|b| b.is_ascii_digit())
        {
            numeric.push(segment);
        } else {
            rest.push(segment);
        }
    }
    (
        numeric.join("."),
        rest.join(".").to_ascii_uppercase(),
    )
}

/// Walk a dotted numeric path into the part tree.
///
/// Crossing a `message/rfc822` boundary re-enters the embedded message's own
/// part numbering; a path segment against a non-multipart leaf stays on that
/// leaf.
fn resolve_path<'a>(root: &'a Part, path: &str) -> Option<&'a Part> {
    let mut context = root;
    if path.is_empty() {
        return Some(context);
    }
    for segment in path.split('.') {
        let n: usize = segment.parse().ok()?;
        if n < 1 {
            return None;
        }
        if let Some(message) = context.message.as_deref() {
            context = message;
        }
        if !context.children.is_empty() {
            context = context.children.get(n - 1)?;
        }
    }
    Some(context)
}

fn header_fields(
    context: &Part,
    section: &[Node],
    negate: bool,
) -> Result<Vec<u8>, Error> {
    let list = match section.get(1) {
        Some(Node::List(items)) if 2 == section.len() => items,
        _ => {
            return Err(Error::BadArguments(format!(
                "HEADER.FIELDS{} expects a list of header fields",
                if negate { ".NOT" } else { "" }
            )))
        },
    };

    let mut wanted = Vec::new();
    for item in list {
        match item.string_value() {
            Some(name) => wanted.push(name.to_ascii_uppercase()),
            None => {
                return Err(Error::BadArguments(
                    "Invalid header field name in list".to_owned(),
                ))
            },
        }
    }

    let mut out = Vec::new();
    for line in &context.header {
        let key = line
            .splitn(2, ':')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_uppercase();
        if wanted.contains(&key) != negate {
            out.extend_from_slice(line.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }
    out.extend_from_slice(b"\r\n");
    Ok(out)
}
