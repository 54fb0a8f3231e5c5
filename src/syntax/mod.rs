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

//! The wire-level command and response model.
//!
//! Everything that crosses a connection is expressed as a [`Node`] tree: a
//! closed set of variants covering atoms (with their optional
//! `BODY[section]<partial>` suffixes), quoted strings, literals, numbers,
//! `NIL`, parenthesised lists, bracketed response-code sections, and raw
//! trailing text. Commands are parsed into this shape by [`parse`], and
//! responses are rendered back to octets here. No other module touches wire
//! syntax.

use std::borrow::Cow;

mod parse;

pub use self::parse::{best_effort_tag, parse_command};

/// One node of the wire syntax tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// A bare atom, possibly carrying a `[section]` and `<partial>` suffix.
    Atom(Atom),
    /// A quoted string.
    Str(String),
    /// A `{n}`-prefixed octet string.
    Literal(Vec<u8>),
    /// A bare number. Only produced when rendering responses; on input,
    /// digit-only words stay atoms so sequence sets and numeric arguments
    /// are handled uniformly.
    Num(u32),
    Nil,
    /// A parenthesised list.
    List(Vec<Node>),
    /// A `[...]` response code group. Output only.
    Section(Vec<Node>),
    /// Raw human-readable text. Output only.
    Text(String),
}

/// The atom variant's payload.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Atom {
    pub value: String,
    /// `BODY[...]` body section tokens, when present. `Some(vec![])` is
    /// `BODY[]`.
    pub section: Option<Vec<Node>>,
    /// `<start.length>` partial range, when present.
    pub partial: Option<(u32, Option<u32>)>,
}

impl Node {
    pub fn atom(value: impl Into<String>) -> Self {
        Node::Atom(Atom {
            value: value.into(),
            section: None,
            partial: None,
        })
    }

    pub fn qstr(value: impl Into<String>) -> Self {
        Node::Str(value.into())
    }

    pub fn literal(value: impl Into<Vec<u8>>) -> Self {
        Node::Literal(value.into())
    }

    pub fn num(value: u32) -> Self {
        Node::Num(value)
    }

    pub fn list(items: Vec<Node>) -> Self {
        Node::List(items)
    }

    pub fn section(items: Vec<Node>) -> Self {
        Node::Section(items)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Node::Text(value.into())
    }

    /// The string payload of an atom, quoted string, or literal.
    ///
    /// This is the shape most argument validation wants: the three forms are
    /// interchangeable carriers for names, flags, and values.
    pub fn string_value(&self) -> Option<Cow<'_, str>> {
        match *self {
            Node::Atom(ref a) => Some(Cow::Borrowed(&a.value)),
            Node::Str(ref s) => Some(Cow::Borrowed(s)),
            Node::Literal(ref bytes) => Some(String::from_utf8_lossy(bytes)),
            _ => None,
        }
    }

    /// Whether this node is a bare atom (sequence sets arrive this way).
    pub fn is_atom(&self) -> bool {
        matches!(*self, Node::Atom(..))
    }

    /// Whether this node is a quoted string or literal, the two forms that
    /// carry free-form client-supplied strings.
    pub fn is_string(&self) -> bool {
        matches!(*self, Node::Str(..) | Node::Literal(..))
    }

    pub fn as_atom(&self) -> Option<&Atom> {
        match *self {
            Node::Atom(ref a) => Some(a),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match *self {
            Node::List(ref items) => Some(items),
            _ => None,
        }
    }
}

/// A parsed command line.
///
/// `verb` is upper-cased and includes the second word for the two-word
/// commands (`UID FETCH`, `AUTHENTICATE PLAIN`). `args` is `None` when the
/// command had no arguments at all, which several handlers distinguish from
/// an empty argument list.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub tag: String,
    pub verb: String,
    pub args: Option<Vec<Node>>,
    /// Modifiers stripped out of `args` by capability wrappers before the
    /// base handler runs.
    pub modifiers: Modifiers,
}

/// Typed side-band state attached to a command by capability wrappers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Modifiers {
    pub changed_since: Option<u64>,
    pub unchanged_since: Option<u64>,
    pub condstore_option: bool,
    pub list_special_use_only: bool,
    pub list_special_use_flags: bool,
}

/// A response condition word.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cond {
    Ok,
    No,
    Bad,
    Bye,
}

impl Cond {
    pub fn name(self) -> &'static str {
        match self {
            Cond::Ok => "OK",
            Cond::No => "NO",
            Cond::Bad => "BAD",
            Cond::Bye => "BYE",
        }
    }
}

/// One response line, before rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    /// `*` for untagged responses, otherwise the originating command's tag.
    pub tag: String,
    /// The response name (`OK`, `LIST`, `SEARCH`, ...). `None` for responses
    /// of the `* 3 EXISTS` shape, where the name is inside `args`.
    pub verb: Option<String>,
    pub args: Vec<Node>,
}

impl Response {
    pub fn untagged(verb: impl Into<String>, args: Vec<Node>) -> Self {
        Response {
            tag: "*".to_owned(),
            verb: Some(verb.into()),
            args,
        }
    }

    /// An untagged response with no verb, e.g. `* 3 EXISTS`.
    pub fn bare(args: Vec<Node>) -> Self {
        Response {
            tag: "*".to_owned(),
            verb: None,
            args,
        }
    }

    pub fn cond(
        tag: impl Into<String>,
        cond: Cond,
        quip: impl Into<String>,
    ) -> Self {
        Response {
            tag: tag.into(),
            verb: Some(cond.name().to_owned()),
            args: vec![Node::text(quip)],
        }
    }

    pub fn is_tagged(&self) -> bool {
        "*" != self.tag && "+" != self.tag
    }

    /// Render this response, without the trailing CRLF.
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.tag.as_bytes());
        if let Some(ref verb) = self.verb {
            out.push(b' ');
            out.extend_from_slice(verb.as_bytes());
        }
        for node in &self.args {
            out.push(b' ');
            write_node(node, &mut out);
        }
        out
    }

    /// Render this response as a full line.
    pub fn render_line(&self) -> Vec<u8> {
        let mut out = self.render();
        out.extend_from_slice(b"\r\n");
        out
    }
}

fn write_node(node: &Node, out: &mut Vec<u8>) {
    match *node {
        Node::Atom(ref a) => {
            out.extend_from_slice(a.value.as_bytes());
            if let Some(ref section) = a.section {
                out.push(b'[');
                write_nodes(section, out);
                out.push(b']');
            }
            match a.partial {
                Some((start, Some(len))) => {
                    out.extend_from_slice(
                        format!("<{}.{}>", start, len).as_bytes(),
                    );
                },
                Some((start, None)) => {
                    out.extend_from_slice(format!("<{}>", start).as_bytes());
                },
                None => (),
            }
        },
        Node::Str(ref s) => {
            out.push(b'"');
            for &b in s.as_bytes() {
                if b'"' == b || b'\\' == b {
                    out.push(b'\\');
                }
                out.push(b);
            }
            out.push(b'"');
        },
        Node::Literal(ref bytes) => {
            out.extend_from_slice(format!("{{{}}}\r\n", bytes.len()).as_bytes());
            out.extend_from_slice(bytes);
        },
        Node::Num(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Node::Nil => out.extend_from_slice(b"NIL"),
        Node::List(ref items) => {
            out.push(b'(');
            write_nodes(items, out);
            out.push(b')');
        },
        Node::Section(ref items) => {
            out.push(b'[');
            write_nodes(items, out);
            out.push(b']');
        },
        Node::Text(ref s) => out.extend_from_slice(s.as_bytes()),
    }
}

fn write_nodes(nodes: &[Node], out: &mut Vec<u8>) {
    for (ix, node) in nodes.iter().enumerate() {
        if ix > 0 {
            out.push(b' ');
        }
        write_node(node, out);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rendered(resp: Response) -> String {
        String::from_utf8(resp.render()).unwrap()
    }

    #[test]
    fn render_cond_responses() {
        assert_eq!(
            "a1 OK Completed",
            rendered(Response::cond("a1", Cond::Ok, "Completed"))
        );
        assert_eq!(
            "* BYE LOGOUT received",
            rendered(Response::cond("*", Cond::Bye, "LOGOUT received"))
        );
    }

    #[test]
    fn render_bare_and_list_responses() {
        assert_eq!(
            "* 3 EXISTS",
            rendered(Response::bare(vec![Node::num(3), Node::atom("EXISTS")]))
        );
        assert_eq!(
            "* LIST (\\HasNoChildren) \"/\" \"INBOX\"",
            rendered(Response::untagged(
                "LIST",
                vec![
                    Node::list(vec![Node::atom("\\HasNoChildren")]),
                    Node::qstr("/"),
                    Node::qstr("INBOX"),
                ]
            ))
        );
    }

    #[test]
    fn render_section_and_literal() {
        assert_eq!(
            "* OK [UIDNEXT 3] Predicted next UID",
            rendered(Response::untagged(
                "OK",
                vec![
                    Node::section(vec![Node::atom("UIDNEXT"), Node::num(3)]),
                    Node::text("Predicted next UID"),
                ]
            ))
        );
        assert_eq!(
            "* 1 FETCH (BODY[HEADER] {5}\r\nhello)",
            rendered(Response::bare(vec![
                Node::num(1),
                Node::atom("FETCH"),
                Node::list(vec![
                    Node::Atom(Atom {
                        value: "BODY".to_owned(),
                        section: Some(vec![Node::atom("HEADER")]),
                        partial: None,
                    }),
                    Node::literal(&b"hello"[..]),
                ]),
            ]))
        );
    }

    #[test]
    fn render_quoting() {
        assert_eq!(
            "* X \"say \\\"hi\\\" \\\\ bye\"",
            rendered(Response::untagged(
                "X",
                vec![Node::qstr("say \"hi\" \\ bye")]
            ))
        );
    }

    #[test]
    fn render_partial_suffixes() {
        let mut atom = Atom {
            value: "BODY".to_owned(),
            section: Some(vec![]),
            partial: Some((0, Some(10))),
        };
        let mut out = Vec::new();
        write_node(&Node::Atom(atom.clone()), &mut out);
        assert_eq!(b"BODY[]<0.10>".to_vec(), out);

        atom.partial = Some((5, None));
        out.clear();
        write_node(&Node::Atom(atom), &mut out);
        assert_eq!(b"BODY[]<5>".to_vec(), out);
    }
}
