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

//! Parser from a framed command line to [`Command`].
//!
//! The input here is one complete command as assembled by the framer, with
//! any literal octets already present in-line (i.e. `{5}\r\nhello` appears
//! verbatim in the buffer). Parsing therefore never needs to suspend; a
//! malformed line is simply an error.

use std::str;

use nom::branch::alt;
use nom::bytes::complete::{tag, take, take_while, take_while1};
use nom::combinator::opt;
use nom::IResult;

use super::{Atom, Command, Modifiers, Node};
use crate::support::error::Error;

fn is_atom_char(b: u8) -> bool {
    !matches!(
        b,
        b' ' | b'(' | b')' | b'"' | b'{' | b'}' | b'[' | b']' | b'<' | b'\r'
            | b'\n'
    )
}

fn spaces(i: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while(|b| b' ' == b)(i)
}

fn number(i: &[u8]) -> IResult<&[u8], u32> {
    let (i, digits) = take_while1(|b: u8| b.is_ascii_digit())(i)?;
    let n = str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| {
            nom::Err::Error((i, nom::error::ErrorKind::Digit))
        })?;
    Ok((i, n))
}

fn quoted(i: &[u8]) -> IResult<&[u8], Node> {
    let (mut i, _) = tag(b"\"")(i)?;
    let mut value = Vec::new();
    loop {
        match i.split_first() {
            Some((&b'"', rest)) => {
                let value = String::from_utf8_lossy(&value).into_owned();
                return Ok((rest, Node::Str(value)));
            },
            Some((&b'\\', rest)) => match rest.split_first() {
                Some((&b, rest)) => {
                    value.push(b);
                    i = rest;
                },
                None => {
                    return Err(nom::Err::Error((
                        i,
                        nom::error::ErrorKind::Escaped,
                    )))
                },
            },
            Some((&b, rest)) => {
                value.push(b);
                i = rest;
            },
            None => {
                return Err(nom::Err::Error((
                    i,
                    nom::error::ErrorKind::Tag,
                )))
            },
        }
    }
}

fn literal(i: &[u8]) -> IResult<&[u8], Node> {
    let (i, _) = tag(b"{")(i)?;
    let (i, len) = number(i)?;
    let (i, _) = opt(tag(b"+"))(i)?;
    let (i, _) = tag(b"}")(i)?;
    let (i, _) = alt((tag(b"\r\n"), tag(b"\n")))(i)?;
    let (i, bytes) = take(len as usize)(i)?;
    Ok((i, Node::Literal(bytes.to_vec())))
}

fn list(i: &[u8]) -> IResult<&[u8], Node> {
    let (i, _) = tag(b"(")(i)?;
    let (i, items) = nodes(i)?;
    let (i, _) = spaces(i)?;
    let (i, _) = tag(b")")(i)?;
    Ok((i, Node::List(items)))
}

fn partial(i: &[u8]) -> IResult<&[u8], (u32, Option<u32>)> {
    let (i, _) = tag(b"<")(i)?;
    let (i, start) = number(i)?;
    let (i, len) = opt(|i| {
        let (i, _) = tag(b".")(i)?;
        number(i)
    })(i)?;
    let (i, _) = tag(b">")(i)?;
    Ok((i, (start, len)))
}

fn atom(i: &[u8]) -> IResult<&[u8], Node> {
    let (i, value) = take_while1(is_atom_char)(i)?;
    let value = String::from_utf8_lossy(value).into_owned();

    let (i, section) = opt(|i| {
        let (i, _) = tag(b"[")(i)?;
        let (i, items) = nodes(i)?;
        let (i, _) = spaces(i)?;
        let (i, _) = tag(b"]")(i)?;
        Ok((i, items))
    })(i)?;
    let (i, partial) = opt(partial)(i)?;

    if section.is_none() && partial.is_none() && value.eq_ignore_ascii_case("NIL")
    {
        return Ok((i, Node::Nil));
    }

    Ok((
        i,
        Node::Atom(Atom {
            value,
            section,
            partial,
        }),
    ))
}

fn node(i: &[u8]) -> IResult<&[u8], Node> {
    alt((list, quoted, literal, atom))(i)
}

fn nodes(i: &[u8]) -> IResult<&[u8], Vec<Node>> {
    let mut items = Vec::new();
    let mut i = i;
    loop {
        let (rest, _) = spaces(i)?;
        match node(rest) {
            Ok((rest, item)) => {
                items.push(item);
                i = rest;
            },
            Err(_) => return Ok((i, items)),
        }
    }
}

fn word(i: &[u8]) -> IResult<&[u8], &str> {
    let (i, w) = take_while1(|b| b' ' != b && b'\r' != b && b'\n' != b)(i)?;
    match str::from_utf8(w) {
        Ok(w) => Ok((i, w)),
        Err(_) => Err(nom::Err::Error((i, nom::error::ErrorKind::Char))),
    }
}

/// Extract the best-effort tag from an unparsable command line, for use in
/// the tagged half of the error report.
pub fn best_effort_tag(line: &[u8]) -> String {
    line.split(|&b| b' ' == b)
        .find(|w| !w.is_empty())
        .map(|w| String::from_utf8_lossy(w).into_owned())
        .unwrap_or_else(|| "*".to_owned())
}

/// Parse one complete command line.
pub fn parse_command(line: &[u8]) -> Result<Command, Error> {
    fn inner(i: &[u8]) -> IResult<&[u8], Command> {
        let (i, _) = spaces(i)?;
        let (i, tag_word) = word(i)?;
        let tag_word = tag_word.to_owned();

        let (i, _) = spaces(i)?;
        let (i, first) = word(i)?;
        let mut verb = first.to_ascii_uppercase();

        // UID and AUTHENTICATE dispatch on the combined two-word verb.
        let (i, verb) = if "UID" == verb || "AUTHENTICATE" == verb {
            let (i, _) = spaces(i)?;
            match word(i) {
                Ok((i, second)) => {
                    verb.push(' ');
                    verb.push_str(&second.to_ascii_uppercase());
                    (i, verb)
                },
                Err(_) => (i, verb),
            }
        } else {
            (i, verb)
        };

        let (i, gap) = spaces(i)?;
        if i.is_empty() {
            return Ok((
                i,
                Command {
                    tag: tag_word,
                    verb,
                    args: None,
                    modifiers: Modifiers::default(),
                },
            ));
        }
        if gap.is_empty() {
            return Err(nom::Err::Error((i, nom::error::ErrorKind::Space)));
        }

        let (i, args) = nodes(i)?;
        let (i, _) = spaces(i)?;
        Ok((
            i,
            Command {
                tag: tag_word,
                verb,
                args: Some(args),
                modifiers: Modifiers::default(),
            },
        ))
    }

    match inner(line) {
        Ok((rest, command)) if rest.is_empty() => Ok(command),
        _ => Err(Error::BadArguments("Error parsing command".to_owned())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parsed(line: &str) -> Command {
        parse_command(line.as_bytes()).unwrap()
    }

    fn args(line: &str) -> Vec<Node> {
        parsed(line).args.unwrap()
    }

    #[test]
    fn parse_simple_commands() {
        let cmd = parsed("a1 CAPABILITY");
        assert_eq!("a1", cmd.tag);
        assert_eq!("CAPABILITY", cmd.verb);
        assert_eq!(None, cmd.args);

        let cmd = parsed("a2 login testuser demo");
        assert_eq!("LOGIN", cmd.verb);
        assert_eq!(
            Some(vec![Node::atom("testuser"), Node::atom("demo")]),
            cmd.args
        );
    }

    #[test]
    fn parse_two_word_verbs() {
        assert_eq!("UID FETCH", parsed("a1 uid fetch 1:* FLAGS").verb);
        assert_eq!(
            "AUTHENTICATE PLAIN",
            parsed("a2 AUTHENTICATE PLAIN").verb
        );
        // A dangling UID keeps the one-word verb, which simply has no
        // handler.
        assert_eq!("UID", parsed("a3 UID").verb);
    }

    #[test]
    fn parse_strings_and_literals() {
        assert_eq!(
            vec![Node::qstr("IN BOX"), Node::Str("d\"q".to_owned())],
            args("a1 SELECT \"IN BOX\" \"d\\\"q\"")
        );
        assert_eq!(
            vec![Node::atom("INBOX"), Node::literal(&b"hello"[..])],
            args("a2 X INBOX {5}\r\nhello")
        );
        // LITERAL+ markers parse the same way.
        assert_eq!(
            vec![Node::literal(&b"hi\r\nthere"[..])],
            args("a3 X {9+}\r\nhi\r\nthere")
        );
    }

    #[test]
    fn parse_lists_and_nil() {
        assert_eq!(
            vec![
                Node::atom("INBOX"),
                Node::list(vec![
                    Node::atom("\\Seen"),
                    Node::list(vec![Node::atom("nested")]),
                ]),
                Node::Nil,
            ],
            args("a1 X INBOX (\\Seen (nested)) NIL")
        );
        assert_eq!(vec![Node::list(vec![])], args("a2 X ()"));
    }

    #[test]
    fn parse_body_sections() {
        let cmd_args = args("a1 FETCH 1 (BODY[HEADER.FIELDS (From To)])");
        let list = cmd_args[1].as_list().unwrap();
        let atom = list[0].as_atom().unwrap();
        assert_eq!("BODY", atom.value);
        assert_eq!(
            Some(vec![
                Node::atom("HEADER.FIELDS"),
                Node::list(vec![Node::atom("From"), Node::atom("To")]),
            ]),
            atom.section
        );

        let cmd_args = args("a2 FETCH 1 BODY.PEEK[1.2.TEXT]<0.128>");
        let atom = cmd_args[1].as_atom().unwrap();
        assert_eq!("BODY.PEEK", atom.value);
        assert_eq!(Some(vec![Node::atom("1.2.TEXT")]), atom.section);
        assert_eq!(Some((0, Some(128))), atom.partial);

        let cmd_args = args("a3 FETCH 1 BODY[]");
        let atom = cmd_args[1].as_atom().unwrap();
        assert_eq!(Some(vec![]), atom.section);
    }

    #[test]
    fn parse_sequence_sets_stay_atoms() {
        assert_eq!(
            vec![Node::atom("1:*"), Node::atom("FLAGS")],
            args("a1 FETCH 1:* FLAGS")
        );
        assert_eq!(
            vec![Node::atom("2,4:7,*"), Node::atom("FLAGS")],
            args("a2 FETCH 2,4:7,* FLAGS")
        );
    }

    #[test]
    fn parse_failures() {
        assert!(parse_command(b"").is_err());
        assert!(parse_command(b"a1 X \"unterminated").is_err());
        assert!(parse_command(b"a1 X (unbalanced").is_err());
        assert!(parse_command(b"a1 X {5}\r\nhi").is_err());
    }

    #[test]
    fn best_effort_tags() {
        assert_eq!("a1", best_effort_tag(b"a1 ???"));
        assert_eq!("*", best_effort_tag(b""));
    }
}
