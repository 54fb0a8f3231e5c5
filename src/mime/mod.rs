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

//! Just enough MIME decomposition to serve FETCH and SEARCH.
//!
//! A message is parsed once, lazily, into a [`Part`] tree: logical header
//! lines, the handful of parsed headers ENVELOPE needs, and recursive
//! children for `multipart/*` and `message/rfc822` bodies. Transfer encodings
//! are not decoded; clients of a test fixture get back exactly the octets
//! that were appended.

pub mod bodystructure;
pub mod envelope;

use memchr::memchr;

/// One node of a parsed message: the whole message, or one nested part.
#[derive(Clone, Debug, Default)]
pub struct Part {
    /// Logical (unfolded) header lines, `Key: value` each.
    pub header: Vec<String>,
    pub parsed_header: ParsedHeader,
    /// Lower-cased primary type, e.g. `text`.
    pub content_type: String,
    /// Lower-cased subtype, e.g. `plain`.
    pub content_subtype: String,
    /// Content-Type parameters in declared order, keys lower-cased.
    pub parameters: Vec<(String, String)>,
    pub encoding: String,
    /// The raw body octets of this part (everything after the blank line).
    pub body: Vec<u8>,
    /// Textual content for substring searching: the body for leaf parts,
    /// children's text concatenated for multiparts.
    pub text: String,
    /// Child parts of a `multipart/*` body.
    pub children: Vec<Part>,
    /// The embedded message of a `message/rfc822` body.
    pub message: Option<Box<Part>>,
    pub line_count: u32,
}

/// The headers ENVELOPE and SEARCH care about, pre-parsed.
#[derive(Clone, Debug, Default)]
pub struct ParsedHeader {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Address {
    pub name: Option<String>,
    pub address: String,
}

impl Part {
    /// Case-insensitive lookup of a header's value.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.header.iter().find_map(|line| {
            let ix = line.find(':')?;
            if line[..ix].trim().eq_ignore_ascii_case(name) {
                Some(line[ix + 1..].trim())
            } else {
                None
            }
        })
    }

    /// The header block as it appears on the wire, with the blank separator
    /// line.
    pub fn header_block(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for line in &self.header {
            out.extend_from_slice(line.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse raw message octets into a part tree.
pub fn parse(raw: &[u8]) -> Part {
    let (header_raw, body) = split_header(raw);
    let header = unfold_header(header_raw);

    let mut part = Part {
        body: body.to_vec(),
        line_count: count_lines(body),
        ..Part::default()
    };

    let content_type = header_lookup(&header, "Content-Type")
        .unwrap_or("text/plain")
        .to_owned();
    let (typ, subtype, parameters) = parse_content_type(&content_type);
    part.content_type = typ;
    part.content_subtype = subtype;
    part.parameters = parameters;
    part.encoding = header_lookup(&header, "Content-Transfer-Encoding")
        .unwrap_or("7bit")
        .to_ascii_lowercase();

    part.parsed_header = parse_common_headers(&header);
    part.header = header;

    if "multipart" == part.content_type {
        if let Some(boundary) = part.parameter("boundary").map(str::to_owned) {
            part.children = split_multipart(&part.body, &boundary)
                .into_iter()
                .map(|chunk| parse(chunk))
                .collect();
            part.text = part
                .children
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
        }
    } else if "message" == part.content_type && "rfc822" == part.content_subtype
    {
        let message = parse(&part.body);
        part.text = message.text.clone();
        part.message = Some(Box::new(message));
    } else {
        part.text = String::from_utf8_lossy(&part.body).into_owned();
    }

    part
}

fn split_header(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut ix = 0;
    while ix < raw.len() {
        match memchr(b'\n', &raw[ix..]) {
            Some(off) => {
                let line_end = ix + off;
                let rest = &raw[line_end + 1..];
                // A line containing nothing (or only CR) separates header
                // from body.
                let line = &raw[ix..line_end];
                if line.is_empty() || line == b"\r" {
                    return (&raw[..ix], rest);
                }
                ix = line_end + 1;
            },
            None => break,
        }
    }
    (raw, &raw[raw.len()..])
}

fn unfold_header(raw: &[u8]) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in raw.split(|&b| b'\n' == b) {
        let line = match line.last() {
            Some(&b'\r') => &line[..line.len() - 1],
            _ => line,
        };
        if line.is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(line);
        if line[0] == b' ' || line[0] == b'\t' {
            if let Some(prev) = lines.last_mut() {
                prev.push(' ');
                prev.push_str(text.trim_start());
                continue;
            }
        }
        lines.push(text.into_owned());
    }
    lines
}

fn header_lookup<'a>(lines: &'a [String], name: &str) -> Option<&'a str> {
    lines.iter().find_map(|line| {
        let ix = line.find(':')?;
        if line[..ix].trim().eq_ignore_ascii_case(name) {
            Some(line[ix + 1..].trim())
        } else {
            None
        }
    })
}

fn count_lines(body: &[u8]) -> u32 {
    if body.is_empty() {
        return 0;
    }
    let newlines = body.iter().filter(|&&b| b'\n' == b).count() as u32;
    if body.ends_with(b"\n") {
        newlines
    } else {
        newlines + 1
    }
}

fn parse_content_type(
    raw: &str,
) -> (String, String, Vec<(String, String)>) {
    let mut pieces = raw.split(';');
    let main = pieces.next().unwrap_or("").trim();
    let mut typ_split = main.splitn(2, '/');
    let typ = typ_split.next().unwrap_or("text").trim().to_ascii_lowercase();
    let subtype = typ_split
        .next()
        .unwrap_or("plain")
        .trim()
        .to_ascii_lowercase();

    let mut parameters = Vec::new();
    for piece in pieces {
        let mut kv = piece.splitn(2, '=');
        let key = kv.next().unwrap_or("").trim().to_ascii_lowercase();
        if key.is_empty() {
            continue;
        }
        let value = kv.next().unwrap_or("").trim().trim_matches('"').to_owned();
        parameters.push((key, value));
    }
    (typ, subtype, parameters)
}

fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{}", boundary);
    let close_delimiter = format!("--{}--", boundary);
    let mut chunks = Vec::new();
    let mut current_start: Option<usize> = None;
    let mut ix = 0;

    while ix <= body.len() {
        let line_end = memchr(b'\n', &body[ix..])
            .map(|off| ix + off)
            .unwrap_or(body.len());
        let mut line = &body[ix..line_end];
        if let Some(&b'\r') = line.last() {
            line = &line[..line.len() - 1];
        }

        let is_delim = line == delimiter.as_bytes();
        let is_close = line == close_delimiter.as_bytes();

        if is_delim || is_close {
            if let Some(start) = current_start.take() {
                // The delimiter line's terminator belongs to the delimiter,
                // not to the preceding part.
                let mut end = ix;
                if end > start && b'\n' == body[end - 1] {
                    end -= 1;
                    if end > start && b'\r' == body[end - 1] {
                        end -= 1;
                    }
                }
                chunks.push(&body[start..end]);
            }
            if is_close {
                break;
            }
            current_start = Some(line_end + 1);
        }

        if line_end >= body.len() {
            break;
        }
        ix = line_end + 1;
    }

    if let Some(start) = current_start {
        if start <= body.len() {
            chunks.push(&body[start..]);
        }
    }

    chunks
}

fn parse_common_headers(lines: &[String]) -> ParsedHeader {
    ParsedHeader {
        date: header_lookup(lines, "Date").map(str::to_owned),
        subject: header_lookup(lines, "Subject").map(str::to_owned),
        from: parse_addresses(header_lookup(lines, "From")),
        sender: parse_addresses(header_lookup(lines, "Sender")),
        reply_to: parse_addresses(header_lookup(lines, "Reply-To")),
        to: parse_addresses(header_lookup(lines, "To")),
        cc: parse_addresses(header_lookup(lines, "Cc")),
        bcc: parse_addresses(header_lookup(lines, "Bcc")),
        message_id: header_lookup(lines, "Message-ID").map(str::to_owned),
        in_reply_to: header_lookup(lines, "In-Reply-To").map(str::to_owned),
    }
}

fn parse_addresses(raw: Option<&str>) -> Vec<Address> {
    let raw = match raw {
        Some(raw) => raw,
        None => return Vec::new(),
    };

    split_address_list(raw)
        .into_iter()
        .filter_map(|chunk| parse_address(&chunk))
        .collect()
}

/// Split an address list on commas, ignoring commas inside quoted strings.
fn split_address_list(raw: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in raw.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            },
            ',' if !quoted => {
                chunks.push(std::mem::take(&mut current));
            },
            _ => current.push(c),
        }
    }
    chunks.push(current);
    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

fn parse_address(raw: &str) -> Option<Address> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(open) = raw.rfind('<') {
        let close = raw[open..].find('>').map(|ix| open + ix)?;
        let address = raw[open + 1..close].trim().to_owned();
        let name = raw[..open].trim().trim_matches('"').trim();
        Some(Address {
            name: if name.is_empty() {
                None
            } else {
                Some(name.to_owned())
            },
            address,
        })
    } else {
        Some(Address {
            name: None,
            address: raw.to_owned(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SIMPLE: &[u8] = b"From: Andris Reinman <andris@kreata.ee>\r\n\
To: andris@pangalink.net, juulika <juulika@kreata.ee>\r\n\
Subject: Hello world\r\n\
Date: Wed, 23 Nov 2011 14:23:47 +0200\r\n\
Message-ID: <abc@def>\r\n\
\r\n\
World, hello!\r\n";

    #[test]
    fn parse_simple_message() {
        let part = parse(SIMPLE);
        assert_eq!("text", part.content_type);
        assert_eq!("plain", part.content_subtype);
        assert_eq!(b"World, hello!\r\n".to_vec(), part.body);
        assert_eq!("World, hello!\r\n", part.text);
        assert_eq!(5, part.header.len());
        assert_eq!(Some("Hello world"), part.header_value("subject"));
        assert_eq!(
            Some("Hello world".to_owned()),
            part.parsed_header.subject
        );
        assert_eq!(
            vec![Address {
                name: Some("Andris Reinman".to_owned()),
                address: "andris@kreata.ee".to_owned(),
            }],
            part.parsed_header.from
        );
        assert_eq!(
            vec![
                Address {
                    name: None,
                    address: "andris@pangalink.net".to_owned(),
                },
                Address {
                    name: Some("juulika".to_owned()),
                    address: "juulika@kreata.ee".to_owned(),
                },
            ],
            part.parsed_header.to
        );
    }

    #[test]
    fn header_unfolding() {
        let part = parse(
            b"Subject: part one\r\n folded tail\r\nX-Other: yes\r\n\r\nbody",
        );
        assert_eq!(
            Some("part one folded tail"),
            part.header_value("Subject")
        );
        assert_eq!(2, part.header.len());
    }

    #[test]
    fn parse_multipart() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
\r\n\
preamble\r\n\
--sep\r\n\
Content-Type: text/plain\r\n\
\r\n\
part one\r\n\
--sep\r\n\
Content-Type: text/html\r\n\
\r\n\
<b>part two</b>\r\n\
--sep--\r\n";
        let part = parse(raw);
        assert_eq!("multipart", part.content_type);
        assert_eq!(2, part.children.len());
        assert_eq!(b"part one".to_vec(), part.children[0].body);
        assert_eq!("html", part.children[1].content_subtype);
        assert_eq!(b"<b>part two</b>".to_vec(), part.children[1].body);
        assert!(part.text.contains("part one"));
        assert!(part.text.contains("part two"));
    }

    #[test]
    fn parse_embedded_message() {
        let raw = b"Content-Type: message/rfc822\r\n\
\r\n\
Subject: inner\r\n\
\r\n\
inner body\r\n";
        let part = parse(raw);
        let inner = part.message.as_ref().unwrap();
        assert_eq!(
            Some("inner".to_owned()),
            inner.parsed_header.subject
        );
        assert_eq!(b"inner body\r\n".to_vec(), inner.body);
    }

    #[test]
    fn header_block_round_trip() {
        let part = parse(SIMPLE);
        let block = part.header_block();
        assert!(block.starts_with(b"From: Andris Reinman"));
        assert!(block.ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn missing_header_and_body() {
        let part = parse(b"no header separator here");
        assert!(part.body.is_empty());
        let part = parse(b"");
        assert!(part.header.is_empty());
        assert!(part.body.is_empty());
    }

    #[test]
    fn content_type_parameters() {
        let part = parse(
            b"Content-Type: TEXT/Plain; charset=\"utf-8\"; format=flowed\r\n\
\r\n\
x",
        );
        assert_eq!("text", part.content_type);
        assert_eq!(Some("utf-8"), part.parameter("charset"));
        assert_eq!(Some("flowed"), part.parameter("format"));
    }
}
