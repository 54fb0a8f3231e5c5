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

//! Projection from parsed headers to the `ENVELOPE` response shape.

use super::{Address, Part};
use crate::syntax::Node;

/// Compute the ENVELOPE response for a message part.
///
/// Sender and Reply-To default to From when absent, per the RFC 3501
/// envelope rules.
pub fn envelope(part: &Part) -> Node {
    let header = &part.parsed_header;
    Node::list(vec![
        optional_string(&header.date),
        Node::qstr(header.subject.clone().unwrap_or_default()),
        address_list(&header.from, &[]),
        address_list(&header.sender, &header.from),
        address_list(&header.reply_to, &header.from),
        address_list(&header.to, &[]),
        address_list(&header.cc, &[]),
        address_list(&header.bcc, &[]),
        optional_string(&header.in_reply_to),
        optional_string(&header.message_id),
    ])
}

fn optional_string(value: &Option<String>) -> Node {
    match *value {
        Some(ref value) => Node::qstr(value.clone()),
        None => Node::Nil,
    }
}

fn address_list(addresses: &[Address], default: &[Address]) -> Node {
    let addresses = if addresses.is_empty() {
        default
    } else {
        addresses
    };
    if addresses.is_empty() {
        return Node::Nil;
    }

    Node::list(
        addresses
            .iter()
            .map(|addr| {
                let mut split = addr.address.splitn(2, '@');
                let mailbox = split.next().unwrap_or("");
                let host = split.next().unwrap_or("");
                Node::list(vec![
                    match addr.name {
                        Some(ref name) => Node::qstr(name.clone()),
                        None => Node::Nil,
                    },
                    Node::Nil,
                    Node::qstr(mailbox),
                    Node::qstr(host),
                ])
            })
            .collect(),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mime;

    #[test]
    fn envelope_shape() {
        let part = mime::parse(
            b"From: Andris Reinman <andris@kreata.ee>\r\n\
To: andris@pangalink.net\r\n\
Subject: Hello world\r\n\
Date: Wed, 23 Nov 2011 14:23:47 +0200\r\n\
Message-ID: <abc@def>\r\n\
\r\n\
body\r\n",
        );
        let node = envelope(&part);
        let items = node.as_list().unwrap();
        assert_eq!(10, items.len());
        assert_eq!(
            Node::qstr("Wed, 23 Nov 2011 14:23:47 +0200"),
            items[0]
        );
        assert_eq!(Node::qstr("Hello world"), items[1]);

        let from = items[2].as_list().unwrap();
        assert_eq!(
            Node::list(vec![
                Node::qstr("Andris Reinman"),
                Node::Nil,
                Node::qstr("andris"),
                Node::qstr("kreata.ee"),
            ]),
            from[0]
        );

        // Sender and Reply-To fall back to From
        assert_eq!(items[2], items[3]);
        assert_eq!(items[2], items[4]);

        // No Cc/Bcc/In-Reply-To
        assert_eq!(Node::Nil, items[6]);
        assert_eq!(Node::Nil, items[7]);
        assert_eq!(Node::Nil, items[8]);
        assert_eq!(Node::qstr("<abc@def>"), items[9]);
    }

    #[test]
    fn empty_headers() {
        let part = mime::parse(b"\r\nbody");
        let items = envelope(&part);
        let items = items.as_list().unwrap();
        assert_eq!(Node::Nil, items[0]);
        assert_eq!(Node::qstr(""), items[1]);
        assert_eq!(Node::Nil, items[2]);
    }
}
