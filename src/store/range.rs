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

//! Sequence-set resolution against a message snapshot.
//!
//! A sequence set is a comma-separated list of `n`, `n:m`, `n:*` or `*:n`
//! tokens. `*` resolves to the highest sequence number when matching by
//! sequence, or the highest UID actually present when matching by UID.
//! Endpoints may arrive in either order. An empty result is a normal
//! outcome, not an error.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use super::model::MessageRef;

lazy_static! {
    static ref SEQUENCE_SET: Regex = Regex::new(r"^[0-9,:*]+$").unwrap();
}

/// Whether `spec` is lexically a sequence set.
///
/// SEARCH uses this to decide that an unrecognised keyword is actually the
/// bare sequence-set shorthand.
pub fn is_sequence_set(spec: &str) -> bool {
    SEQUENCE_SET.is_match(spec)
}

/// Resolve `spec` against `messages`, returning `(sequence number, message)`
/// pairs in mailbox order.
pub fn message_range(
    messages: &[MessageRef],
    spec: &str,
    by_uid: bool,
) -> Vec<(u32, MessageRef)> {
    let max_uid = messages
        .iter()
        .map(|m| m.lock().unwrap().uid)
        .max()
        .unwrap_or(0);
    let total = if by_uid {
        max_uid
    } else {
        messages.len() as u32
    };

    let ranges: Vec<(u32, u32)> = spec
        .split(',')
        .filter_map(|token| parse_token(token, total))
        .collect();

    let mut result = Vec::new();
    for (ix, message) in messages.iter().enumerate() {
        let nr = if by_uid {
            message.lock().unwrap().uid
        } else {
            ix as u32 + 1
        };
        if ranges.iter().any(|&(from, to)| nr >= from && nr <= to) {
            result.push((ix as u32 + 1, Arc::clone(message)));
        }
    }
    result
}

fn parse_token(token: &str, total: u32) -> Option<(u32, u32)> {
    let mut parts = token.splitn(2, ':');
    let from = parse_endpoint(parts.next()?, total)?;
    let to = match parts.next() {
        Some(part) => parse_endpoint(part, total)?,
        None => from,
    };
    Some((from.min(to), from.max(to)))
}

fn parse_endpoint(raw: &str, total: u32) -> Option<u32> {
    if "*" == raw {
        Some(total)
    } else {
        raw.parse().ok()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use proptest::prelude::*;

    use super::super::model::Message;
    use super::*;

    fn messages(uids: &[u32]) -> Vec<MessageRef> {
        uids.iter()
            .map(|&uid| {
                let mut m = Message::new(Vec::new());
                m.uid = uid;
                Arc::new(Mutex::new(m))
            })
            .collect()
    }

    fn uids_of(result: Vec<(u32, MessageRef)>) -> Vec<u32> {
        result
            .into_iter()
            .map(|(_, m)| m.lock().unwrap().uid)
            .collect()
    }

    fn seqs_of(result: Vec<(u32, MessageRef)>) -> Vec<u32> {
        result.into_iter().map(|(seq, _)| seq).collect()
    }

    #[test]
    fn uid_splat_range() {
        let msgs = messages(&[500, 600, 601, 602]);
        assert_eq!(
            vec![600, 601, 602],
            uids_of(message_range(&msgs, "600:*", true))
        );
        // Endpoints normalise, so *:600 is the same set.
        assert_eq!(
            vec![600, 601, 602],
            uids_of(message_range(&msgs, "*:600", true))
        );
    }

    #[test]
    fn sequence_ranges_ignore_uid_values() {
        let msgs = messages(&[500, 600, 601, 602]);
        assert_eq!(vec![2, 3], seqs_of(message_range(&msgs, "2:3", false)));
        assert_eq!(vec![4], seqs_of(message_range(&msgs, "*", false)));
        assert_eq!(
            vec![1, 2, 3, 4],
            seqs_of(message_range(&msgs, "1:*", false))
        );
    }

    #[test]
    fn comma_separated_tokens_union() {
        let msgs = messages(&[10, 20, 30, 40, 50]);
        assert_eq!(
            vec![1, 3, 4, 5],
            seqs_of(message_range(&msgs, "1,3:4,5", false))
        );
        assert_eq!(
            vec![10, 30, 40],
            uids_of(message_range(&msgs, "10,25:45", true))
        );
    }

    #[test]
    fn empty_results_are_valid() {
        let msgs = messages(&[1, 2, 3]);
        assert!(message_range(&msgs, "7:9", false).is_empty());
        assert!(message_range(&msgs, "100:200", true).is_empty());
        assert!(message_range(&[], "1:*", false).is_empty());
        assert!(message_range(&msgs, "garbage", false).is_empty());
    }

    #[test]
    fn sequence_set_lexing() {
        assert!(is_sequence_set("1"));
        assert!(is_sequence_set("1:*"));
        assert!(is_sequence_set("1,3:4,*"));
        assert!(!is_sequence_set("SEEN"));
        assert!(!is_sequence_set("1:x"));
        assert!(!is_sequence_set(""));
    }

    proptest! {
        // Any single n:m token yields exactly the messages whose sequence
        // number falls in the normalised interval.
        #[test]
        fn range_token_matches_interval(
            len in 0usize..20,
            a in 1u32..30,
            b in 1u32..30,
        ) {
            let uids: Vec<u32> = (1..=len as u32).collect();
            let msgs = messages(&uids);
            let spec = format!("{}:{}", a, b);
            let got = seqs_of(message_range(&msgs, &spec, false));
            let (lo, hi) = (a.min(b), a.max(b));
            let expected: Vec<u32> = (1..=len as u32)
                .filter(|&n| n >= lo && n <= hi)
                .collect();
            prop_assert_eq!(expected, got);
        }
    }
}
