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

//! SEARCH criteria composition and evaluation.
//!
//! Composition consumes the flat token list left to right against a
//! per-keyword arity table; `NOT` and `OR` recurse into nested keys. A token
//! that is not a known keyword but lexes as a sequence set becomes the bare
//! sequence-set predicate; anything else is a hard error.
//!
//! Evaluation runs each top-level key against the full message snapshot and
//! intersects the results in declared order. Value parsing (dates, sizes) is
//! deliberately lenient at evaluation time: an unparsable operand simply
//! matches nothing.

use std::collections::{BTreeSet, HashMap};

use crate::store::model::MessageRef;
use crate::store::range::{is_sequence_set, message_range};
use crate::support::chronox;
use crate::support::error::Error;

/// One node of the compiled search query.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchKey {
    /// Bare sequence-set shorthand.
    Sequence(String),
    All,
    Answered,
    Deleted,
    Draft,
    Flagged,
    New,
    Old,
    Recent,
    Seen,
    Unanswered,
    Undeleted,
    Undraft,
    Unflagged,
    Unseen,
    Keyword(String),
    Unkeyword(String),
    Bcc(String),
    Cc(String),
    From(String),
    To(String),
    Subject(String),
    Header(String, String),
    Body(String),
    Text(String),
    Before(String),
    On(String),
    Since(String),
    SentBefore(String),
    SentOn(String),
    SentSince(String),
    Larger(String),
    Smaller(String),
    Uid(String),
    Not(Box<SearchKey>),
    Or(Box<SearchKey>, Box<SearchKey>),
    /// A capability-registered key with its collected value operands.
    Ext(String, Vec<String>),
}

/// Hook for capability-registered search keys.
pub trait ExtSearch {
    /// Number of value operands for `key`, or `None` if unknown.
    fn arity(&self, key: &str) -> Option<usize>;
    /// Whether `message` (1-based position `seq`) matches `key`.
    fn matches(
        &self,
        key: &str,
        message: &MessageRef,
        seq: u32,
        args: &[String],
    ) -> bool;
}

/// The no-extensions hook.
pub struct NoExt;

impl ExtSearch for NoExt {
    fn arity(&self, _: &str) -> Option<usize> {
        None
    }

    fn matches(&self, _: &str, _: &MessageRef, _: u32, _: &[String]) -> bool {
        false
    }
}

/// The outcome of a search: matched messages in mailbox order, plus the
/// UID to sequence-number mapping valid for the evaluated snapshot.
#[derive(Debug, Default)]
pub struct SearchResult {
    pub matched: Vec<MessageRef>,
    pub numbers: HashMap<u32, u32>,
}

/// Compose and evaluate `params` against `messages`.
///
/// A leading `CHARSET <name>` pair is consumed and ignored; all matching is
/// byte-wise and ASCII-case-insensitive.
pub fn search(
    messages: &[MessageRef],
    params: &[String],
    ext: &dyn ExtSearch,
) -> Result<SearchResult, Error> {
    let mut params = params;
    if params
        .first()
        .map(|p| p.eq_ignore_ascii_case("CHARSET"))
        .unwrap_or(false)
    {
        params = params.get(2..).unwrap_or(&[]);
    }

    let keys = compose(params, ext)?;
    evaluate(messages, &keys, ext)
}

/// Compose the flat token list into top-level keys.
pub fn compose(
    params: &[String],
    ext: &dyn ExtSearch,
) -> Result<Vec<SearchKey>, Error> {
    let mut pos = 0;
    let mut keys = Vec::new();
    while pos < params.len() {
        keys.push(parse_key(params, &mut pos, ext)?);
    }
    Ok(keys)
}

fn parse_key(
    params: &[String],
    pos: &mut usize,
    ext: &dyn ExtSearch,
) -> Result<SearchKey, Error> {
    let word = params[*pos].clone();
    *pos += 1;
    let upper = word.to_ascii_uppercase();

    fn take_value(
        params: &[String],
        pos: &mut usize,
        key: &str,
    ) -> Result<String, Error> {
        let v = params
            .get(*pos)
            .cloned()
            .ok_or_else(|| Error::BadSearchKey(key.to_owned()))?;
        *pos += 1;
        Ok(v)
    }
    macro_rules! value {
        ($pos:expr) => {
            take_value(params, $pos, &word)?
        };
    }

    Ok(match upper.as_str() {
        "ALL" => SearchKey::All,
        "ANSWERED" => SearchKey::Answered,
        "DELETED" => SearchKey::Deleted,
        "DRAFT" => SearchKey::Draft,
        "FLAGGED" => SearchKey::Flagged,
        "NEW" => SearchKey::New,
        "OLD" => SearchKey::Old,
        "RECENT" => SearchKey::Recent,
        "SEEN" => SearchKey::Seen,
        "UNANSWERED" => SearchKey::Unanswered,
        "UNDELETED" => SearchKey::Undeleted,
        "UNDRAFT" => SearchKey::Undraft,
        "UNFLAGGED" => SearchKey::Unflagged,
        "UNSEEN" => SearchKey::Unseen,
        "KEYWORD" => SearchKey::Keyword(value!(pos)),
        "UNKEYWORD" => SearchKey::Unkeyword(value!(pos)),
        "BCC" => SearchKey::Bcc(value!(pos)),
        "CC" => SearchKey::Cc(value!(pos)),
        "FROM" => SearchKey::From(value!(pos)),
        "TO" => SearchKey::To(value!(pos)),
        "SUBJECT" => SearchKey::Subject(value!(pos)),
        "HEADER" => {
            let name = value!(pos);
            let val = value!(pos);
            SearchKey::Header(name, val)
        },
        "BODY" => SearchKey::Body(value!(pos)),
        "TEXT" => SearchKey::Text(value!(pos)),
        "BEFORE" => SearchKey::Before(value!(pos)),
        "ON" => SearchKey::On(value!(pos)),
        "SINCE" => SearchKey::Since(value!(pos)),
        "SENTBEFORE" => SearchKey::SentBefore(value!(pos)),
        "SENTON" => SearchKey::SentOn(value!(pos)),
        "SENTSINCE" => SearchKey::SentSince(value!(pos)),
        "LARGER" => SearchKey::Larger(value!(pos)),
        "SMALLER" => SearchKey::Smaller(value!(pos)),
        "UID" => SearchKey::Uid(value!(pos)),
        "NOT" => {
            if *pos >= params.len() {
                return Err(Error::BadSearchKey(word));
            }
            SearchKey::Not(Box::new(parse_key(params, pos, ext)?))
        },
        "OR" => {
            if *pos >= params.len() {
                return Err(Error::BadSearchKey(word));
            }
            let a = parse_key(params, pos, ext)?;
            if *pos >= params.len() {
                return Err(Error::BadSearchKey(word));
            }
            let b = parse_key(params, pos, ext)?;
            SearchKey::Or(Box::new(a), Box::new(b))
        },
        _ => {
            if let Some(arity) = ext.arity(&upper) {
                let mut args = Vec::new();
                for _ in 0..arity {
                    args.push(value!(pos));
                }
                SearchKey::Ext(upper, args)
            } else if is_sequence_set(&word) {
                SearchKey::Sequence(word)
            } else {
                return Err(Error::BadSearchKey(word));
            }
        },
    })
}

/// Evaluate composed keys, intersecting top-level results in declared order.
pub fn evaluate(
    messages: &[MessageRef],
    keys: &[SearchKey],
    ext: &dyn ExtSearch,
) -> Result<SearchResult, Error> {
    let mut total: Option<BTreeSet<usize>> = None;
    for key in keys {
        let current = eval_key(messages, key, ext);
        total = Some(match total {
            None => current,
            Some(total) => total.intersection(&current).copied().collect(),
        });
    }

    let indices = total.unwrap_or_default();
    let mut result = SearchResult::default();
    for ix in indices {
        let message = &messages[ix];
        let uid = message.lock().unwrap().uid;
        result.numbers.insert(uid, ix as u32 + 1);
        result.matched.push(MessageRef::clone(message));
    }
    Ok(result)
}

fn eval_key(
    messages: &[MessageRef],
    key: &SearchKey,
    ext: &dyn ExtSearch,
) -> BTreeSet<usize> {
    match *key {
        SearchKey::All => (0..messages.len()).collect(),
        SearchKey::Sequence(ref spec) => range_set(messages, spec, false),
        SearchKey::Uid(ref spec) => range_set(messages, spec, true),

        SearchKey::Answered => flag_set(messages, "\\Answered", true),
        SearchKey::Deleted => flag_set(messages, "\\Deleted", true),
        SearchKey::Draft => flag_set(messages, "\\Draft", true),
        SearchKey::Flagged => flag_set(messages, "\\Flagged", true),
        SearchKey::Recent => flag_set(messages, "\\Recent", true),
        SearchKey::Seen => flag_set(messages, "\\Seen", true),
        SearchKey::Unanswered => flag_set(messages, "\\Answered", false),
        SearchKey::Undeleted => flag_set(messages, "\\Deleted", false),
        SearchKey::Undraft => flag_set(messages, "\\Draft", false),
        SearchKey::Unflagged => flag_set(messages, "\\Flagged", false),
        SearchKey::Unseen => flag_set(messages, "\\Seen", false),
        SearchKey::Old => flag_set(messages, "\\Recent", false),
        SearchKey::Keyword(ref flag) => flag_set(messages, flag, true),
        SearchKey::Unkeyword(ref flag) => flag_set(messages, flag, false),
        SearchKey::New => select(messages, |m| {
            m.has_flag("\\Recent") && !m.has_flag("\\Seen")
        }),

        SearchKey::Bcc(ref v) => header_set(messages, "BCC", v),
        SearchKey::Cc(ref v) => header_set(messages, "CC", v),
        SearchKey::From(ref v) => header_set(messages, "FROM", v),
        SearchKey::To(ref v) => header_set(messages, "TO", v),
        SearchKey::Subject(ref v) => header_set(messages, "SUBJECT", v),
        SearchKey::Header(ref name, ref v) => {
            header_match(messages, name, v, true)
        },

        SearchKey::Body(ref v) => {
            let needle = v.to_lowercase();
            if needle.is_empty() {
                return BTreeSet::new();
            }
            select_mut(messages, |m| {
                m.parsed().text.to_lowercase().contains(&needle)
            })
        },
        SearchKey::Text(ref v) => {
            let needle = v.to_lowercase();
            if needle.is_empty() {
                return BTreeSet::new();
            }
            select(messages, |m| {
                String::from_utf8_lossy(&m.raw)
                    .to_lowercase()
                    .contains(&needle)
            })
        },

        SearchKey::Before(ref date) => internal_date_set(messages, date, |a, b| a < b),
        SearchKey::On(ref date) => internal_date_set(messages, date, |a, b| a == b),
        SearchKey::Since(ref date) => internal_date_set(messages, date, |a, b| a >= b),
        SearchKey::SentBefore(ref date) => sent_date_set(messages, date, |a, b| a < b),
        SearchKey::SentOn(ref date) => sent_date_set(messages, date, |a, b| a == b),
        SearchKey::SentSince(ref date) => sent_date_set(messages, date, |a, b| a >= b),

        SearchKey::Larger(ref size) => match size.parse::<u32>() {
            Ok(size) => select(messages, |m| m.size() >= size),
            Err(_) => BTreeSet::new(),
        },
        SearchKey::Smaller(ref size) => match size.parse::<u32>() {
            Ok(size) => select(messages, |m| m.size() < size),
            Err(_) => BTreeSet::new(),
        },

        SearchKey::Not(ref inner) => {
            let inner = eval_key(messages, inner, ext);
            (0..messages.len())
                .filter(|ix| !inner.contains(ix))
                .collect()
        },
        SearchKey::Or(ref a, ref b) => {
            let a = eval_key(messages, a, ext);
            let b = eval_key(messages, b, ext);
            a.union(&b).copied().collect()
        },

        SearchKey::Ext(ref key, ref args) => messages
            .iter()
            .enumerate()
            .filter(|(ix, m)| ext.matches(key, m, *ix as u32 + 1, args))
            .map(|(ix, _)| ix)
            .collect(),
    }
}

fn select(
    messages: &[MessageRef],
    predicate: impl Fn(&crate::store::model::Message) -> bool,
) -> BTreeSet<usize> {
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| predicate(&m.lock().unwrap()))
        .map(|(ix, _)| ix)
        .collect()
}

fn select_mut(
    messages: &[MessageRef],
    predicate: impl Fn(&mut crate::store::model::Message) -> bool,
) -> BTreeSet<usize> {
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| predicate(&mut m.lock().unwrap()))
        .map(|(ix, _)| ix)
        .collect()
}

fn flag_set(
    messages: &[MessageRef],
    flag: &str,
    present: bool,
) -> BTreeSet<usize> {
    select(messages, |m| m.has_flag(flag) == present)
}

fn range_set(
    messages: &[MessageRef],
    spec: &str,
    by_uid: bool,
) -> BTreeSet<usize> {
    message_range(messages, spec, by_uid)
        .into_iter()
        .map(|(seq, _)| seq as usize - 1)
        .collect()
}

fn header_set(
    messages: &[MessageRef],
    name: &str,
    value: &str,
) -> BTreeSet<usize> {
    if value.is_empty() {
        return BTreeSet::new();
    }
    header_match(messages, name, value, false)
}

fn header_match(
    messages: &[MessageRef],
    name: &str,
    value: &str,
    include_empty: bool,
) -> BTreeSet<usize> {
    if value.is_empty() && !include_empty {
        return BTreeSet::new();
    }
    let name = name.to_lowercase();
    let needle = value.to_lowercase();
    select_mut(messages, |m| {
        let parsed = m.parsed();
        parsed.header.iter().any(|line| {
            let mut parts = line.splitn(2, ':');
            let key = parts.next().unwrap_or("").trim().to_lowercase();
            let line_value = parts.next().unwrap_or("");
            key == name
                && (needle.is_empty()
                    || line_value.to_lowercase().contains(&needle))
        })
    })
}

fn internal_date_set(
    messages: &[MessageRef],
    date: &str,
    cmp: impl Fn(chrono::NaiveDate, chrono::NaiveDate) -> bool,
) -> BTreeSet<usize> {
    let reference = match chronox::parse_search_date(date) {
        Some(d) => d,
        None => return BTreeSet::new(),
    };
    select(messages, |m| {
        chronox::internal_date_day(&m.internal_date)
            .map(|day| cmp(day, reference))
            .unwrap_or(false)
    })
}

fn sent_date_set(
    messages: &[MessageRef],
    date: &str,
    cmp: impl Fn(chrono::NaiveDate, chrono::NaiveDate) -> bool,
) -> BTreeSet<usize> {
    let reference = match chronox::parse_search_date(date) {
        Some(d) => d,
        None => return BTreeSet::new(),
    };
    select_mut(messages, |m| {
        let parsed = m.parsed();
        let day = match parsed.parsed_header.date {
            Some(ref header_date) => chronox::header_date_day(header_date),
            None => chronox::internal_date_day(&m.internal_date),
        };
        day.map(|day| cmp(day, reference)).unwrap_or(false)
    })
}
