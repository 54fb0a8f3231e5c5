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

//! Date and time helpers for the `INTERNALDATE` format and the
//! day-granularity comparisons SEARCH performs.
//!
//! `INTERNALDATE` is always the fixed `dd-MMM-yyyy HH:MM:SS +hhmm` shape. It
//! is stored as a string on each message, exactly as a client would see it in
//! a FETCH response, and reparsed on demand.

use chrono::prelude::*;

const INTERNAL_DATE_FMT: &str = "%d-%b-%Y %H:%M:%S %z";

/// Format a timestamp into `INTERNALDATE` form.
pub fn format_internal_date(date: &DateTime<FixedOffset>) -> String {
    date.format(INTERNAL_DATE_FMT).to_string()
}

/// The current local time in `INTERNALDATE` form.
pub fn now_internal_date() -> String {
    format_internal_date(&Local::now().into())
}

/// Parse a full `INTERNALDATE` string.
///
/// A leading space in the day field (`" 5-Aug-2023 ..."`) is accepted since
/// some clients pad single-digit days that way.
pub fn parse_internal_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(raw.trim_start(), INTERNAL_DATE_FMT).ok()
}

/// Whether `raw` is a well-formed `INTERNALDATE` string.
pub fn valid_internal_date(raw: &str) -> bool {
    parse_internal_date(raw).is_some()
}

/// Parse an IMAP search date (`d-MMM-yyyy` or `dd-MMM-yyyy`).
pub fn parse_search_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim_matches('"'), "%d-%b-%Y").ok()
}

/// The day an `INTERNALDATE` string falls on, ignoring time and zone.
///
/// Only the leading `dd-MMM-yyyy` portion is considered, so two messages on
/// the same nominal day compare equal regardless of their zone offsets.
pub fn internal_date_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim_start();
    let date_part = raw.split(' ').next()?;
    NaiveDate::parse_from_str(date_part, "%d-%b-%Y").ok()
}

/// The day a `Date:` header falls on, with `INTERNALDATE` syntax accepted as
/// a fallback for messages whose header did not parse.
pub fn header_date_day(raw: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.date_naive())
        .or_else(|| internal_date_day(raw))
}
