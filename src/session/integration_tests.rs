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

//! End-to-end exchanges through the in-memory transport: real octets in,
//! real octets out, full sessions.

use std::sync::Arc;

use crate::config::{Config, FolderConfig, MessageConfig};
use crate::server::Server;
use crate::transport::{Socket, SocketEvent};

fn message(raw: &str, flags: &[&str], internaldate: &str) -> MessageConfig {
    MessageConfig {
        raw: raw.to_owned(),
        flags: flags.iter().map(|&f| f.to_owned()).collect(),
        uid: 0,
        internaldate: internaldate.to_owned(),
    }
}

/// Two messages in INBOX: one seen "hello", one unseen "world".
fn seeded_config() -> Config {
    let mut config = Config::default();
    config.inbox = Some(FolderConfig {
        messages: vec![
            message(
                "Subject: hello\r\nFrom: a@example.com\r\n\r\nfirst body\r\n",
                &["\\Seen"],
                "01-Jan-2020 10:00:00 +0000",
            ),
            message(
                "Subject: world\r\nFrom: b@example.com\r\n\r\nsecond body\r\n",
                &[],
                "15-Jun-2020 10:00:00 +0000",
            ),
        ],
        ..FolderConfig::default()
    });
    config
}

fn server_with(config: Config) -> Arc<Server> {
    crate::init_test_log();
    Server::new(config)
}

fn connect(server: &Arc<Server>) -> Socket {
    let socket = server.connect();
    let greeting = socket.read_responses();
    assert_eq!(
        vec!["* OK Crowmap ready for rumble".to_owned()],
        greeting
    );
    socket
}

fn exchange(socket: &Socket, line: &str) -> Vec<String> {
    socket.send(format!("{}\r\n", line).as_bytes());
    socket.read_responses()
}

fn login(socket: &Socket) {
    let responses = exchange(socket, "l1 LOGIN testuser demo");
    assert_eq!(vec!["l1 OK User logged in".to_owned()], responses);
}

fn login_and_select(server: &Arc<Server>) -> Socket {
    let socket = connect(server);
    login(&socket);
    let responses = exchange(&socket, "s1 SELECT INBOX");
    assert!(responses
        .last()
        .unwrap()
        .starts_with("s1 OK [READ-WRITE]"));
    socket
}

#[test]
fn first_contact_and_state_machine() {
    let server = server_with(seeded_config());
    let socket = connect(&server);

    // Commands requiring authentication are rejected before login.
    assert_eq!(
        vec!["a1 BAD Log in first".to_owned()],
        exchange(&socket, "a1 LIST \"\" \"*\"")
    );
    assert_eq!(
        vec!["a2 BAD Select mailbox first".to_owned()],
        exchange(&socket, "a2 FETCH 1 FLAGS")
    );

    // Unknown verbs never reach the queue.
    assert_eq!(
        vec!["a3 BAD Invalid command WIBBLE".to_owned()],
        exchange(&socket, "a3 WIBBLE")
    );

    // Parse failures report both untagged and tagged BAD.
    let responses = exchange(&socket, "a4 LIST \"unterminated");
    assert!(responses[0].starts_with("* BAD [SYNTAX]"));
    assert_eq!("a4 BAD Error parsing command", responses[1]);

    // Bad credentials.
    assert_eq!(
        vec!["a5 NO Login failed: authentication failure".to_owned()],
        exchange(&socket, "a5 LOGIN testuser wrong")
    );

    login(&socket);
    assert_eq!(
        vec!["a6 BAD Already authenticated, identity change not allowed"
            .to_owned()],
        exchange(&socket, "a6 LOGIN testuser demo")
    );

    let responses = exchange(&socket, "a7 LOGOUT");
    assert_eq!("* BYE LOGOUT received", responses[0]);
    assert_eq!("a7 OK Completed", responses[1]);
    assert!(!socket.is_open());
}

#[test]
fn capability_list() {
    let mut config = seeded_config();
    config.capabilities =
        vec!["ID".to_owned(), "SASL-IR".to_owned(), "AUTH=PLAIN".to_owned()];
    let server = server_with(config);
    let socket = connect(&server);

    let responses = exchange(&socket, "c1 CAPABILITY");
    assert_eq!(
        "* CAPABILITY IMAP4rev1 ID SASL-IR AUTH=PLAIN",
        responses[0]
    );
    assert_eq!("c1 OK Completed", responses[1]);

    // State-dependent capabilities disappear after login.
    login(&socket);
    let responses = exchange(&socket, "c2 CAPABILITY");
    assert_eq!("* CAPABILITY IMAP4rev1 ID", responses[0]);

    assert_eq!(
        vec!["c3 BAD CAPABILITY does not take any arguments".to_owned()],
        exchange(&socket, "c3 CAPABILITY PLEASE")
    );
}

#[test]
fn select_reports_mailbox_state() {
    let server = server_with(seeded_config());
    let socket = connect(&server);
    login(&socket);

    let responses = exchange(&socket, "s1 SELECT INBOX");
    assert_eq!(
        "* FLAGS (\\Answered \\Flagged \\Draft \\Deleted \\Seen)",
        responses[0]
    );
    assert_eq!(
        "* OK [PERMANENTFLAGS (\\Answered \\Flagged \\Draft \\Deleted \
         \\Seen \\*)]",
        responses[1]
    );
    assert_eq!("* 2 EXISTS", responses[2]);
    assert_eq!("* 0 RECENT", responses[3]);
    assert_eq!("* OK [UIDVALIDITY 1]", responses[4]);
    assert_eq!("* OK [UIDNEXT 3]", responses[5]);
    assert_eq!("s1 OK [READ-WRITE] Completed", responses[6]);

    // EXAMINE is the read-only variant; INBOX resolves case-insensitively.
    let responses = exchange(&socket, "s2 EXAMINE inbox");
    assert_eq!(
        "s2 OK [READ-ONLY] Completed",
        responses.last().unwrap()
    );

    assert_eq!(
        vec!["s3 BAD Invalid mailbox name".to_owned()],
        exchange(&socket, "s3 SELECT nonexistent")
    );
}

#[test]
fn list_and_lsub() {
    let mut config = seeded_config();
    let mut archive = FolderConfig::default();
    archive
        .folders
        .insert("2023".to_owned(), FolderConfig::default());
    let mut unsubscribed = FolderConfig::default();
    unsubscribed.subscribed = Some(false);
    let mut root = crate::config::NamespaceConfig::default();
    root.folders.insert("Archive".to_owned(), archive);
    root.folders.insert("Spam".to_owned(), unsubscribed);
    config.namespaces.insert(String::new(), root);
    let server = server_with(config);

    let socket = connect(&server);
    login(&socket);

    let responses = exchange(&socket, "l2 LIST \"\" \"*\"");
    assert!(responses
        .iter()
        .any(|l| l.contains("LIST") && l.contains("\"INBOX\"")));
    assert!(responses
        .iter()
        .any(|l| l.contains("\\HasChildren") && l.contains("\"Archive\"")));
    assert!(responses
        .iter()
        .any(|l| l.contains("\"Archive/2023\"")));
    assert_eq!("l2 OK Completed", responses.last().unwrap());

    // % stops at the separator.
    let responses = exchange(&socket, "l3 LIST \"\" \"%\"");
    assert!(!responses.iter().any(|l| l.contains("Archive/2023")));

    // Empty pattern lists the separator only.
    let responses = exchange(&socket, "l4 LIST \"\" \"\"");
    assert_eq!("* LIST (\\Noselect) \"/\" \"\"", responses[0]);

    // LSUB omits unsubscribed folders.
    let responses = exchange(&socket, "l5 LSUB \"\" \"*\"");
    assert!(responses.iter().any(|l| l.contains("\"Archive\"")));
    assert!(!responses.iter().any(|l| l.contains("\"Spam\"")));
}

#[test]
fn status_items() {
    let server = server_with(seeded_config());
    let socket = connect(&server);
    login(&socket);

    let responses =
        exchange(&socket, "t1 STATUS INBOX (MESSAGES UNSEEN UIDNEXT)");
    assert_eq!(
        "* STATUS INBOX (MESSAGES 2 UNSEEN 1 UIDNEXT 3)",
        responses[0]
    );
    assert_eq!("t1 OK Status completed", responses[1]);

    assert_eq!(
        vec!["t2 BAD Invalid status element (1)".to_owned()],
        exchange(&socket, "t2 STATUS INBOX (NONSENSE)")
    );
    assert_eq!(
        vec!["t3 BAD Invalid mailbox name".to_owned()],
        exchange(&socket, "t3 STATUS missing (MESSAGES)")
    );
}

#[test]
fn fetch_items_and_implicit_seen() {
    let server = server_with(seeded_config());
    let socket = login_and_select(&server);

    let responses = exchange(&socket, "f1 FETCH 1:* (UID FLAGS)");
    assert_eq!("* 1 FETCH (UID 1 FLAGS (\\Seen))", responses[0]);
    assert_eq!("* 2 FETCH (UID 2 FLAGS ())", responses[1]);
    assert_eq!("f1 OK FETCH Completed", responses[2]);

    // Fetching content implicitly sets \Seen and appends FLAGS. The header
    // literal spans lines, so search the whole exchange.
    let responses = exchange(&socket, "f2 FETCH 2 RFC822.HEADER");
    assert!(responses
        .iter()
        .any(|l| l.contains("FLAGS (\\Seen)")));

    // BODY.PEEK does not mutate.
    let responses = exchange(&socket, "f3 FETCH 1 BODY.PEEK[HEADER]");
    assert!(!responses.iter().any(|l| l.contains("FLAGS")));

    // Macros expand.
    let responses = exchange(&socket, "f4 FETCH 1 FAST");
    assert!(responses[0].contains("INTERNALDATE"));
    assert!(responses[0].contains("RFC822.SIZE"));

    assert_eq!(
        vec!["f5 BAD Invalid FETCH argument X-WAT".to_owned()],
        exchange(&socket, "f5 FETCH 1 X-WAT")
    );

    // UID FETCH echoes UID even when not requested.
    let responses = exchange(&socket, "f6 UID FETCH 2 FLAGS");
    assert!(responses[0].contains("UID 2"));
}

#[test]
fn append_fetch_round_trip() {
    let server = server_with(Config::default());
    let socket = connect(&server);
    login(&socket);

    let payload = b"Subject: binary-ish\r\n\r\nodd \x01 bytes here\r\n";
    let mut command = Vec::new();
    command.extend_from_slice(
        format!("p1 APPEND INBOX (\\Flagged) {{{}}}\r\n", payload.len())
            .as_bytes(),
    );
    socket.send(&command);
    // Synchronizing literal: continuation before the octets.
    assert_eq!(
        vec!["+ Go ahead".to_owned()],
        socket.read_responses()
    );
    socket.send(payload);
    socket.send(b"\r\n");
    assert_eq!(
        vec!["p1 OK APPEND Completed".to_owned()],
        socket.read_responses()
    );

    exchange(&socket, "p2 SELECT INBOX");
    socket.send(b"p3 FETCH 1 BODY.PEEK[]\r\n");

    // Collect raw output to compare the literal octet-for-octet.
    let mut raw = Vec::new();
    while let Ok(event) = socket.events().try_recv() {
        if let SocketEvent::Data(data) = event {
            raw.extend(data);
        }
    }
    let haystack = raw
        .windows(payload.len())
        .any(|window| window == &payload[..]);
    assert!(haystack, "appended payload not returned verbatim");
}

#[test]
fn append_validation() {
    let server = server_with(Config::default());
    let socket = connect(&server);
    login(&socket);

    assert_eq!(
        vec!["p1 BAD Invalid mailbox argument".to_owned()],
        exchange(&socket, "p1 APPEND missing {3+}\r\nabc")
    );
    assert_eq!(
        vec!["p2 BAD Invalid message source argument".to_owned()],
        exchange(&socket, "p2 APPEND INBOX nonliteral")
    );
    assert_eq!(
        vec!["p3 BAD Invalid internaldate argument".to_owned()],
        exchange(&socket, "p3 APPEND INBOX \"not a date\" {3+}\r\nabc")
    );
    let responses = exchange(
        &socket,
        "p4 APPEND INBOX (\\Seen) \"14-Sep-2013 21:22:28 -0730\" {3+}\r\nabc",
    );
    assert_eq!(vec!["p4 OK APPEND Completed".to_owned()], responses);
}

#[test]
fn search_over_the_wire() {
    let server = server_with(seeded_config());
    let socket = login_and_select(&server);

    // Conjunction: both subjects contain a vowel but only one is seen.
    let responses = exchange(&socket, "k1 SEARCH SEEN SUBJECT hello");
    assert_eq!("* SEARCH 1", responses[0]);
    assert_eq!("k1 OK SEARCH completed", responses[1]);

    // Union and negation.
    assert_eq!(
        "* SEARCH 1 2",
        exchange(&socket, "k2 SEARCH OR SEEN UNSEEN")[0]
    );
    assert_eq!("* SEARCH 2", exchange(&socket, "k3 SEARCH NOT SEEN")[0]);

    // No match: no untagged response at all.
    assert_eq!(
        vec!["k4 OK SEARCH completed".to_owned()],
        exchange(&socket, "k4 SEARCH SUBJECT nothinglikethis")
    );

    // UID variant returns UIDs.
    assert_eq!(
        "* SEARCH 2",
        exchange(&socket, "k5 UID SEARCH UNSEEN")[0]
    );

    // Unknown keys are hard errors; bare sequence sets are not.
    assert!(exchange(&socket, "k6 SEARCH WIBBLE")[0].starts_with("k6 NO"));
    assert_eq!("* SEARCH 1", exchange(&socket, "k7 SEARCH 1")[0]);

    assert_eq!(
        vec!["k8 BAD SEARCH expects search criteria, empty query given"
            .to_owned()],
        exchange(&socket, "k8 SEARCH")
    );
}

#[test]
fn store_flag_mutation() {
    let server = server_with(seeded_config());
    let socket = login_and_select(&server);

    let responses = exchange(&socket, "m1 STORE 1 +FLAGS (\\Deleted)");
    assert_eq!(
        "* 1 FETCH (FLAGS (\\Seen \\Deleted))",
        responses[0]
    );
    assert_eq!("m1 OK STORE completed", responses[1]);

    // Adding an already present flag does not duplicate it.
    let responses = exchange(&socket, "m2 STORE 1 +FLAGS (\\Deleted)");
    assert_eq!(
        "* 1 FETCH (FLAGS (\\Seen \\Deleted))",
        responses[0]
    );

    // Replace is idempotent.
    let responses = exchange(&socket, "m3 STORE 1 FLAGS (\\Seen)");
    assert_eq!("* 1 FETCH (FLAGS (\\Seen))", responses[0]);
    let responses = exchange(&socket, "m4 STORE 1 FLAGS (\\Seen)");
    assert_eq!("* 1 FETCH (FLAGS (\\Seen))", responses[0]);

    // Silent variants produce no per-message update.
    assert_eq!(
        vec!["m5 OK STORE completed".to_owned()],
        exchange(&socket, "m5 STORE 1 +FLAGS.SILENT (\\Answered)")
    );

    // Bad system flags abort hard.
    assert_eq!(
        vec!["m6 BAD Invalid system flag \\Bogus".to_owned()],
        exchange(&socket, "m6 STORE 1 +FLAGS (\\Bogus)")
    );
    assert_eq!(
        vec!["m7 BAD Invalid STORE argument LABELS".to_owned()],
        exchange(&socket, "m7 STORE 1 LABELS (x)")
    );

    // UID STORE includes the UID in updates.
    let responses = exchange(&socket, "m8 UID STORE 2 +FLAGS (\\Flagged)");
    assert_eq!(
        "* 2 FETCH (FLAGS (\\Flagged) UID 2)",
        responses[0]
    );
    assert_eq!("m8 OK UID STORE completed", responses[1]);

    // Empty range: nothing stored, still OK.
    assert_eq!(
        vec!["m9 OK STORE completed".to_owned()],
        exchange(&socket, "m9 STORE 100:200 +FLAGS (\\Seen)")
    );
}

#[test]
fn expunge_renumbers_and_notifies() {
    let server = server_with(seeded_config());
    let socket = login_and_select(&server);

    exchange(&socket, "e1 STORE 1 +FLAGS.SILENT (\\Deleted)");
    let responses = exchange(&socket, "e2 EXPUNGE");
    // The session's own expunge notices flush before the tagged OK.
    assert_eq!("* 1 EXPUNGE", responses[0]);
    assert_eq!("e2 OK EXPUNGE Completed", responses[1]);

    // Sequence numbers are dense again: the old message 2 is now 1.
    let responses = exchange(&socket, "e3 FETCH 1:* UID");
    assert_eq!("* 1 FETCH (UID 2)", responses[0]);
    assert_eq!("e3 OK FETCH Completed", responses[1]);

    // Appends never reuse the expunged UID.
    let responses =
        exchange(&socket, "e4 APPEND INBOX {5+}\r\nx: y\r\n");
    assert_eq!(vec!["e4 OK APPEND Completed".to_owned()], responses);
    let responses = exchange(&socket, "e5 FETCH 1:* UID");
    assert_eq!("* 1 FETCH (UID 2)", responses[0]);
    assert_eq!("* 2 FETCH (UID 3)", responses[1]);
}

#[test]
fn close_expunges_silently_and_deselects() {
    let server = server_with(seeded_config());
    let socket = login_and_select(&server);

    exchange(&socket, "c1 STORE 1 +FLAGS.SILENT (\\Deleted)");
    let responses = exchange(&socket, "c2 CLOSE");
    // CLOSE's expunge is not reported to the closing session.
    assert_eq!(vec!["c2 OK Mailbox closed".to_owned()], responses);

    assert_eq!(
        vec!["c3 BAD Select mailbox first".to_owned()],
        exchange(&socket, "c3 FETCH 1 FLAGS")
    );
}

#[test]
fn copy_between_folders() {
    let mut config = seeded_config();
    let mut root = crate::config::NamespaceConfig::default();
    root.folders
        .insert("Archive".to_owned(), FolderConfig::default());
    config.namespaces.insert(String::new(), root);
    let server = server_with(config);
    let socket = login_and_select(&server);

    assert_eq!(
        vec!["y1 NO Target mailbox does not exist".to_owned()],
        exchange(&socket, "y1 COPY 1 missing")
    );
    assert_eq!(
        vec!["y2 OK COPY Completed".to_owned()],
        exchange(&socket, "y2 COPY 1:2 Archive")
    );

    let responses = exchange(&socket, "y3 STATUS Archive (MESSAGES)");
    assert_eq!("* STATUS Archive (MESSAGES 2)", responses[0]);

    assert_eq!(
        vec!["y4 OK UID COPY Completed".to_owned()],
        exchange(&socket, "y4 UID COPY 1 Archive")
    );
    let responses = exchange(&socket, "y5 STATUS Archive (MESSAGES)");
    assert_eq!("* STATUS Archive (MESSAGES 3)", responses[0]);
}

#[test]
fn cross_session_notifications() {
    let server = server_with(seeded_config());
    let alice = login_and_select(&server);
    let bob = login_and_select(&server);

    // Alice's flag change reaches Bob before his next tagged response.
    exchange(&alice, "a1 STORE 2 +FLAGS (\\Flagged)");
    let responses = exchange(&bob, "b1 NOOP");
    assert_eq!("* 2 FETCH (FLAGS (\\Flagged))", responses[0]);
    assert_eq!("b1 OK Completed", responses[1]);

    // An append shows up as EXISTS.
    exchange(&alice, "a2 APPEND INBOX {5+}\r\nx: y\r\n");
    let responses = exchange(&bob, "b2 NOOP");
    assert_eq!("* 3 EXISTS", responses[0]);

    // ...but is held back while a FETCH exchange renders.
    exchange(&alice, "a3 APPEND INBOX {5+}\r\nx: y\r\n");
    let responses = exchange(&bob, "b3 FETCH 1 UID");
    assert_eq!(
        vec![
            "* 1 FETCH (UID 1)".to_owned(),
            "b3 OK FETCH Completed".to_owned(),
        ],
        responses
    );
    let responses = exchange(&bob, "b4 NOOP");
    assert_eq!("* 4 EXISTS", responses[0]);
}

#[test]
fn pending_expunge_snapshot_semantics() {
    let server = server_with(seeded_config());
    let alice = login_and_select(&server);
    let bob = login_and_select(&server);

    exchange(&alice, "a1 STORE 1 +FLAGS.SILENT (\\Deleted)");
    exchange(&alice, "a2 EXPUNGE");

    // Bob has not yet seen the expunge; his FETCH uses the old numbering.
    let responses = exchange(&bob, "b1 FETCH 1:* UID");
    assert_eq!("* 1 FETCH (UID 1)", responses[0]);
    assert_eq!("* 2 FETCH (UID 2)", responses[1]);

    // STORE against a pending expunge is refused.
    assert_eq!(
        vec!["b2 NO Pending EXPUNGE messages, can not store".to_owned()],
        exchange(&bob, "b2 STORE 1 +FLAGS (\\Seen)")
    );

    // Once the notices are delivered, the new numbering applies.
    let responses = exchange(&bob, "b3 NOOP");
    assert!(responses.contains(&"* 1 EXPUNGE".to_owned()));
    assert!(responses.contains(&"* 1 EXISTS".to_owned()));
    let responses = exchange(&bob, "b4 FETCH 1:* UID");
    assert_eq!("* 1 FETCH (UID 2)", responses[0]);
}

#[test]
fn split_literal_command_is_reassembled() {
    let server = server_with(Config::default());
    let socket = connect(&server);
    login(&socket);

    // {11} delivered as 5 then 6 octets, with the rest of the command and
    // the next command trailing the final chunk.
    socket.send(b"q1 APPEND INBOX {11}\r\n");
    assert_eq!(vec!["+ Go ahead".to_owned()], socket.read_responses());
    socket.send(b"hello");
    assert!(socket.read_responses().is_empty());
    socket.send(b" world\r\nq2 NOOP\r\n");
    let responses = socket.read_responses();
    assert_eq!(
        vec![
            "q1 OK APPEND Completed".to_owned(),
            "q2 OK Completed".to_owned(),
        ],
        responses
    );

    // The payload arrived intact.
    exchange(&socket, "q3 SELECT INBOX");
    socket.send(b"q4 FETCH 1 RFC822\r\n");
    let mut raw = Vec::new();
    while let Ok(event) = socket.events().try_recv() {
        if let SocketEvent::Data(data) = event {
            raw.extend(data);
        }
    }
    assert!(raw
        .windows(11)
        .any(|window| b"hello world" == window));
}

#[test]
fn idle_flushes_notifications_immediately() {
    let mut config = seeded_config();
    config.capabilities = vec!["IDLE".to_owned()];
    let server = server_with(config);
    let alice = login_and_select(&server);
    let idler = login_and_select(&server);

    idler.send(b"i1 IDLE\r\n");
    assert_eq!(vec!["+ idling".to_owned()], idler.read_responses());

    // A change arrives while idling: no poll needed.
    exchange(&alice, "a1 APPEND INBOX {5+}\r\nx: y\r\n");
    assert_eq!(vec!["* 3 EXISTS".to_owned()], idler.read_responses());

    idler.send(b"DONE\r\n");
    assert_eq!(
        vec!["i1 OK IDLE terminated".to_owned()],
        idler.read_responses()
    );

    // The DONE interceptor is gone; normal commands work again.
    assert_eq!(
        vec!["i2 OK Completed".to_owned()],
        exchange(&idler, "i2 NOOP")
    );

    // A bad continuation is rejected.
    idler.send(b"i3 IDLE\r\n");
    idler.read_responses();
    idler.send(b"NONSENSE\r\n");
    assert_eq!(
        vec!["i3 BAD Invalid Idle continuation".to_owned()],
        idler.read_responses()
    );
}

#[test]
fn unselect_leaves_selected_state_without_expunge() {
    let mut config = seeded_config();
    config.capabilities = vec!["UNSELECT".to_owned()];
    let server = server_with(config);
    let socket = login_and_select(&server);

    exchange(&socket, "u1 STORE 1 +FLAGS.SILENT (\\Deleted)");
    assert_eq!(
        vec!["u2 OK Mailbox unselected".to_owned()],
        exchange(&socket, "u2 UNSELECT")
    );

    // Unlike CLOSE, the deleted message survives.
    let responses = exchange(&socket, "u3 STATUS INBOX (MESSAGES)");
    assert_eq!("* STATUS INBOX (MESSAGES 2)", responses[0]);

    assert_eq!(
        vec!["u4 BAD Select a mailbox first".to_owned()],
        exchange(&socket, "u4 UNSELECT")
    );
}

#[test]
fn id_exchange() {
    let mut config = seeded_config();
    config.capabilities = vec!["ID".to_owned()];
    let mut id = std::collections::BTreeMap::new();
    id.insert("name".to_owned(), "crowmap".to_owned());
    config.id = Some(id);
    let server = server_with(config);
    let socket = connect(&server);

    let responses =
        exchange(&socket, "d1 ID (\"name\" \"testclient\" \"os\" NIL)");
    assert_eq!("* ID (\"name\" \"crowmap\")", responses[0]);
    assert_eq!("d1 OK ID command completed", responses[1]);

    assert_eq!(
        vec!["d2 OK ID command completed".to_owned()],
        exchange(&socket, "d2 ID NIL")[1..].to_vec()
    );
    assert_eq!(
        vec!["d3 BAD ID expects valid parameter list".to_owned()],
        exchange(&socket, "d3 ID (\"odd\")")
    );
}

#[test]
fn authenticate_plain_both_flavours() {
    let mut config = seeded_config();
    config.capabilities =
        vec!["SASL-IR".to_owned(), "AUTH=PLAIN".to_owned()];
    let server = server_with(config);

    // Continuation flow.
    let socket = connect(&server);
    socket.send(b"v1 AUTHENTICATE PLAIN\r\n");
    assert_eq!(vec!["+".to_owned()], socket.read_responses());
    let payload = base64::encode(b"\x00testuser\x00demo");
    socket.send(format!("{}\r\n", payload).as_bytes());
    assert_eq!(
        vec!["v1 OK User logged in".to_owned()],
        socket.read_responses()
    );

    // Initial-response flow.
    let socket = connect(&server);
    let responses = exchange(
        &socket,
        &format!("v2 AUTHENTICATE PLAIN {}", payload),
    );
    assert_eq!(vec!["v2 OK User logged in".to_owned()], responses);

    // Bad credentials.
    let socket = connect(&server);
    let bad = base64::encode(b"\x00testuser\x00wrong");
    let responses =
        exchange(&socket, &format!("v3 AUTHENTICATE PLAIN {}", bad));
    assert_eq!(
        vec!["v3 NO Login failed: authentication failure".to_owned()],
        responses
    );
}

#[test]
fn authenticate_xoauth2() {
    let mut config = seeded_config();
    config.capabilities = vec!["SASL-IR".to_owned(), "XOAUTH2".to_owned()];
    let server = server_with(config);

    let good = base64::encode(
        "user=testuser\x01auth=Bearer testtoken\x01\x01",
    );
    let socket = connect(&server);
    assert_eq!(
        vec!["x1 OK User logged in".to_owned()],
        exchange(&socket, &format!("x1 AUTHENTICATE XOAUTH2 {}", good))
    );

    // Bad token: base64 JSON challenge, then NO after the empty line.
    let socket = connect(&server);
    let bad = base64::encode(
        "user=testuser\x01auth=Bearer nope\x01\x01",
    );
    let responses =
        exchange(&socket, &format!("x2 AUTHENTICATE XOAUTH2 {}", bad));
    assert!(responses[0].starts_with("+ "));
    socket.send(b"\r\n");
    assert_eq!(
        vec!["x2 NO SASL authentication failed".to_owned()],
        socket.read_responses()
    );

    // Unknown user fails immediately.
    let socket = connect(&server);
    let unknown = base64::encode(
        "user=who\x01auth=Bearer testtoken\x01\x01",
    );
    assert_eq!(
        vec!["x3 NO Invalid credentials".to_owned()],
        exchange(&socket, &format!("x3 AUTHENTICATE XOAUTH2 {}", unknown))
    );
}

#[test]
fn enable_negotiation() {
    let mut config = seeded_config();
    config.capabilities =
        vec!["ENABLE".to_owned(), "CONDSTORE".to_owned()];
    let server = server_with(config);
    let socket = connect(&server);

    assert_eq!(
        vec!["n1 BAD ENABLE not allowed now.".to_owned()],
        exchange(&socket, "n1 ENABLE CONDSTORE")
    );
    login(&socket);
    assert_eq!(
        vec!["n2 OK ENABLE completed".to_owned()],
        exchange(&socket, "n2 ENABLE CONDSTORE UNKNOWN")
    );
    assert_eq!(
        vec!["n3 BAD ENABLE expects capability list".to_owned()],
        exchange(&socket, "n3 ENABLE")
    );
}

#[test]
fn condstore_modseq_lifecycle() {
    let mut config = seeded_config();
    config.capabilities = vec!["CONDSTORE".to_owned()];
    let server = server_with(config);
    let socket = connect(&server);
    login(&socket);

    // Seeded messages were stamped 1 and 2 at index time.
    let responses = exchange(&socket, "z1 SELECT INBOX (CONDSTORE)");
    assert!(responses.contains(&"* OK [HIGHESTMODSEQ 2]".to_owned()));
    assert_eq!(
        "z1 OK [READ-WRITE] Completed, CONDSTORE is now enabled",
        responses.last().unwrap()
    );

    let responses = exchange(&socket, "z2 FETCH 1 (MODSEQ)");
    assert_eq!("* 1 FETCH (MODSEQ (1))", responses[0]);

    // A flag change bumps the modseq past everything else.
    exchange(&socket, "z3 STORE 1 +FLAGS.SILENT (\\Answered)");
    let responses = exchange(&socket, "z4 FETCH 1 (MODSEQ)");
    assert_eq!("* 1 FETCH (MODSEQ (3))", responses[0]);

    // CHANGEDSINCE filters to messages touched after the given point.
    let responses =
        exchange(&socket, "z5 FETCH 1:* (FLAGS) (CHANGEDSINCE 2)");
    assert_eq!(2, responses.len());
    assert!(responses[0].starts_with("* 1 FETCH"));

    // UNCHANGEDSINCE skips messages modified since.
    let responses =
        exchange(&socket, "z6 STORE 1:* (UNCHANGEDSINCE 2) +FLAGS (\\Draft)");
    // Message 1 (modseq 3) is skipped; message 2 (modseq 2) is mutated.
    assert_eq!(2, responses.len());
    assert!(responses[0].starts_with("* 2 FETCH"));

    assert_eq!(
        vec!["z7 BAD Invalid syntax for CHANGEDSINCE, number expected"
            .to_owned()],
        exchange(&socket, "z7 FETCH 1 (FLAGS) (CHANGEDSINCE x)")
    );

    // HIGHESTMODSEQ is a STATUS item when CONDSTORE is installed.
    let responses =
        exchange(&socket, "z8 STATUS INBOX (HIGHESTMODSEQ)");
    assert!(responses[0].starts_with("* STATUS INBOX (HIGHESTMODSEQ"));
}

#[test]
fn special_use_listing() {
    let mut config = seeded_config();
    config.capabilities = vec!["SPECIAL-USE".to_owned()];
    let mut sent = FolderConfig::default();
    sent.special_use = vec!["\\Sent".to_owned()];
    let mut root = crate::config::NamespaceConfig::default();
    root.folders.insert("Sent".to_owned(), sent);
    root.folders
        .insert("Plain".to_owned(), FolderConfig::default());
    config.namespaces.insert(String::new(), root);
    let server = server_with(config);
    let socket = connect(&server);
    login(&socket);

    // Annotations ride along on a plain LIST.
    let responses = exchange(&socket, "w1 LIST \"\" \"*\"");
    assert!(responses
        .iter()
        .any(|l| l.contains("\\Sent") && l.contains("\"Sent\"")));

    // Selection narrows to annotated folders only.
    let responses = exchange(&socket, "w2 LIST (SPECIAL-USE) \"\" \"*\"");
    assert!(responses.iter().any(|l| l.contains("\"Sent\"")));
    assert!(!responses.iter().any(|l| l.contains("\"Plain\"")));
    assert!(!responses.iter().any(|l| l.contains("\"INBOX\"")));

    // RETURN (SPECIAL-USE) projects only the annotations.
    let responses =
        exchange(&socket, "w3 LIST \"\" \"*\" RETURN (SPECIAL-USE)");
    assert!(responses
        .iter()
        .any(|l| l.starts_with("* LIST (\\Sent)")));
    assert!(responses.iter().any(|l| l.starts_with("* LIST ()")));
}
