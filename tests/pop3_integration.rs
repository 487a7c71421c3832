//! End-to-end POP3 session over a real loopback socket.

use mailtrap_core::{MailboxStore, Pop3Server};
use md5::{Digest, Md5};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn connect(server: &Pop3Server) -> (BufReader<TcpStream>, TcpStream) {
    let port = server.port().expect("server should be bound");
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let reader = BufReader::new(stream.try_clone().unwrap());
    (reader, stream)
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line.trim_end_matches(['\r', '\n']).to_string()
}

fn send(stream: &mut TcpStream, line: &str) {
    stream.write_all(line.as_bytes()).unwrap();
    stream.write_all(b"\r\n").unwrap();
}

#[test]
fn user_pass_list_retr_dele_quit() {
    init_logging();
    let store = Arc::new(MailboxStore::new());
    let mailbox = store_with_two_messages(&store);

    let server = Pop3Server::new(store);
    server.start().unwrap();
    let (mut reader, mut stream) = connect(&server);

    assert!(read_line(&mut reader).starts_with("+OK POP3 server ready"));

    send(&mut stream, "USER alice");
    assert_eq!(read_line(&mut reader), "+OK User accepted");

    send(&mut stream, "PASS secret");
    assert_eq!(read_line(&mut reader), "+OK Logged in");

    send(&mut stream, "STAT");
    assert_eq!(read_line(&mut reader), "+OK 2 2");

    send(&mut stream, "LIST");
    assert_eq!(read_line(&mut reader), "+OK 2 messages");
    assert_eq!(read_line(&mut reader), "1 1");
    assert_eq!(read_line(&mut reader), "2 1");
    assert_eq!(read_line(&mut reader), ".");

    send(&mut stream, "RETR 1");
    assert_eq!(read_line(&mut reader), "+OK 1 octets");
    assert_eq!(read_line(&mut reader), "A");
    assert_eq!(read_line(&mut reader), ".");

    send(&mut stream, "DELE 1");
    assert_eq!(read_line(&mut reader), "+OK Message deleted");

    send(&mut stream, "STAT");
    assert_eq!(read_line(&mut reader), "+OK 1 1");

    send(&mut stream, "QUIT");
    assert_eq!(read_line(&mut reader), "+OK Goodbye");

    server.stop();
    assert_eq!(mailbox.get_messages().len(), 1);
    assert_eq!(mailbox.get_messages()[0].content(), b"B");
    assert_eq!(server.authenticated_username().as_deref(), Some("alice"));
    assert!(server.log().contains("C: DELE 1"));
    assert!(server.log().contains("S: +OK Goodbye"));
}

#[test]
fn rset_restores_messages_marked_for_deletion() {
    init_logging();
    let store = Arc::new(MailboxStore::new());
    let mailbox = store_with_two_messages(&store);

    let server = Pop3Server::new(store);
    server.start().unwrap();
    let (mut reader, mut stream) = connect(&server);
    read_line(&mut reader);

    send(&mut stream, "USER alice");
    read_line(&mut reader);
    send(&mut stream, "PASS secret");
    read_line(&mut reader);

    send(&mut stream, "DELE 1");
    assert_eq!(read_line(&mut reader), "+OK Message deleted");

    send(&mut stream, "RSET");
    assert_eq!(read_line(&mut reader), "+OK Maildrop has not changed");

    send(&mut stream, "STAT");
    assert_eq!(read_line(&mut reader), "+OK 2 2");

    send(&mut stream, "QUIT");
    read_line(&mut reader);

    server.stop();
    assert_eq!(mailbox.get_messages().len(), 2);
}

#[test]
fn apop_authenticates_with_digest_and_rejects_wrong_digest() {
    init_logging();
    let store = Arc::new(MailboxStore::new());
    store_with_two_messages(&store);

    let server = Pop3Server::new(store);
    server.start().unwrap();
    let (mut reader, mut stream) = connect(&server);

    let greeting = read_line(&mut reader);
    assert!(greeting.starts_with("+OK POP3 server ready <"));
    let timestamp = greeting.rsplit(' ').next().unwrap().to_string();

    send(&mut stream, "APOP alice 0000000000000000000000000000000");
    assert_eq!(read_line(&mut reader), "-ERR Authentication failed");

    let digest = format!("{:x}", Md5::digest(format!("{timestamp}secret").as_bytes()));
    send(&mut stream, &format!("APOP alice {digest}"));
    assert_eq!(read_line(&mut reader), "+OK Logged in");

    send(&mut stream, "STAT");
    assert_eq!(read_line(&mut reader), "+OK 2 2");

    send(&mut stream, "QUIT");
    assert_eq!(read_line(&mut reader), "+OK Goodbye");

    server.stop();
    assert_eq!(server.authenticated_username().as_deref(), Some("alice"));
}

#[test]
fn top_returns_requested_line_count_with_dot_stuffed_wire_output() {
    init_logging();
    let store = Arc::new(MailboxStore::new());
    store.add_mailbox("alice", "secret", "alice@localhost");
    let mailbox = store.find_mailbox("alice").unwrap();
    mailbox.add_message(b"Line1\r\n.Line2\r\nLine3\r\nLine4".to_vec());

    let server = Pop3Server::new(store);
    server.start().unwrap();
    let (mut reader, mut stream) = connect(&server);
    read_line(&mut reader);

    send(&mut stream, "USER alice");
    read_line(&mut reader);
    send(&mut stream, "PASS secret");
    read_line(&mut reader);

    send(&mut stream, "TOP 1 2");
    assert_eq!(read_line(&mut reader), "+OK Top of message follows");
    assert_eq!(read_line(&mut reader), "Line1");
    assert_eq!(read_line(&mut reader), "..Line2");
    assert_eq!(read_line(&mut reader), ".");

    send(&mut stream, "QUIT");
    read_line(&mut reader);
    server.stop();
}

#[test]
fn commands_before_authorization_are_rejected() {
    init_logging();
    let store = Arc::new(MailboxStore::new());
    let server = Pop3Server::new(store);
    server.start().unwrap();
    let (mut reader, mut stream) = connect(&server);
    read_line(&mut reader);

    send(&mut stream, "STAT");
    assert!(read_line(&mut reader).starts_with("-ERR"));

    server.stop();
}

fn store_with_two_messages(store: &Arc<MailboxStore>) -> Arc<mailtrap_core::Mailbox> {
    store.add_mailbox("alice", "secret", "alice@localhost");
    let mailbox = store.find_mailbox("alice").unwrap();
    mailbox.add_message(b"A".to_vec());
    mailbox.add_message(b"B".to_vec());
    mailbox
}
