//! End-to-end SMTP session over a real loopback socket.

use mailtrap_core::{MailboxStore, SmtpServer};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn connect(server: &SmtpServer) -> (BufReader<TcpStream>, TcpStream) {
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
fn plain_auth_then_data_delivers_to_recipient() {
    init_logging();
    let store = Arc::new(MailboxStore::new());
    store.add_mailbox("alice", "password", "alice@localhost");
    store.add_mailbox("bob", "pw", "bob@localhost");

    let server = SmtpServer::new(Arc::clone(&store));
    server.start().unwrap();
    let (mut reader, mut stream) = connect(&server);

    assert_eq!(read_line(&mut reader), "220 localhost Service ready");

    send(&mut stream, "EHLO localhost");
    assert_eq!(read_line(&mut reader), "250-localhost Hello localhost");
    assert_eq!(read_line(&mut reader), "250-STARTTLS");
    assert_eq!(read_line(&mut reader), "250-AUTH PLAIN LOGIN");
    assert_eq!(read_line(&mut reader), "250 OK");

    send(&mut stream, "AUTH PLAIN AGFsaWNlAHBhc3N3b3Jk");
    assert_eq!(read_line(&mut reader), "235 2.7.0 Authentication succeeded");

    send(&mut stream, "MAIL FROM:<alice@localhost>");
    assert_eq!(read_line(&mut reader), "250 2.1.0 Ok");

    send(&mut stream, "RCPT TO:<bob@localhost>");
    assert_eq!(read_line(&mut reader), "250 2.1.5 Ok");

    send(&mut stream, "DATA");
    assert_eq!(read_line(&mut reader), "354 Send message, end with <CRLF>.<CRLF>");

    send(&mut stream, "Subject: Hi");
    send(&mut stream, "");
    send(&mut stream, "Hello");
    send(&mut stream, "..");
    send(&mut stream, ".");
    assert_eq!(read_line(&mut reader), "250 2.6.0 Message accepted");

    send(&mut stream, "QUIT");
    assert_eq!(read_line(&mut reader), "221 2.0.0 Goodbye");

    server.stop();

    let bob = store.find_mailbox("bob").unwrap();
    let messages = bob.get_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content(), b"Subject: Hi\r\n\r\nHello\r\n.");

    assert_eq!(server.authenticated_username().as_deref(), Some("alice"));
    assert_eq!(server.message(), Some(b"Subject: Hi\r\n\r\nHello\r\n.".to_vec()));
    assert!(server.log().contains("C: AUTH PLAIN AGFsaWNlAHBhc3N3b3Jk"));
    assert!(server.log().contains("S: 250 2.6.0 Message accepted"));
}

#[test]
fn mail_from_rejected_when_authentication_required() {
    init_logging();
    let store = Arc::new(MailboxStore::new());
    let server = SmtpServer::new(store);
    server.set_authentication_required(true);
    server.start().unwrap();
    let (mut reader, mut stream) = connect(&server);
    read_line(&mut reader);

    send(&mut stream, "HELO localhost");
    read_line(&mut reader);

    send(&mut stream, "MAIL FROM:<x@y>");
    assert_eq!(read_line(&mut reader), "530 5.7.0 Authentication required");

    server.stop();
}

#[test]
fn rcpt_without_mail_from_is_bad_sequence() {
    init_logging();
    let store = Arc::new(MailboxStore::new());
    let server = SmtpServer::new(store);
    server.start().unwrap();
    let (mut reader, mut stream) = connect(&server);
    read_line(&mut reader);

    send(&mut stream, "HELO localhost");
    read_line(&mut reader);

    send(&mut stream, "RCPT TO:<x@y>");
    assert_eq!(read_line(&mut reader), "503 5.5.1 Bad sequence of commands");

    server.stop();
}
