//! POP3 command contract: one parser + one `execute` per verb. The verb
//! enum itself carries whatever parameters the parser extracted.

use super::session::{Pop3Session, Pop3State};
use super::Pop3Server;
use crate::client::Client;
use crate::dot_stuff::stuff_for_wire;
use crate::error::{MailError, MailResult};
use crate::sasl::AuthChannel;
use md5::{Digest, Md5};
use std::io::{Read, Write};

pub type Pop3Parser = fn(&str) -> MailResult<Pop3Command>;

#[derive(Debug, Clone)]
pub enum Pop3Command {
    Capa,
    User(String),
    Pass(String),
    Apop(String, String),
    Auth(String, Option<String>),
    Stat,
    List(Option<usize>),
    Uidl(Option<usize>),
    Retr(usize),
    Dele(usize),
    Top(usize, usize),
    Noop,
    Rset,
    Quit,
}

fn ok(msg: impl AsRef<str>) -> String {
    format!("+OK {}", msg.as_ref())
}

fn err(msg: impl AsRef<str>) -> String {
    format!("-ERR {}", msg.as_ref())
}

// --- parsers -----------------------------------------------------------

pub fn parse_capa(_args: &str) -> MailResult<Pop3Command> {
    Ok(Pop3Command::Capa)
}

pub fn parse_user(args: &str) -> MailResult<Pop3Command> {
    let name = args.trim();
    if name.is_empty() {
        return Err(MailError::Parse("USER requires a name".into()));
    }
    Ok(Pop3Command::User(name.to_string()))
}

pub fn parse_pass(args: &str) -> MailResult<Pop3Command> {
    if args.is_empty() {
        return Err(MailError::Parse("PASS requires a secret".into()));
    }
    Ok(Pop3Command::Pass(args.to_string()))
}

pub fn parse_apop(args: &str) -> MailResult<Pop3Command> {
    let mut parts = args.split_whitespace();
    let (Some(name), Some(digest)) = (parts.next(), parts.next()) else {
        return Err(MailError::Parse("APOP requires name and digest".into()));
    };
    Ok(Pop3Command::Apop(name.to_string(), digest.to_string()))
}

pub fn parse_auth(args: &str) -> MailResult<Pop3Command> {
    let args = args.trim();
    if args.is_empty() {
        return Err(MailError::Parse("AUTH requires a mechanism".into()));
    }
    let (mech, rest) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let initial = if rest.trim().is_empty() { None } else { Some(rest.trim().to_string()) };
    Ok(Pop3Command::Auth(mech.to_string(), initial))
}

pub fn parse_stat(_args: &str) -> MailResult<Pop3Command> {
    Ok(Pop3Command::Stat)
}

fn parse_optional_index(args: &str) -> MailResult<Option<usize>> {
    let trimmed = args.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<usize>()
        .map(Some)
        .map_err(|_| MailError::Parse(format!("invalid message number {trimmed:?}")))
}

pub fn parse_list(args: &str) -> MailResult<Pop3Command> {
    Ok(Pop3Command::List(parse_optional_index(args)?))
}

pub fn parse_uidl(args: &str) -> MailResult<Pop3Command> {
    Ok(Pop3Command::Uidl(parse_optional_index(args)?))
}

fn parse_required_index(args: &str) -> MailResult<usize> {
    args.trim()
        .parse::<usize>()
        .map_err(|_| MailError::Parse(format!("invalid message number {:?}", args.trim())))
}

pub fn parse_retr(args: &str) -> MailResult<Pop3Command> {
    Ok(Pop3Command::Retr(parse_required_index(args)?))
}

pub fn parse_dele(args: &str) -> MailResult<Pop3Command> {
    Ok(Pop3Command::Dele(parse_required_index(args)?))
}

pub fn parse_top(args: &str) -> MailResult<Pop3Command> {
    let mut parts = args.split_whitespace();
    let (Some(n), Some(k)) = (parts.next(), parts.next()) else {
        return Err(MailError::Parse("TOP requires message number and line count".into()));
    };
    let n: usize = n.parse().map_err(|_| MailError::Parse(format!("invalid message number {n:?}")))?;
    let k: usize = k.parse().map_err(|_| MailError::Parse(format!("invalid line count {k:?}")))?;
    Ok(Pop3Command::Top(n, k))
}

pub fn parse_noop(_args: &str) -> MailResult<Pop3Command> {
    Ok(Pop3Command::Noop)
}

pub fn parse_rset(_args: &str) -> MailResult<Pop3Command> {
    Ok(Pop3Command::Rset)
}

pub fn parse_quit(_args: &str) -> MailResult<Pop3Command> {
    Ok(Pop3Command::Quit)
}

// --- AUTH channel framing -----------------------------------------------

struct Pop3AuthChannel<'a, S> {
    client: &'a mut Client<S>,
}

impl<'a, S: Read + Write> AuthChannel for Pop3AuthChannel<'a, S> {
    fn write_continuation(&mut self, data_b64: &str) -> MailResult<()> {
        self.client.write_line(&format!("+ {data_b64}"))
    }

    fn read_response_line(&mut self) -> MailResult<Option<String>> {
        self.client.read_line()
    }
}

// --- execute -------------------------------------------------------------

impl Pop3Command {
    pub fn execute<S: Read + Write>(
        &self,
        server: &Pop3Server,
        session: &mut Pop3Session,
        client: &mut Client<S>,
    ) -> MailResult<()> {
        match self {
            Pop3Command::Capa => self.execute_capa(server, client),
            Pop3Command::User(name) => self.execute_user(name, session, client),
            Pop3Command::Pass(secret) => self.execute_pass(secret, server, session, client),
            Pop3Command::Apop(name, digest) => self.execute_apop(name, digest, server, session, client),
            Pop3Command::Auth(mech, initial) => self.execute_auth(mech, initial.as_deref(), server, session, client),
            Pop3Command::Stat => self.execute_stat(session, client),
            Pop3Command::List(n) => self.execute_list(*n, session, client),
            Pop3Command::Uidl(n) => self.execute_uidl(*n, session, client),
            Pop3Command::Retr(n) => self.execute_retr(*n, session, client),
            Pop3Command::Dele(n) => self.execute_dele(*n, session, client),
            Pop3Command::Top(n, k) => self.execute_top(*n, *k, session, client),
            Pop3Command::Noop => {
                require_transaction(session)?;
                client.write_line(&ok("NOOP"))
            }
            Pop3Command::Rset => self.execute_rset(session, client),
            Pop3Command::Quit => self.execute_quit(session, client),
        }
    }

    fn execute_capa<S: Read + Write>(&self, server: &Pop3Server, client: &mut Client<S>) -> MailResult<()> {
        client.write_line(&ok("Capability list follows"))?;
        client.write_line("USER")?;
        client.write_line("UIDL")?;
        client.write_line("TOP")?;
        let mechs = server.enabled_mechanism_names();
        if !mechs.is_empty() {
            client.write_line(&format!("SASL {}", mechs.join(" ")))?;
        }
        client.write_line(".")
    }

    fn execute_user<S: Read + Write>(&self, name: &str, session: &mut Pop3Session, client: &mut Client<S>) -> MailResult<()> {
        if session.state != Pop3State::Authorization {
            return client.write_line(&err("command not valid in this state"));
        }
        session.username = Some(name.to_string());
        client.write_line(&ok("User accepted"))
    }

    fn execute_pass<S: Read + Write>(
        &self,
        secret: &str,
        server: &Pop3Server,
        session: &mut Pop3Session,
        client: &mut Client<S>,
    ) -> MailResult<()> {
        if session.state != Pop3State::Authorization {
            return client.write_line(&err("command not valid in this state"));
        }
        let Some(name) = session.username.clone() else {
            return client.write_line(&err("USER first"));
        };
        match server.store().find_mailbox(&name) {
            Some(mailbox) if mailbox.secret() == secret => {
                session.authenticate(mailbox);
                client.write_line(&ok("Logged in"))
            }
            _ => {
                log::warn!("pop3 USER/PASS failed for {name}");
                session.username = None;
                client.write_line(&err("Authentication failed"))
            }
        }
    }

    fn execute_apop<S: Read + Write>(
        &self,
        name: &str,
        digest: &str,
        server: &Pop3Server,
        session: &mut Pop3Session,
        client: &mut Client<S>,
    ) -> MailResult<()> {
        if session.state != Pop3State::Authorization {
            return client.write_line(&err("command not valid in this state"));
        }
        let expected = match server.store().find_mailbox(name) {
            Some(mailbox) => {
                let input = format!("{}{}", session.timestamp, mailbox.secret());
                let computed = format!("{:x}", Md5::digest(input.as_bytes()));
                if computed == digest.to_ascii_lowercase() {
                    Some(mailbox)
                } else {
                    None
                }
            }
            None => None,
        };
        match expected {
            Some(mailbox) => {
                session.authenticate(mailbox);
                client.write_line(&ok("Logged in"))
            }
            None => {
                log::warn!("pop3 APOP failed for {name}");
                client.write_line(&err("Authentication failed"))
            }
        }
    }

    fn execute_auth<S: Read + Write>(
        &self,
        mech: &str,
        initial: Option<&str>,
        server: &Pop3Server,
        session: &mut Pop3Session,
        client: &mut Client<S>,
    ) -> MailResult<()> {
        if session.state != Pop3State::Authorization {
            return client.write_line(&err("command not valid in this state"));
        }
        if !server.mechanism_enabled(mech) {
            return client.write_line(&err("Unrecognized authentication mechanism"));
        }
        let Some(authenticator) = server.auth_registry().get(mech) else {
            return client.write_line(&err("Unrecognized authentication mechanism"));
        };
        log::debug!("pop3 AUTH {mech} selected");
        let mut channel = Pop3AuthChannel { client };
        match authenticator.authenticate(initial, &mut channel, server.store())? {
            Some(credentials) => match server.store().find_mailbox(&credentials.username) {
                Some(mailbox) => {
                    session.authenticate(mailbox);
                    client.write_line(&ok("Authentication successful"))
                }
                None => {
                    log::warn!("pop3 AUTH {mech} succeeded for unknown mailbox {}", credentials.username);
                    client.write_line(&err("Authentication failed"))
                }
            },
            None => {
                log::warn!("pop3 AUTH {mech} failed");
                client.write_line(&err("Authentication failed"))
            }
        }
    }

    fn execute_stat<S: Read + Write>(&self, session: &mut Pop3Session, client: &mut Client<S>) -> MailResult<()> {
        require_transaction(session)?;
        let mailbox = session.mailbox.as_ref().unwrap();
        let messages = mailbox.get_messages();
        let live: Vec<_> = messages.iter().filter(|m| !m.deleted).collect();
        let total_size: usize = live.iter().map(|m| m.size()).sum();
        client.write_line(&ok(format!("{} {}", live.len(), total_size)))
    }

    fn execute_list<S: Read + Write>(&self, n: Option<usize>, session: &mut Pop3Session, client: &mut Client<S>) -> MailResult<()> {
        require_transaction(session)?;
        let mailbox = session.mailbox.as_ref().unwrap();
        let messages = mailbox.get_messages();
        match n {
            Some(n) => match messages.get(n.wrapping_sub(1)) {
                Some(m) if !m.deleted => client.write_line(&ok(format!("{n} {}", m.size()))),
                _ => client.write_line(&err("no such message")),
            },
            None => {
                let live: Vec<_> = messages.iter().filter(|m| !m.deleted).collect();
                client.write_line(&ok(format!("{} messages", live.len())))?;
                for (i, m) in messages.iter().enumerate() {
                    if !m.deleted {
                        client.write_line(&format!("{} {}", i + 1, m.size()))?;
                    }
                }
                client.write_line(".")
            }
        }
    }

    fn execute_uidl<S: Read + Write>(&self, n: Option<usize>, session: &mut Pop3Session, client: &mut Client<S>) -> MailResult<()> {
        require_transaction(session)?;
        let mailbox = session.mailbox.as_ref().unwrap();
        let messages = mailbox.get_messages();
        match n {
            Some(n) => match messages.get(n.wrapping_sub(1)) {
                Some(m) if !m.deleted => client.write_line(&ok(format!("{n} {}", m.uid()))),
                _ => client.write_line(&err("no such message")),
            },
            None => {
                let live: Vec<_> = messages.iter().filter(|m| !m.deleted).collect();
                client.write_line(&ok(format!("{} messages", live.len())))?;
                for (i, m) in messages.iter().enumerate() {
                    if !m.deleted {
                        client.write_line(&format!("{} {}", i + 1, m.uid()))?;
                    }
                }
                client.write_line(".")
            }
        }
    }

    fn execute_retr<S: Read + Write>(&self, n: usize, session: &mut Pop3Session, client: &mut Client<S>) -> MailResult<()> {
        require_transaction(session)?;
        let mailbox = session.mailbox.as_ref().unwrap();
        let messages = mailbox.get_messages();
        let Some(message) = messages.get(n.wrapping_sub(1)).filter(|m| !m.deleted) else {
            return client.write_line(&err("no such message"));
        };
        client.write_line(&ok(format!("{} octets", message.size())))?;
        for line in stuff_for_wire(message.content()) {
            client.write_line_bytes(&line)?;
        }
        client.write_line(".")
    }

    fn execute_dele<S: Read + Write>(&self, n: usize, session: &mut Pop3Session, client: &mut Client<S>) -> MailResult<()> {
        require_transaction(session)?;
        let mailbox = session.mailbox.as_ref().unwrap();
        if mailbox.mark_deleted(n) {
            client.write_line(&ok("Message deleted"))
        } else {
            client.write_line(&err("no such message or already deleted"))
        }
    }

    fn execute_top<S: Read + Write>(&self, n: usize, k: usize, session: &mut Pop3Session, client: &mut Client<S>) -> MailResult<()> {
        require_transaction(session)?;
        let mailbox = session.mailbox.as_ref().unwrap();
        let messages = mailbox.get_messages();
        let Some(message) = messages.get(n.wrapping_sub(1)).filter(|m| !m.deleted) else {
            return client.write_line(&err("no such message"));
        };
        client.write_line(&ok("Top of message follows"))?;
        for line in stuff_for_wire(&message.top(k)) {
            client.write_line_bytes(&line)?;
        }
        client.write_line(".")
    }

    fn execute_rset<S: Read + Write>(&self, session: &mut Pop3Session, client: &mut Client<S>) -> MailResult<()> {
        require_transaction(session)?;
        session.mailbox.as_ref().unwrap().clear_deleted_flags();
        client.write_line(&ok("Maildrop has not changed"))
    }

    fn execute_quit<S: Read + Write>(&self, session: &mut Pop3Session, client: &mut Client<S>) -> MailResult<()> {
        if session.state == Pop3State::Transaction {
            if let Some(mailbox) = session.mailbox.as_ref() {
                mailbox.remove_deleted_messages();
            }
        }
        session.state = Pop3State::Update;
        session.close();
        client.write_line(&ok("Goodbye"))
    }
}

fn require_transaction(session: &Pop3Session) -> MailResult<()> {
    if session.state != Pop3State::Transaction {
        return Err(MailError::State("command requires an authenticated session".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_top_requires_two_numeric_arguments() {
        assert!(matches!(parse_top("1 2").unwrap(), Pop3Command::Top(1, 2)));
        assert!(parse_top("1").is_err());
        assert!(parse_top("x y").is_err());
    }

    #[test]
    fn parse_list_accepts_missing_or_present_index() {
        assert!(matches!(parse_list("").unwrap(), Pop3Command::List(None)));
        assert!(matches!(parse_list("3").unwrap(), Pop3Command::List(Some(3))));
    }

    #[test]
    fn parse_auth_splits_mechanism_from_initial_response() {
        match parse_auth("PLAIN AGFsaWNlAHBhc3N3b3Jk").unwrap() {
            Pop3Command::Auth(mech, Some(initial)) => {
                assert_eq!(mech, "PLAIN");
                assert_eq!(initial, "AGFsaWNlAHBhc3N3b3Jk");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }
}
