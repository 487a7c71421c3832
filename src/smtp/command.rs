//! SMTP command contract: one parser + one `execute` per verb (RFC 5321 +
//! RFC 4954 SASL).

use super::session::SmtpSession;
use super::SmtpServer;
use crate::client::Client;
use crate::dot_stuff::{join_data_lines, unstuff_line};
use crate::error::{MailError, MailResult};
use crate::sasl::AuthChannel;
use std::io::{Read, Write};

pub type SmtpParser = fn(&str) -> MailResult<SmtpCommand>;

#[derive(Debug, Clone)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Vrfy(String),
    Quit,
    StartTls,
    Auth(String, Option<String>),
}

// --- parsers -----------------------------------------------------------

fn parse_host(args: &str) -> MailResult<String> {
    let host = args.trim();
    if host.is_empty() {
        return Err(MailError::Parse("missing hostname".into()));
    }
    Ok(host.to_string())
}

pub fn parse_helo(args: &str) -> MailResult<SmtpCommand> {
    Ok(SmtpCommand::Helo(parse_host(args)?))
}

pub fn parse_ehlo(args: &str) -> MailResult<SmtpCommand> {
    Ok(SmtpCommand::Ehlo(parse_host(args)?))
}

/// Extracts `<addr>` from a `FROM:<addr>` / `TO:<addr>` argument, requiring
/// the keyword prefix (spec calls this out explicitly).
fn parse_angle_addr(args: &str, keyword: &str) -> MailResult<String> {
    let args = args.trim();
    let rest = args
        .strip_prefix(keyword)
        .ok_or_else(|| MailError::Parse(format!("expected {keyword}<address>")))?;
    let rest = rest.trim_start();
    let inner = rest
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .ok_or_else(|| MailError::Parse(format!("expected {keyword}<address>")))?;
    if inner.is_empty() {
        return Err(MailError::Parse("empty address".into()));
    }
    Ok(inner.to_string())
}

pub fn parse_mail_from(args: &str) -> MailResult<SmtpCommand> {
    Ok(SmtpCommand::MailFrom(parse_angle_addr(args, "FROM:")?))
}

pub fn parse_rcpt_to(args: &str) -> MailResult<SmtpCommand> {
    Ok(SmtpCommand::RcptTo(parse_angle_addr(args, "TO:")?))
}

pub fn parse_data(_args: &str) -> MailResult<SmtpCommand> {
    Ok(SmtpCommand::Data)
}

pub fn parse_rset(_args: &str) -> MailResult<SmtpCommand> {
    Ok(SmtpCommand::Rset)
}

pub fn parse_noop(_args: &str) -> MailResult<SmtpCommand> {
    Ok(SmtpCommand::Noop)
}

pub fn parse_vrfy(args: &str) -> MailResult<SmtpCommand> {
    let addr = args.trim();
    if addr.is_empty() {
        return Err(MailError::Parse("VRFY requires an address".into()));
    }
    Ok(SmtpCommand::Vrfy(addr.to_string()))
}

pub fn parse_quit(_args: &str) -> MailResult<SmtpCommand> {
    Ok(SmtpCommand::Quit)
}

pub fn parse_starttls(_args: &str) -> MailResult<SmtpCommand> {
    Ok(SmtpCommand::StartTls)
}

pub fn parse_auth(args: &str) -> MailResult<SmtpCommand> {
    let args = args.trim();
    if args.is_empty() {
        return Err(MailError::Parse("AUTH requires a mechanism".into()));
    }
    let (mech, rest) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let initial = if rest.trim().is_empty() { None } else { Some(rest.trim().to_string()) };
    Ok(SmtpCommand::Auth(mech.to_string(), initial))
}

// --- AUTH channel framing -----------------------------------------------

struct SmtpAuthChannel<'a, S> {
    client: &'a mut Client<S>,
}

impl<'a, S: Read + Write> AuthChannel for SmtpAuthChannel<'a, S> {
    fn write_continuation(&mut self, data_b64: &str) -> MailResult<()> {
        self.client.write_line(&format!("334 {data_b64}"))
    }

    fn read_response_line(&mut self) -> MailResult<Option<String>> {
        self.client.read_line()
    }
}

// --- execute -------------------------------------------------------------

impl SmtpCommand {
    pub fn execute<S: Read + Write>(
        &self,
        server: &SmtpServer,
        session: &mut SmtpSession,
        client: &mut Client<S>,
    ) -> MailResult<()> {
        match self {
            SmtpCommand::Helo(host) => self.execute_helo(host, server, session, client),
            SmtpCommand::Ehlo(host) => self.execute_ehlo(host, server, session, client),
            SmtpCommand::MailFrom(addr) => self.execute_mail_from(addr, server, session, client),
            SmtpCommand::RcptTo(addr) => self.execute_rcpt_to(addr, session, client),
            SmtpCommand::Data => self.execute_data(server, session, client),
            SmtpCommand::Rset => {
                session.end_transaction();
                client.write_line("250 2.0.0 Ok")
            }
            SmtpCommand::Noop => client.write_line("250 2.0.0 Ok"),
            SmtpCommand::Vrfy(_) => client.write_line("252 2.5.0 Cannot verify"),
            SmtpCommand::Quit => {
                session.close();
                client.write_line("221 2.0.0 Goodbye")
            }
            SmtpCommand::StartTls => client.write_line("454 4.7.0 TLS not available"),
            SmtpCommand::Auth(mech, initial) => self.execute_auth(mech, initial.as_deref(), server, session, client),
        }
    }

    fn execute_helo<S: Read + Write>(
        &self,
        host: &str,
        server: &SmtpServer,
        session: &mut SmtpSession,
        client: &mut Client<S>,
    ) -> MailResult<()> {
        session.end_transaction();
        session.greeted_host = Some(host.to_string());
        client.write_line(&format!("250 {}", server.hostname()))
    }

    fn execute_ehlo<S: Read + Write>(
        &self,
        host: &str,
        server: &SmtpServer,
        session: &mut SmtpSession,
        client: &mut Client<S>,
    ) -> MailResult<()> {
        session.end_transaction();
        session.greeted_host = Some(host.to_string());
        let extensions = server.extensions();
        client.write_line(&format!("250-{} Hello {host}", server.hostname()))?;
        for ext in &extensions {
            client.write_line(&format!("250-{ext}"))?;
        }
        client.write_line("250 OK")
    }

    fn execute_mail_from<S: Read + Write>(
        &self,
        addr: &str,
        server: &SmtpServer,
        session: &mut SmtpSession,
        client: &mut Client<S>,
    ) -> MailResult<()> {
        if session.in_transaction() {
            return client.write_line("503 5.5.1 Bad sequence of commands");
        }
        if session.authentication_required(server.authentication_required()) {
            return client.write_line("530 5.7.0 Authentication required");
        }
        session.sender = Some(addr.to_string());
        client.write_line("250 2.1.0 Ok")
    }

    fn execute_rcpt_to<S: Read + Write>(&self, addr: &str, session: &mut SmtpSession, client: &mut Client<S>) -> MailResult<()> {
        if session.sender.is_none() {
            return client.write_line("503 5.5.1 Bad sequence of commands");
        }
        session.recipients.push(addr.to_string());
        client.write_line("250 2.1.5 Ok")
    }

    fn execute_data<S: Read + Write>(&self, server: &SmtpServer, session: &mut SmtpSession, client: &mut Client<S>) -> MailResult<()> {
        if session.recipients.is_empty() {
            return client.write_line("503 5.5.1 Bad sequence of commands");
        }
        if session.authentication_required(server.authentication_required()) {
            return client.write_line("530 5.7.0 Authentication required");
        }
        client.write_line("354 Send message, end with <CRLF>.<CRLF>")?;
        let mut lines = Vec::new();
        loop {
            match client.read_line_bytes()? {
                None => return Err(MailError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed mid-DATA"))),
                Some(line) if line == b"." => break,
                Some(line) => lines.push(unstuff_line(&line).to_vec()),
            }
        }
        let message = join_data_lines(&lines);
        for recipient in &session.recipients {
            if let Some(mailbox) = server.store().find_mailbox(recipient) {
                mailbox.add_message(message.clone());
            }
        }
        session.last_message = Some(message);
        session.end_transaction();
        client.write_line("250 2.6.0 Message accepted")
    }

    fn execute_auth<S: Read + Write>(
        &self,
        mech: &str,
        initial: Option<&str>,
        server: &SmtpServer,
        session: &mut SmtpSession,
        client: &mut Client<S>,
    ) -> MailResult<()> {
        if !server.mechanism_enabled(mech) {
            return client.write_line("504 5.5.4 Unrecognized authentication mechanism");
        }
        let Some(authenticator) = server.auth_registry().get(mech) else {
            return client.write_line("504 5.5.4 Unrecognized authentication mechanism");
        };
        log::debug!("smtp AUTH {mech} selected");
        let mut channel = SmtpAuthChannel { client };
        match authenticator.authenticate(initial, &mut channel, server.store())? {
            Some(credentials) => {
                session.authenticated = true;
                session.auth_username = Some(credentials.username);
                client.write_line("235 2.7.0 Authentication succeeded")
            }
            None => {
                log::warn!("smtp AUTH {mech} failed");
                client.write_line("535 5.7.8 Authentication credentials invalid")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mail_from_requires_keyword_prefix() {
        assert!(matches!(parse_mail_from("FROM:<a@b>").unwrap(), SmtpCommand::MailFrom(a) if a == "a@b"));
        assert!(parse_mail_from("<a@b>").is_err());
    }

    #[test]
    fn parse_rcpt_to_requires_keyword_prefix() {
        assert!(matches!(parse_rcpt_to("TO:<a@b>").unwrap(), SmtpCommand::RcptTo(a) if a == "a@b"));
        assert!(parse_rcpt_to("<a@b>").is_err());
    }

    #[test]
    fn parse_auth_splits_mechanism_from_initial_response() {
        match parse_auth("PLAIN AGFsaWNlAHBhc3N3b3Jk").unwrap() {
            SmtpCommand::Auth(mech, Some(initial)) => {
                assert_eq!(mech, "PLAIN");
                assert_eq!(initial, "AGFsaWNlAHBhc3N3b3Jk");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }
}
