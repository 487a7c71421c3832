//! XOAUTH2: `user=<u>\x01auth=Bearer <token>\x01\x01`, base64-encoded. The
//! token is treated as the mailbox secret for comparison (this is a test
//! double, not a real OAuth2 resource server).

use super::{b64_decode, read_b64_line, AuthChannel, Authenticator, Credentials};
use crate::error::MailResult;
use crate::store::MailboxStore;

fn parse(decoded: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(decoded).ok()?;
    let mut user = None;
    let mut token = None;
    for field in text.split('\x01') {
        if let Some(u) = field.strip_prefix("user=") {
            user = Some(u.to_string());
        } else if let Some(t) = field.strip_prefix("auth=Bearer ") {
            token = Some(t.to_string());
        }
    }
    Some((user?, token?))
}

pub struct XOAuth2Authenticator;

impl Authenticator for XOAuth2Authenticator {
    fn authenticate(
        &self,
        initial: Option<&str>,
        channel: &mut dyn AuthChannel,
        store: &MailboxStore,
    ) -> MailResult<Option<Credentials>> {
        let decoded = match initial {
            Some(line) => match b64_decode(line) {
                Some(d) => d,
                None => return Ok(None),
            },
            None => {
                channel.write_continuation("")?;
                match read_b64_line(channel)? {
                    Some(d) => d,
                    None => return Ok(None),
                }
            }
        };
        let Some((user, token)) = parse(&decoded) else {
            return Ok(None);
        };
        let matched = store.find_mailbox(&user).is_some_and(|m| m.secret() == token);
        Ok(if matched {
            Some(Credentials {
                username: user,
                secret: token,
            })
        } else {
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_and_bearer_token() {
        let raw = b"user=alice\x01auth=Bearer ya29.abc\x01\x01";
        let (user, token) = parse(raw).unwrap();
        assert_eq!(user, "alice");
        assert_eq!(token, "ya29.abc");
    }
}
