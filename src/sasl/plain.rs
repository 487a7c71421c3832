//! PLAIN (RFC 4616): `\0authcid\0password`, base64-encoded.

use super::{b64_decode, read_b64_line, AuthChannel, Authenticator, Credentials};
use crate::error::MailResult;
use crate::store::MailboxStore;

pub struct PlainAuthenticator;

/// Splits `authzid\0authcid\0password` into `(authcid, password)`. `authzid`
/// is accepted but ignored.
fn parse_credentials(decoded: &[u8]) -> Option<(String, String)> {
    let parts: Vec<&[u8]> = decoded.splitn(3, |&b| b == 0).collect();
    if parts.len() != 3 {
        return None;
    }
    let authcid = String::from_utf8(parts[1].to_vec()).ok()?;
    let password = String::from_utf8(parts[2].to_vec()).ok()?;
    Some((authcid, password))
}

impl Authenticator for PlainAuthenticator {
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
        let Some((authcid, password)) = parse_credentials(&decoded) else {
            return Ok(None);
        };
        let matched = store.find_mailbox(&authcid).is_some_and(|m| m.secret() == password);
        Ok(if matched {
            Some(Credentials {
                username: authcid,
                secret: password,
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
    fn parses_authzid_authcid_password() {
        let raw = b"\0alice\0password";
        let (authcid, password) = parse_credentials(raw).unwrap();
        assert_eq!(authcid, "alice");
        assert_eq!(password, "password");
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(parse_credentials(b"alice\0password").is_none());
    }
}
