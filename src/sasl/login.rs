//! LOGIN: prompt `Username:` then `Password:`, each base64-encoded.

use super::{b64_encode, read_b64_line, AuthChannel, Authenticator, Credentials};
use crate::error::MailResult;
use crate::store::MailboxStore;

pub struct LoginAuthenticator;

impl Authenticator for LoginAuthenticator {
    fn authenticate(
        &self,
        _initial: Option<&str>,
        channel: &mut dyn AuthChannel,
        store: &MailboxStore,
    ) -> MailResult<Option<Credentials>> {
        channel.write_continuation(&b64_encode(b"Username:"))?;
        let Some(username_bytes) = read_b64_line(channel)? else {
            return Ok(None);
        };
        let Ok(username) = String::from_utf8(username_bytes) else {
            return Ok(None);
        };

        channel.write_continuation(&b64_encode(b"Password:"))?;
        let Some(password_bytes) = read_b64_line(channel)? else {
            return Ok(None);
        };
        let Ok(password) = String::from_utf8(password_bytes) else {
            return Ok(None);
        };

        let matched = store.find_mailbox(&username).is_some_and(|m| m.secret() == password);
        Ok(if matched {
            Some(Credentials {
                username,
                secret: password,
            })
        } else {
            None
        })
    }
}
