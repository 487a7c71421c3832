//! CRAM-MD5 (RFC 2195): server sends a random challenge, client replies
//! `username HMAC-MD5-hex(secret, challenge)`.

use super::{b64_decode, b64_encode, read_b64_line, AuthChannel, Authenticator, Credentials};
use crate::error::MailResult;
use crate::store::MailboxStore;
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::Rng;

type HmacMd5 = Hmac<Md5>;

/// `<random>@<hostname>`; this server only ever binds loopback, so the
/// hostname half of the challenge is fixed.
fn generate_challenge() -> String {
    let nonce: u64 = rand::thread_rng().gen();
    format!("<{:016x}@localhost>", nonce)
}

fn hmac_md5_hex(secret: &str, challenge: &str) -> String {
    let mut mac = HmacMd5::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(challenge.as_bytes());
    let digest = mac.finalize().into_bytes();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct CramMd5Authenticator;

impl Authenticator for CramMd5Authenticator {
    fn authenticate(
        &self,
        initial: Option<&str>,
        channel: &mut dyn AuthChannel,
        store: &MailboxStore,
    ) -> MailResult<Option<Credentials>> {
        // CRAM-MD5 has no initial response; an initial parameter is a
        // protocol violation from the client, not fatal to the connection.
        if initial.is_some() {
            return Ok(None);
        }
        let challenge = generate_challenge();
        channel.write_continuation(&b64_encode(challenge.as_bytes()))?;
        let Some(response) = read_b64_line(channel)? else {
            return Ok(None);
        };
        let Ok(response) = String::from_utf8(response) else {
            return Ok(None);
        };
        let Some((username, digest)) = response.rsplit_once(' ') else {
            return Ok(None);
        };
        let Some(mailbox) = store.find_mailbox(username) else {
            return Ok(None);
        };
        if hmac_md5_hex(mailbox.secret(), &challenge) != digest {
            return Ok(None);
        }
        Ok(Some(Credentials {
            username: mailbox.username().to_string(),
            secret: mailbox.secret().to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_vector() {
        // RFC 2195 §3 example: secret "tanstaaftanstaaf", challenge
        // "<1896.697170952@postoffice.reston.mci.net>".
        let digest = hmac_md5_hex("tanstaaftanstaaf", "<1896.697170952@postoffice.reston.mci.net>");
        assert_eq!(digest, "b913a602c7eda7a495b4e6e7334d3890");
    }

    #[test]
    fn challenge_is_base64able_and_varies() {
        let a = generate_challenge();
        let b = generate_challenge();
        assert_ne!(a, b);
        assert!(b64_decode(&b64_encode(a.as_bytes())).is_some());
    }
}
