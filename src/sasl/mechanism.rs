//! SASL mechanism names recognized by the registry.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaslMechanism {
    Plain,
    Login,
    CramMd5,
    DigestMd5,
    XOAuth2,
}

impl SaslMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::Login => "LOGIN",
            SaslMechanism::CramMd5 => "CRAM-MD5",
            SaslMechanism::DigestMd5 => "DIGEST-MD5",
            SaslMechanism::XOAuth2 => "XOAUTH2",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(SaslMechanism::Plain),
            "LOGIN" => Some(SaslMechanism::Login),
            "CRAM-MD5" => Some(SaslMechanism::CramMd5),
            "DIGEST-MD5" => Some(SaslMechanism::DigestMd5),
            "XOAUTH2" => Some(SaslMechanism::XOAuth2),
            _ => None,
        }
    }

    pub const ALL: [SaslMechanism; 5] = [
        SaslMechanism::Plain,
        SaslMechanism::Login,
        SaslMechanism::CramMd5,
        SaslMechanism::DigestMd5,
        SaslMechanism::XOAuth2,
    ];
}

impl fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_name() {
        for m in SaslMechanism::ALL {
            assert_eq!(SaslMechanism::from_name(m.name()), Some(m));
            assert_eq!(SaslMechanism::from_name(&m.name().to_ascii_lowercase()), Some(m));
        }
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(SaslMechanism::from_name("GSSAPI"), None);
    }
}
