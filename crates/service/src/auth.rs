use std::time::{SystemTime, UNIX_EPOCH};

use ahash::{HashMap, HashMapExt};
use codec::crypto::{long_term_credential_digest, short_term_credential, time_limited_password};

/// Credential mechanisms.
///
/// All three end in the same place, a key for the MESSAGE-INTEGRITY
/// HMAC, they only differ in how the key is provisioned:
///
/// - **Short-term**: the key is SASLprep(password) for a statically
///   known username. No challenge round-trip; the client is expected
///   to know its password out of band.
/// - **Long-term**: the key is MD5(username:realm:password) for a
///   statically known username. Unauthenticated requests are
///   challenged with REALM and a fresh NONCE.
/// - **Time-limited**: as long-term, but usernames have the form
///   `<unix-expiry>:<base-user>` and the password is derived from a
///   shared secret, so the user database is replaced by a clock check
///   and an HMAC.
pub enum Credentials {
    ShortTerm { keys: HashMap<String, Vec<u8>> },
    LongTerm { keys: HashMap<String, [u8; 16]> },
    TimeLimited { shared_secret: String },
}

impl Credentials {
    /// Short-term credentials for a static username/password set.
    pub fn short_term<'a, I>(users: I) -> Result<Self, codec::Error>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut keys = HashMap::new();
        for (username, password) in users {
            keys.insert(username.clone(), short_term_credential(password)?);
        }

        Ok(Self::ShortTerm { keys })
    }

    /// Long-term credentials for a static username/password set. The
    /// passwords are digested right away; only HA1 values are kept.
    pub fn long_term<'a, I>(realm: &str, users: I) -> Result<Self, codec::Error>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut keys = HashMap::new();
        for (username, password) in users {
            keys.insert(
                username.clone(),
                long_term_credential_digest(username, realm, password)?,
            );
        }

        Ok(Self::LongTerm { keys })
    }

    /// Time-limited credentials derived from a shared secret.
    pub fn time_limited(shared_secret: String) -> Self {
        Self::TimeLimited { shared_secret }
    }

    /// Whether this mechanism challenges clients with REALM and NONCE
    /// and demands both back on every request.
    pub fn is_long_term(&self) -> bool {
        !matches!(self, Self::ShortTerm { .. })
    }

    /// Look up or derive the message-integrity key for a username.
    ///
    /// For the time-limited mechanism this is also where expired
    /// usernames die: once the embedded timestamp is in the past no
    /// key exists for them anymore.
    pub fn key(&self, username: &str, realm: &str) -> Option<Vec<u8>> {
        match self {
            Self::ShortTerm { keys } => keys.get(username).cloned(),
            Self::LongTerm { keys } => keys.get(username).map(|it| it.to_vec()),
            Self::TimeLimited { shared_secret } => {
                let (expiry, _) = username.split_once(':')?;
                if expiry.parse::<u64>().ok()? <= unix_timestamp() {
                    return None;
                }

                let password = time_limited_password(shared_secret, username).ok()?;
                long_term_credential_digest(username, realm, &password)
                    .ok()
                    .map(|it| it.to_vec())
            }
        }
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|it| it.as_secs())
        .unwrap_or(0)
}
