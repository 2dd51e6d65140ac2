//! Configuration fingerprints.
//!
//! A fingerprint is a SHA-256 digest over the endpoint and credentials a
//! connection was opened with. The pool keeps the fingerprint of its current
//! data source; a connection whose fingerprint differs is never reused.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::config::{Credentials, DataSource};

/// Digest identifying the endpoint + credentials behind a connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Derive the fingerprint for `endpoint` accessed with `credentials`.
    pub fn compute(endpoint: &str, credentials: &Credentials) -> Self {
        let mut hasher = Sha256::new();
        // Length-prefix each part so ("ab", "c") and ("a", "bc") differ.
        for part in [
            Some(endpoint),
            credentials.username.as_deref(),
            credentials.password.as_deref(),
        ] {
            match part {
                Some(value) => {
                    hasher.update([1u8]);
                    hasher.update((value.len() as u64).to_be_bytes());
                    hasher.update(value.as_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        Self(hasher.finalize().into())
    }

    /// Fingerprint of a data source's endpoint and configured credentials.
    pub fn of(datasource: &DataSource) -> Self {
        Self::compute(&datasource.endpoint, &datasource.credentials)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl fmt::Display for Fingerprint {
    /// Short form: the first 8 bytes as hex.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_fingerprint() {
        let a = Fingerprint::compute("db:5432", &Credentials::new("app", "pw"));
        let b = Fingerprint::compute("db:5432", &Credentials::new("app", "pw"));
        assert_eq!(a, b);
    }

    #[test]
    fn endpoint_changes_fingerprint() {
        let creds = Credentials::new("app", "pw");
        assert_ne!(
            Fingerprint::compute("db1:5432", &creds),
            Fingerprint::compute("db2:5432", &creds)
        );
    }

    #[test]
    fn password_changes_fingerprint() {
        assert_ne!(
            Fingerprint::compute("db:5432", &Credentials::new("app", "pw1")),
            Fingerprint::compute("db:5432", &Credentials::new("app", "pw2"))
        );
    }

    #[test]
    fn missing_password_differs_from_empty_password() {
        let none = Credentials {
            username: Some("app".to_string()),
            password: None,
        };
        let empty = Credentials::new("app", "");
        assert_ne!(
            Fingerprint::compute("db", &none),
            Fingerprint::compute("db", &empty)
        );
    }

    #[test]
    fn boundaries_between_parts_matter() {
        assert_ne!(
            Fingerprint::compute("ab", &Credentials::new("c", "")),
            Fingerprint::compute("a", &Credentials::new("bc", ""))
        );
    }

    #[test]
    fn display_is_short_hex_prefix() {
        let fp = Fingerprint::compute("db", &Credentials::anonymous());
        let short = fp.to_string();
        assert_eq!(short.len(), 16);
        assert!(fp.to_hex().starts_with(&short));
        assert_eq!(fp.to_hex().len(), 64);
    }

    #[test]
    fn of_datasource_matches_compute() {
        let ds = DataSource::new("db", Credentials::new("u", "p"));
        assert_eq!(Fingerprint::of(&ds), Fingerprint::compute("db", &ds.credentials));
    }
}
