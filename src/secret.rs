//! In-memory secret handling for role passwords.
//!
//! A `Secret` never prints its content: `Debug` and `Display` are redacted,
//! and the buffer is zeroized when the value is dropped.
//! Use `expose()` only at the point where the secret is handed to a child
//! process on standard input.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fmt;
use zeroize::Zeroizing;

/// Length of generated role passwords
pub const GENERATED_PASSWORD_LEN: usize = 20;

/// Redacted, self-wiping string.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    /// Wrap an existing secret value
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    /// Generate a random alphanumeric secret of `len` characters
    pub fn generate(len: usize) -> Self {
        // Sized up front so no partial copy is left behind by a reallocation
        let mut value = Zeroizing::new(String::with_capacity(len));
        value.extend(
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from),
        );
        Self(value)
    }

    /// Access the plaintext value
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Zeroizing<String>> for Secret {
    fn from(value: Zeroizing<String>) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<redacted>)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_length_and_charset() {
        let secret = Secret::generate(GENERATED_PASSWORD_LEN);
        assert_eq!(secret.len(), GENERATED_PASSWORD_LEN);
        assert!(secret.expose().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generate_fills_presized_buffer() {
        let secret = Secret::generate(GENERATED_PASSWORD_LEN);
        assert_eq!(secret.0.capacity(), GENERATED_PASSWORD_LEN);
    }

    #[test]
    fn test_generated_secrets_differ() {
        let a = Secret::generate(GENERATED_PASSWORD_LEN);
        let b = Secret::generate(GENERATED_PASSWORD_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_debug_and_display_are_redacted() {
        let secret = Secret::new("correct horse".to_string());
        assert_eq!(format!("{:?}", secret), "Secret(<redacted>)");
        assert_eq!(secret.to_string(), "<redacted>");
        assert_eq!(secret.expose(), "correct horse");
    }

    #[test]
    fn test_from_zeroizing_keeps_buffer() {
        let buffer = Zeroizing::new(String::from("s3cret"));
        let ptr = buffer.as_ptr();
        let secret = Secret::from(buffer);
        assert_eq!(secret.expose().as_ptr(), ptr);
        assert_eq!(secret.expose(), "s3cret");
    }
}
