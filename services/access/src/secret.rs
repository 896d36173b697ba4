//! Refresh secret generation and hashing
//!
//! Secrets are random alphanumeric strings handed to the client exactly once.
//! Only their SHA-256 hex digest is persisted, so a leaked `sessions` table
//! cannot be replayed. The client presents `<session_id>.<secret>` as its
//! session token; the id alone grants nothing.

use rand::{Rng, distributions::Alphanumeric};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Length of a generated refresh secret
pub const SECRET_LENGTH: usize = 48;

const TOKEN_SEPARATOR: char = '.';

/// Generate a new refresh secret, returning `(plaintext, hash)`
pub fn generate_secret() -> (String, String) {
    let plaintext: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect();
    let hash = hash_secret(&plaintext);
    (plaintext, hash)
}

/// SHA-256 hex digest of a refresh secret
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Session token carrying the id and the current secret
pub fn session_token(session_id: Uuid, secret: &str) -> String {
    format!("{}{}{}", session_id, TOKEN_SEPARATOR, secret)
}

/// Split a session token into id and secret, `None` when malformed
pub fn parse_session_token(token: &str) -> Option<(Uuid, &str)> {
    let (id, secret) = token.split_once(TOKEN_SEPARATOR)?;
    if secret.is_empty() {
        return None;
    }
    let id = Uuid::try_parse(id).ok()?;
    Some((id, secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_hash_matches_plaintext() {
        let (plaintext, hash) = generate_secret();

        assert_eq!(plaintext.len(), SECRET_LENGTH);
        assert_eq!(hash, hash_secret(&plaintext));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_session_token_round_trip() {
        let id = Uuid::new_v4();
        let (secret, _) = generate_secret();

        let token = session_token(id, &secret);
        assert_eq!(parse_session_token(&token), Some((id, secret.as_str())));
    }

    #[test]
    fn test_malformed_session_tokens() {
        let id = Uuid::new_v4();

        assert_eq!(parse_session_token(&id.to_string()), None);
        assert_eq!(parse_session_token(&format!("{}.", id)), None);
        assert_eq!(parse_session_token("not-a-uuid.secret"), None);
        assert_eq!(parse_session_token(""), None);
    }

    #[test]
    fn test_secrets_are_not_reused() {
        let (a, _) = generate_secret();
        let (b, _) = generate_secret();
        assert_ne!(a, b);
    }
}
