//! Cryptographic utilities for Huddle Server
//!
//! Server-side crypto is minimal - only for:
//! - Room name generation
//! - Time-limited media join credentials
//!
//! Media encryption happens between the clients and the media plane!

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use ring::rand::{SecureRandom, SystemRandom};

const ROOM_NAME_LENGTH: usize = 16;

/// Generate a globally unique room name shared with the media provider
pub fn generate_room_name() -> String {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; ROOM_NAME_LENGTH];
    rng.fill(&mut bytes).expect("Failed to generate random bytes");
    format!("room-{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Generate a time-limited media join credential for one user in one room.
///
/// The credential is an HMAC over `expiry:room:user_id:can_create` so the
/// media plane can verify it with the shared secret alone. Returns the
/// signed claim string and the base64 signature joined with a dot.
pub fn generate_media_credential(
    secret: &str,
    room: &str,
    user_id: &str,
    can_create_room: bool,
    ttl_seconds: u64,
) -> String {
    let expiry = Utc::now().timestamp() as u64 + ttl_seconds;
    let claim = format!("{}:{}:{}:{}", expiry, room, user_id, u8::from(can_create_room));

    use ring::hmac;
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let signature = hmac::sign(&key, claim.as_bytes());

    format!("{}.{}", claim, URL_SAFE_NO_PAD.encode(signature.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_name_generation() {
        let a = generate_room_name();
        let b = generate_room_name();

        assert!(a.starts_with("room-"));
        assert_ne!(a, b); // Should be unique
    }

    #[test]
    fn test_media_credential() {
        let cred = generate_media_credential("secret", "room-abc", "user1", true, 3600);

        let (claim, signature) = cred.rsplit_once('.').unwrap();
        assert!(claim.contains(":room-abc:user1:1"));
        assert!(!signature.is_empty());

        // Different users must get different signatures
        let other = generate_media_credential("secret", "room-abc", "user2", true, 3600);
        assert_ne!(cred, other);
    }
}
