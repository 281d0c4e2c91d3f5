//! Friendly identities for participants who did not pick a name.

use collabcanvas_core::User;
use uuid::Uuid;

/// Colour used when none is configured.
pub const DEFAULT_COLOR: &str = "#2563eb";

const ANIMALS: [&str; 10] = [
    "Fox", "Panda", "Otter", "Lynx", "Koala", "Hawk", "Koi", "Swan", "Seal", "Lark",
];

/// `User-<Animal>-<n>` with `n` below 1000, derived from `seed`.
pub fn friendly_name(seed: u128) -> String {
    let animal = ANIMALS[(seed % ANIMALS.len() as u128) as usize];
    let n = (seed >> 64) % 1000;
    format!("User-{}-{}", animal, n)
}

/// A user with a fresh id, and a generated name unless one is given.
pub fn generate_user(name: Option<&str>, color: &str) -> User {
    let id = Uuid::new_v4();
    let name = match name {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => friendly_name(Uuid::new_v4().as_u128()),
    };
    User::new(id.to_string(), name, color)
}
