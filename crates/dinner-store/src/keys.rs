//! Key encoding for the `RocksDB` column families.

use dinner_core::{RecipeId, UserId};

/// Key of a user's subscription or profile.
#[must_use]
pub fn user_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Key of a billing reference index entry.
#[must_use]
pub fn reference_key(reference: &str) -> Vec<u8> {
    reference.as_bytes().to_vec()
}

/// Key of a saved recipe.
///
/// Format: `user_id (16 bytes) || recipe_id (16 bytes)`. Recipe IDs are
/// ULIDs, so a prefix scan yields a user's recipes oldest first.
#[must_use]
pub fn recipe_key(user_id: &UserId, recipe_id: &RecipeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&recipe_id.to_bytes());
    key
}

/// Prefix for iterating a user's recipes.
#[must_use]
pub fn recipes_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Decode a `user_id` stored as an index value.
#[must_use]
pub fn decode_user_id(bytes: &[u8]) -> Option<UserId> {
    let bytes: [u8; 16] = bytes.try_into().ok()?;
    Some(UserId::from_uuid(uuid::Uuid::from_bytes(bytes)))
}
