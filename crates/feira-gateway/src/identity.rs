use jsonwebtoken::{DecodingKey, Validation, decode};

use feira_types::api::Claims;

/// Verify a bearer token from the identity service and return the user id.
/// Tokens are issued elsewhere; this side only checks signature and expiry.
pub fn verify_token(token: &str, secret: &str) -> Option<String> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    let user_id = token_data.claims.sub;
    if user_id.trim().is_empty() {
        return None;
    }
    Some(user_id)
}
