use anyhow::Result;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims issued by the external identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub user_id: i32,
    pub tenant_id: i32,
    pub role: String,
    pub exp: i64,
}

pub fn verify_token(token: &str, secret: &[u8]) -> Result<Claims> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| anyhow::anyhow!("Invalid token: {}", e))
}

#[cfg(test)]
pub fn issue_test_token(user_id: i32, tenant_id: i32, role: &str, secret: &[u8]) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: format!("user-{}", user_id),
        user_id,
        tenant_id,
        role: role.to_owned(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .expect("encode test token")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let token = issue_test_token(7, 3, "editor", b"secret");
        let claims = verify_token(&token, b"secret").unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.tenant_id, 3);
        assert_eq!(claims.role, "editor");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue_test_token(7, 3, "editor", b"secret");
        assert!(verify_token(&token, b"other").is_err());
    }
}
