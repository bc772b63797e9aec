//! Two independent auth schemes the ingester serves:
//!
//! - Lab bearer tokens: a per-lab table of `{runtime, callback}` token
//!   pairs, checked against the `Authorization` header on the callback
//!   endpoint (`POST /node/{id}`).
//! - Admin JWTs (HS256): `{email, permissions[]}` claims, checked on the
//!   `/api/jobretry`, `/api/checkout` and `/api/patchset` endpoints.

use std::collections::BTreeMap;

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or malformed authorization header")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("unknown lab: {0}")]
    UnknownLab(String),
    #[error("missing permission: {0}")]
    MissingPermission(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub email: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

pub struct JwtAuth {
    secret: String,
}

impl JwtAuth {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// Decode `token` and require `permission` to be present in its
    /// claims, matching `validate_permissions`'s "permission string
    /// appears in the list" contract.
    pub fn authorize(&self, token: &str, permission: &str) -> Result<Claims, AuthError> {
        let key = DecodingKey::from_secret(self.secret.as_bytes());
        let data = decode::<Claims>(token, &key, &Validation::default())
            .map_err(|_| AuthError::InvalidToken)?;
        if !data.claims.permissions.iter().any(|p| p == permission) {
            return Err(AuthError::MissingPermission(permission.to_string()));
        }
        Ok(data.claims)
    }
}

pub fn extract_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    header
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)
}

/// Which role a lab token was presented for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabTokenRole {
    Runtime,
    Callback,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabTokenPair {
    pub runtime_token: String,
    pub callback_token: String,
}

/// Per-lab `{runtime, callback}` token table, keyed by lab name.
#[derive(Debug, Clone, Default)]
pub struct LabTokens {
    labs: BTreeMap<String, LabTokenPair>,
}

impl LabTokens {
    pub fn new(labs: BTreeMap<String, LabTokenPair>) -> Self {
        Self { labs }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        Ok(Self { labs: serde_yaml::from_str(s)? })
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn check(&self, lab: &str, token: &str, role: LabTokenRole) -> Result<(), AuthError> {
        let pair = self.labs.get(lab).ok_or_else(|| AuthError::UnknownLab(lab.to_string()))?;
        let expected = match role {
            LabTokenRole::Runtime => &pair.runtime_token,
            LabTokenRole::Callback => &pair.callback_token,
        };
        if expected == token {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }

    /// Find which lab presented `token` for `role`, since the callback
    /// endpoint identifies the lab by its token rather than a path
    /// segment.
    pub fn lab_for_token(&self, token: &str, role: LabTokenRole) -> Option<&str> {
        self.labs.iter().find_map(|(lab, pair)| {
            let expected = match role {
                LabTokenRole::Runtime => &pair.runtime_token,
                LabTokenRole::Callback => &pair.callback_token,
            };
            (expected == token).then_some(lab.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn sign(secret: &str, claims: &Claims) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn authorize_accepts_token_with_required_permission() {
        let auth = JwtAuth::new("secret");
        let token = sign(
            "secret",
            &Claims {
                email: "bot@kernelci.org".to_string(),
                permissions: vec!["testretry".to_string()],
            },
        );
        assert!(auth.authorize(&token, "testretry").is_ok());
    }

    #[test]
    fn authorize_rejects_missing_permission() {
        let auth = JwtAuth::new("secret");
        let token = sign(
            "secret",
            &Claims {
                email: "bot@kernelci.org".to_string(),
                permissions: vec!["checkout".to_string()],
            },
        );
        assert!(matches!(
            auth.authorize(&token, "testretry"),
            Err(AuthError::MissingPermission(_))
        ));
    }

    #[test]
    fn authorize_rejects_wrong_secret() {
        let auth = JwtAuth::new("secret");
        let token = sign(
            "other-secret",
            &Claims {
                email: "bot@kernelci.org".to_string(),
                permissions: vec!["testretry".to_string()],
            },
        );
        assert!(matches!(auth.authorize(&token, "testretry"), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn lab_tokens_check_role_separately() {
        let mut labs = BTreeMap::new();
        labs.insert(
            "lab-baylibre".to_string(),
            LabTokenPair {
                runtime_token: "run-token".to_string(),
                callback_token: "cb-token".to_string(),
            },
        );
        let tokens = LabTokens::new(labs);
        assert!(tokens.check("lab-baylibre", "cb-token", LabTokenRole::Callback).is_ok());
        assert!(tokens.check("lab-baylibre", "cb-token", LabTokenRole::Runtime).is_err());
        assert!(matches!(
            tokens.check("unknown-lab", "x", LabTokenRole::Callback),
            Err(AuthError::UnknownLab(_))
        ));
    }

    #[test]
    fn lab_for_token_finds_owning_lab() {
        let mut labs = BTreeMap::new();
        labs.insert(
            "lab-baylibre".to_string(),
            LabTokenPair {
                runtime_token: "run-token".to_string(),
                callback_token: "cb-token".to_string(),
            },
        );
        let tokens = LabTokens::new(labs);
        assert_eq!(tokens.lab_for_token("cb-token", LabTokenRole::Callback), Some("lab-baylibre"));
        assert_eq!(tokens.lab_for_token("cb-token", LabTokenRole::Runtime), None);
        assert_eq!(tokens.lab_for_token("bogus", LabTokenRole::Callback), None);
    }

    #[test]
    fn extract_bearer_strips_prefix() {
        assert_eq!(extract_bearer(Some("Bearer abc123")).unwrap(), "abc123");
        assert!(extract_bearer(Some("abc123")).is_err());
        assert!(extract_bearer(None).is_err());
    }
}
