use std::env;
use std::fs;

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::core::config::AppPaths;
use crate::core::errors::ApiError;

const API_KEY_HEADER: &str = "x-api-key";

/// Shared secret guarding the operational endpoints.
#[derive(Debug, Clone)]
pub struct ApiToken {
    value: String,
}

impl ApiToken {
    pub fn value(&self) -> &str {
        &self.value
    }

    #[cfg(test)]
    pub fn fixed(value: &str) -> Self {
        Self {
            value: value.to_string(),
        }
    }
}

/// Loads the token from `RECALL_API_TOKEN`, or generates one and persists
/// it next to the database so local tooling can pick it up.
pub fn init_api_token(paths: &AppPaths) -> ApiToken {
    if let Ok(token) = env::var("RECALL_API_TOKEN") {
        if !token.trim().is_empty() {
            return ApiToken { value: token };
        }
    }

    if let Ok(existing) = fs::read_to_string(&paths.token_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return ApiToken {
                value: trimmed.to_string(),
            };
        }
    }

    let token = format!("{}{}", Uuid::new_v4(), Uuid::new_v4());
    if let Err(err) = fs::write(&paths.token_path, &token) {
        tracing::warn!("Failed to persist API token: {}", err);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(&paths.token_path) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            let _ = fs::set_permissions(&paths.token_path, perms);
        }
    }

    ApiToken { value: token }
}

pub fn require_api_key(headers: &HeaderMap, expected: &ApiToken) -> Result<(), ApiError> {
    let header_value = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if header_value.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    let matches: bool = header_value
        .as_bytes()
        .ct_eq(expected.value().as_bytes())
        .into();
    if !matches {
        return Err(ApiError::Unauthorized);
    }

    Ok(())
}
