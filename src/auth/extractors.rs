use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::error::AppError;

/// Identity of a caller that presented a valid access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

/// Like [`AuthUser`], but `None` when the request carries no `Authorization` header.
/// A header that is present must still be valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaybeAuthUser(pub Option<Uuid>);

/// Validates `Authorization: Bearer <token>`. Every failure is the same 401.
pub fn authenticate(headers: &HeaderMap, keys: &JwtKeys) -> Result<AuthUser, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            debug!("missing Authorization header");
            AppError::Authorization
        })?;

    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or_else(|| {
            debug!("invalid auth scheme");
            AppError::Authorization
        })?;

    let claims = keys.verify_access(token.trim()).map_err(|e| {
        warn!(error = %e, "invalid or expired token");
        AppError::Authorization
    })?;

    Ok(AuthUser(claims.sub))
}

/// Gate for a router: requests without a valid token never reach the handler.
pub async fn require_auth(
    State(keys): State<JwtKeys>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(req.headers(), &keys)?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(*user);
        }
        authenticate(&parts.headers, &JwtKeys::from_ref(state))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(AuthUser(id)) = parts.extensions.get::<AuthUser>() {
            return Ok(MaybeAuthUser(Some(*id)));
        }
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(MaybeAuthUser(None));
        }
        let AuthUser(id) = authenticate(&parts.headers, &JwtKeys::from_ref(state))?;
        Ok(MaybeAuthUser(Some(id)))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::config::AppConfig;

    fn keys() -> JwtKeys {
        JwtKeys::new(&AppConfig::for_tests().jwt)
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn accepts_fresh_access_token() {
        let keys = keys();
        let user_id = Uuid::new_v4();
        let token = keys.sign_access(user_id).unwrap();
        let user = authenticate(&headers_with(&format!("Bearer {token}")), &keys).unwrap();
        assert_eq!(user, AuthUser(user_id));
    }

    #[test]
    fn rejects_missing_header_and_wrong_scheme() {
        let keys = keys();
        assert!(matches!(
            authenticate(&HeaderMap::new(), &keys),
            Err(AppError::Authorization)
        ));
        let token = keys.sign_access(Uuid::new_v4()).unwrap();
        assert!(matches!(
            authenticate(&headers_with(&format!("Basic {token}")), &keys),
            Err(AppError::Authorization)
        ));
    }

    #[test]
    fn rejects_refresh_token_and_garbage() {
        let keys = keys();
        let refresh = keys.sign_refresh(Uuid::new_v4()).unwrap();
        assert!(matches!(
            authenticate(&headers_with(&format!("Bearer {refresh}")), &keys),
            Err(AppError::Authorization)
        ));
        assert!(matches!(
            authenticate(&headers_with("Bearer not.a.jwt"), &keys),
            Err(AppError::Authorization)
        ));
    }
}
