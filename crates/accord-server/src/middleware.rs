use crate::api::{with_conn, ApiError};
use crate::AppState;
use accord_federation::auth::{API_KEY_HEADER, PLATFORM_ID_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use accord_federation::{
    authenticate_bearer, authenticate_signed, log_api_request, ApiRequestLog, AuthError,
    SignedRequest,
};
use accord_types::{ActorContext, Role};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Tenant the session layer authenticated the user into.
pub const TENANT_HEADER: &str = "x-accord-tenant";
/// Acting user id.
pub const USER_HEADER: &str = "x-accord-user";
/// Comma-separated role names.
pub const ROLES_HEADER: &str = "x-accord-roles";

/// Largest body buffered for signature verification.
const MAX_SIGNED_BODY_BYTES: usize = 1024 * 1024;

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Builds the acting user from the trusted session headers.
///
/// Tenant and user are required. Roles may be absent, in which case the
/// actor can only read; an unknown role name rejects the request.
pub fn actor_from_headers(headers: &HeaderMap, ip: Option<IpAddr>) -> Result<ActorContext, ApiError> {
    let unauthorized = |msg: &str| ApiError::Unauthorized(msg.to_string());

    let tenant_id = header_str(headers, TENANT_HEADER)
        .ok_or_else(|| unauthorized("missing tenant header"))?
        .parse()
        .map_err(|_| unauthorized("invalid tenant header"))?;
    let user_id = header_str(headers, USER_HEADER)
        .ok_or_else(|| unauthorized("missing user header"))?
        .parse()
        .map_err(|_| unauthorized("invalid user header"))?;
    let roles = header_str(headers, ROLES_HEADER)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::parse::<Role>)
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?
        .unwrap_or_default();

    let user_agent = header_str(headers, header::USER_AGENT).map(str::to_string);
    Ok(ActorContext::new(tenant_id, user_id, roles)
        .with_request(ip.map(|ip| ip.to_string()), user_agent))
}

/// Middleware for the tenant administration API. Inserts the
/// [`ActorContext`] into request extensions.
pub async fn actor_middleware(mut req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let actor = actor_from_headers(req.headers(), peer_ip(&req))?;
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

/// Credentials presented on a federation API request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Presented {
    Bearer(String),
    Signed {
        platform_id: String,
        timestamp: String,
        signature: String,
    },
}

/// Signed headers win over a bearer key when both are sent.
fn presented_credentials(headers: &HeaderMap) -> Option<Presented> {
    if let Some(platform_id) = header_str(headers, PLATFORM_ID_HEADER) {
        return Some(Presented::Signed {
            platform_id: platform_id.to_string(),
            timestamp: header_str(headers, TIMESTAMP_HEADER).unwrap_or_default().to_string(),
            signature: header_str(headers, SIGNATURE_HEADER).unwrap_or_default().to_string(),
        });
    }
    header_str(headers, header::AUTHORIZATION)
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| header_str(headers, API_KEY_HEADER))
        .map(|raw| Presented::Bearer(raw.trim().to_string()))
}

/// Middleware for the federation API served to partner installations.
///
/// Authenticates the API key or HMAC signature, logs the request against the
/// key and enforces the key's hourly rate limit. The
/// [`accord_federation::AuthenticatedKey`] is inserted into request
/// extensions.
pub async fn federation_auth_middleware(
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    // 1. Get AppState
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .cloned()
        .ok_or_else(|| ApiError::InternalServerError("application state missing".to_string()))?;

    // 2. Identify credentials
    let presented = presented_credentials(req.headers())
        .ok_or_else(|| ApiError::Unauthorized(AuthError::MissingCredentials.to_string()))?;

    // 3. Buffer the body; the signature covers it
    let ip = peer_ip(&req).map(|ip| ip.to_string());
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_SIGNED_BODY_BYTES)
        .await
        .map_err(|_| ApiError::BadRequest("request body too large".to_string()))?;
    let method = parts.method.as_str().to_string();
    let path = parts.uri.path().to_string();
    let user_agent = header_str(&parts.headers, header::USER_AGENT).map(str::to_string);
    let window_secs = state.federation.signature_window_secs;

    // 4. Verify and log (blocking DB work)
    let signed_body = body.clone();
    let key = with_conn(&state, move |conn| {
        let now = Utc::now();
        let outcome = match &presented {
            Presented::Bearer(raw) => authenticate_bearer(conn, raw, now),
            Presented::Signed {
                platform_id,
                timestamp,
                signature,
            } => authenticate_signed(
                conn,
                &SignedRequest {
                    platform_id,
                    timestamp,
                    signature,
                    method: &method,
                    path: &path,
                    body: &signed_body,
                },
                now,
                window_secs,
            ),
        };
        let key = match outcome {
            Ok(key) => key,
            Err(AuthError::Database(e)) => {
                return Err(ApiError::InternalServerError(format!("authentication failed: {e}")))
            }
            Err(e) => {
                tracing::info!(code = e.code(), %path, "federation authentication rejected");
                return Err(ApiError::Unauthorized(e.to_string()));
            }
        };

        if let Err(e) = log_api_request(
            conn,
            &ApiRequestLog {
                api_key_id: key.key_id,
                endpoint: &path,
                method: &method,
                ip_address: ip.as_deref(),
                user_agent: user_agent.as_deref(),
                auth_method: key.auth_method,
                signature_valid: matches!(presented, Presented::Signed { .. }),
            },
        ) {
            tracing::warn!(api_key_id = key.key_id, error = %e, "failed to log federation api request");
        }
        Ok(key)
    })
    .await?;

    // 5. Enforce the hourly limit
    let limit = HeaderValue::from(key.rate_limit);
    let remaining = HeaderValue::from(key.remaining());
    if key.rate_limited() {
        tracing::warn!(api_key_id = key.key_id, tenant_id = key.tenant_id, "federation api key over its hourly limit");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "success": false, "error": "rate limit exceeded" })),
        )
            .into_response();
        let headers = response.headers_mut();
        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("3600"));
        headers.insert("x-ratelimit-limit", limit);
        headers.insert("x-ratelimit-remaining", remaining);
        return Ok(response);
    }

    // 6. Hand the request on with the key attached
    let mut req = Request::from_parts(parts, Body::from(body));
    req.extensions_mut().insert(key);
    let mut response = next.run(req).await;
    response.headers_mut().insert("x-ratelimit-limit", limit);
    response.headers_mut().insert("x-ratelimit-remaining", remaining);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn actor_is_built_from_session_headers() {
        let map = headers(&[
            (TENANT_HEADER, "5"),
            (USER_HEADER, "42"),
            (ROLES_HEADER, "member, admin"),
            ("user-agent", "dashboard/2.1"),
        ]);
        let actor = actor_from_headers(&map, Some("203.0.113.9".parse().unwrap())).unwrap();
        assert_eq!((actor.tenant_id, actor.user_id), (5, 42));
        assert_eq!(actor.roles, vec![Role::Member, Role::Admin]);
        assert!(actor.is_tenant_admin());
        assert_eq!(actor.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(actor.user_agent.as_deref(), Some("dashboard/2.1"));
    }

    #[test]
    fn missing_or_invalid_actor_headers_are_unauthorized() {
        for map in [
            headers(&[(USER_HEADER, "42")]),
            headers(&[(TENANT_HEADER, "five"), (USER_HEADER, "42")]),
            headers(&[(TENANT_HEADER, "5"), (USER_HEADER, "42"), (ROLES_HEADER, "admin,owner")]),
        ] {
            assert!(matches!(
                actor_from_headers(&map, None),
                Err(ApiError::Unauthorized(_))
            ));
        }

        let no_roles = actor_from_headers(&headers(&[(TENANT_HEADER, "5"), (USER_HEADER, "42")]), None)
            .unwrap();
        assert!(!no_roles.is_tenant_admin());
    }

    #[test]
    fn credentials_are_read_from_either_scheme() {
        assert_eq!(
            presented_credentials(&headers(&[("authorization", "Bearer fed_abc")])),
            Some(Presented::Bearer("fed_abc".into()))
        );
        assert_eq!(
            presented_credentials(&headers(&[(API_KEY_HEADER, "fed_xyz")])),
            Some(Presented::Bearer("fed_xyz".into()))
        );
        assert_eq!(
            presented_credentials(&headers(&[
                ("authorization", "Bearer fed_abc"),
                (PLATFORM_ID_HEADER, "hilltop"),
                (TIMESTAMP_HEADER, "1700000000"),
                (SIGNATURE_HEADER, "deadbeef"),
            ])),
            Some(Presented::Signed {
                platform_id: "hilltop".into(),
                timestamp: "1700000000".into(),
                signature: "deadbeef".into(),
            })
        );
        assert_eq!(presented_credentials(&headers(&[("authorization", "Basic abc")])), None);
    }
}
