//! Upgrade request authorization

use crate::config::ServerConfig;
use crate::error::UpgradeAuthError;

use super::request::{status_only, RequestHead};

/// Allow-list entry that admits any origin
pub const ANY_ORIGIN: &str = "*";

/// Check origin and shared secret for an application upgrade
///
/// The origin is checked first, so a disallowed origin is reported as such even
/// when the token is also wrong.
pub fn authorize(head: &RequestHead, server: &ServerConfig) -> Result<(), UpgradeAuthError> {
    let origin_allowed = head.header("origin").is_some_and(|origin| {
        server
            .allowed_origins
            .iter()
            .any(|allowed| allowed == ANY_ORIGIN || allowed == origin)
    });
    if !origin_allowed {
        return Err(UpgradeAuthError::OriginNotAllowed);
    }

    if let Some(secret) = server.secret() {
        let supplied = head.query_param(&server.token_query_param);
        if supplied.as_deref().map(str::trim) != Some(secret) {
            return Err(UpgradeAuthError::InvalidToken);
        }
    }
    Ok(())
}

/// Raw response written for a rejected upgrade
pub fn rejection_response(err: UpgradeAuthError) -> String {
    status_only(err.status_code(), err.reason())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(target: &str, origin: Option<&str>) -> RequestHead {
        let mut headers = vec![
            ("Connection".to_string(), b"Upgrade".to_vec()),
            ("Upgrade".to_string(), b"websocket".to_vec()),
        ];
        if let Some(o) = origin {
            headers.push(("Origin".to_string(), o.as_bytes().to_vec()));
        }
        RequestHead {
            method: "GET".to_string(),
            target: target.to_string(),
            version: 1,
            headers,
        }
    }

    fn server(secret: Option<&str>) -> ServerConfig {
        ServerConfig {
            auth_token: secret.map(str::to_string),
            ..ServerConfig::default()
        }
    }

    const ORIGIN: &str = "http://localhost:3000";

    #[test]
    fn test_no_secret_only_checks_origin() {
        assert_eq!(authorize(&head("/ws", Some(ORIGIN)), &server(None)), Ok(()));
        assert_eq!(
            authorize(&head("/ws", Some("http://evil.test")), &server(None)),
            Err(UpgradeAuthError::OriginNotAllowed)
        );
        assert_eq!(
            authorize(&head("/ws", None), &server(None)),
            Err(UpgradeAuthError::OriginNotAllowed)
        );
    }

    #[test]
    fn test_token_must_match_after_trim() {
        let cfg = server(Some(" s3cret "));
        assert_eq!(authorize(&head("/ws?token=s3cret", Some(ORIGIN)), &cfg), Ok(()));
        assert_eq!(authorize(&head("/ws?token=%20s3cret%20", Some(ORIGIN)), &cfg), Ok(()));
        assert_eq!(
            authorize(&head("/ws?token=wrong", Some(ORIGIN)), &cfg),
            Err(UpgradeAuthError::InvalidToken)
        );
        assert_eq!(
            authorize(&head("/ws", Some(ORIGIN)), &cfg),
            Err(UpgradeAuthError::InvalidToken)
        );
        assert_eq!(
            authorize(&head("/ws?token=S3CRET", Some(ORIGIN)), &cfg),
            Err(UpgradeAuthError::InvalidToken)
        );
    }

    #[test]
    fn test_origin_checked_before_token() {
        let cfg = server(Some("s3cret"));
        assert_eq!(
            authorize(&head("/ws?token=wrong", Some("http://evil.test")), &cfg),
            Err(UpgradeAuthError::OriginNotAllowed)
        );
    }

    #[test]
    fn test_wildcard_origin() {
        let cfg = ServerConfig {
            allowed_origins: vec![ANY_ORIGIN.to_string()],
            ..ServerConfig::default()
        };
        assert_eq!(authorize(&head("/ws", Some("http://anything")), &cfg), Ok(()));
    }

    #[test]
    fn test_rejection_responses() {
        assert_eq!(
            rejection_response(UpgradeAuthError::InvalidToken),
            "HTTP/1.1 401 Unauthorized\r\nConnection: close\r\n\r\n"
        );
        assert_eq!(
            rejection_response(UpgradeAuthError::OriginNotAllowed),
            "HTTP/1.1 403 Forbidden\r\nConnection: close\r\n\r\n"
        );
    }
}
