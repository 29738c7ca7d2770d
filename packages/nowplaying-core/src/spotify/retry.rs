//! Bounded token-refresh retry for Web API requests.
//!
//! A request that comes back `401 Unauthorized` gets exactly one token
//! refresh and exactly one retry. If the refresh yields no token the
//! original 401 response is returned unchanged, so a broken credential can
//! never turn into a refresh loop.

use std::future::Future;

use reqwest::StatusCode;

/// Responses that can report an authorization failure.
pub(crate) trait Unauthorized {
    fn is_unauthorized(&self) -> bool;
}

impl Unauthorized for reqwest::Response {
    fn is_unauthorized(&self) -> bool {
        self.status() == StatusCode::UNAUTHORIZED
    }
}

/// Sends a request with `token`, refreshing and retrying once on 401.
///
/// # Arguments
/// * `action` - Action name for logging
/// * `token` - Current bearer token
/// * `send` - Closure that performs the request with the given token
/// * `refresh` - Closure that mints a new token; `None` on failure
pub(crate) async fn with_auth_retry<R, E, S, SFut, F, FFut>(
    action: &str,
    token: String,
    mut send: S,
    refresh: F,
) -> Result<R, E>
where
    R: Unauthorized,
    S: FnMut(String) -> SFut,
    SFut: Future<Output = Result<R, E>>,
    F: FnOnce() -> FFut,
    FFut: Future<Output = Option<String>>,
{
    let response = send(token).await?;
    if !response.is_unauthorized() {
        return Ok(response);
    }

    log::info!("[Spotify] {} returned 401, refreshing token", action);
    let Some(fresh) = refresh().await else {
        log::warn!(
            "[Spotify] Token refresh failed, returning original 401 for {}",
            action
        );
        return Ok(response);
    };

    // Single retry; whatever comes back is final
    send(fresh).await
}
