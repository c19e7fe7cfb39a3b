//! OAuth2 implicit-grant helpers for obtaining the bearer token.
//!
//! The remote hands the token back in the redirect URL fragment
//! (`#access_token=...`), so there is no code exchange and no refresh.

use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, CsrfToken, RedirectUrl, Scope};
use serde::{Deserialize, Serialize};

use cmsbridge_common::{BearerToken, Error, Result};

/// OAuth2 authorization endpoint.
const AUTHORIZE_URL: &str = "https://be.contentful.com/oauth/authorize";
/// Scope granting read/write access to the management API.
const MANAGE_SCOPE: &str = "content_management_manage";

/// Configuration of the OAuth application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Client ID of the OAuth application.
    pub client_id: String,
    /// Redirect URL registered for the application.
    pub redirect_url: String,
}

/// Build the URL the user must visit to authorize the application.
///
/// Returns the URL and a CSRF state token that should be checked on callback.
///
/// # Errors
/// - `Validation` if no client id is given
/// - `InvalidInput` if the redirect URL does not parse
pub fn authorization_url(config: &AuthConfig) -> Result<(String, String)> {
    if config.client_id.trim().is_empty() {
        return Err(Error::Validation(
            "You need to specify your app's client id".to_string(),
        ));
    }

    let client = BasicClient::new(ClientId::new(config.client_id.clone()))
        .set_auth_uri(
            AuthUrl::new(AUTHORIZE_URL.to_string())
                .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?,
        )
        .set_redirect_uri(
            RedirectUrl::new(config.redirect_url.clone())
                .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?,
        );

    let (auth_url, csrf_token) = client
        .authorize_url(CsrfToken::new_random)
        .use_implicit_flow()
        .add_scope(Scope::new(MANAGE_SCOPE.to_string()))
        .url();

    Ok((auth_url.to_string(), csrf_token.secret().clone()))
}

/// Extract the bearer token from an authorization callback.
///
/// Accepts the full redirect URL, the fragment with its leading `#`, or the
/// bare fragment.
///
/// # Errors
/// - `Auth` if the callback carries no usable token
pub fn token_from_callback(callback: &str) -> Result<BearerToken> {
    let fragment = match callback.split_once('#') {
        Some((_, fragment)) => fragment,
        None => callback,
    };

    let token = url::form_urlencoded::parse(fragment.as_bytes())
        .find(|(key, _)| key == "access_token")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| {
            Error::Auth("An error occurred while connecting to the remote application".to_string())
        })?;

    BearerToken::new(token)
}
