//! Google OAuth2 refresh-token exchange shared by Gemini and Vertex AI.

use serde::Deserialize;
use tracing::{debug, instrument};
use usagebar_fetch::{HttpClient, HttpError};

/// Google OAuth2 token endpoint.
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchanges a refresh token for a fresh access token.
#[instrument(skip_all)]
pub async fn refresh_access_token(
    http: &HttpClient,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<String, HttpError> {
    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("refresh_token", refresh_token),
    ];
    let response: TokenResponse = http.post_form(TOKEN_ENDPOINT, &form).await?;
    debug!(expires_in = ?response.expires_in, "Refreshed Google access token");
    Ok(response.access_token)
}
