//! Slack `oauth.v2.access` response handling.
//!
//! Slack answers HTTP 200 for both success and failure; the `ok` flag and
//! `error` code carry the outcome. With token rotation enabled the response
//! also includes `refresh_token` and `expires_in`. An install that only
//! requested user scopes carries its token under `authed_user` instead.

use serde::Deserialize;

#[derive(Deserialize, Debug, Default)]
pub(crate) struct TeamRef {
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct AuthedUser {
    pub id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct SlackTokenResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub team: Option<TeamRef>,
    #[serde(default)]
    pub authed_user: Option<AuthedUser>,
}

/// Tokens and identity returned by a successful exchange or refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires; `None` for non-expiring tokens
    pub expires_in: Option<i64>,
    pub team_id: Option<String>,
    pub team_name: Option<String>,
    pub platform_user_id: Option<String>,
    pub scopes: Vec<String>,
}

impl SlackTokenResponse {
    /// Convert to a grant, or return Slack's error code.
    pub fn into_grant(self) -> Result<TokenGrant, String> {
        if !self.ok {
            return Err(self.error.unwrap_or_else(|| "unknown_error".to_string()));
        }
        let team = self.team.unwrap_or_default();
        let user = self.authed_user.unwrap_or_default();

        // Bot token first, then the user token
        let (access_token, refresh_token, expires_in, scope) =
            match self.access_token.filter(|t| !t.is_empty()) {
                Some(token) => (token, self.refresh_token, self.expires_in, self.scope),
                None => {
                    let token = user
                        .access_token
                        .filter(|t| !t.is_empty())
                        .ok_or_else(|| "missing_access_token".to_string())?;
                    (token, user.refresh_token, user.expires_in, user.scope)
                }
            };

        Ok(TokenGrant {
            access_token,
            refresh_token,
            expires_in,
            team_id: team.id,
            team_name: team.name,
            platform_user_id: user.id,
            scopes: scope
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        })
    }
}
