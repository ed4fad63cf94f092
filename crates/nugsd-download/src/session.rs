//! Authentication and session establishment.
//!
//! A `Session` bundles everything one job needs to talk to the upstream
//! catalog: the bearer token, the user ID, the derived stream parameters,
//! and the legacy credentials some older endpoints still require. It is
//! built once per job and injected into the handlers - no globals.

use base64::Engine;
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{info, warn};

use nugsd_core::{AppConfig, DownloadError};

/// OAuth client ID of the mobile app.
const CLIENT_ID: &str = "Eg7HuH873H65r5rt325UytR5429";

/// Scopes requested with the password grant.
const GRANT_SCOPE: &str = "openid profile email nugsnet:api nugsnet:legacyapi offline_access";

/// Subscription timestamp layout, literally `MM/DD/YYYY HH:MM:SS`.
const STAMP_LAYOUT: &str = "%m/%d/%Y %H:%M:%S";

const AUTH_URL: &str = "https://id.nugs.net/connect/token";
const USER_INFO_URL: &str = "https://id.nugs.net/connect/userinfo";
const SUB_INFO_URL: &str = "https://subscriptions.nugs.net/api/v1/me/subscriptions";

/// User agent presented to the identity and subscription endpoints.
pub const USER_AGENT: &str =
    "NugsNet/3.26.724 (Android; 7.1.2; Asus; ASUS_Z01QD; Scale/2.0; en)";

/// Subscription identifiers sent with every stream-meta request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamParams {
    pub subscription_id: String,
    pub plan_id: String,
    pub user_id: String,
    /// Subscription start as unix seconds, stringified for the query.
    pub start_stamp: String,
    /// Subscription end as unix seconds, stringified for the query.
    pub end_stamp: String,
}

/// An established upstream session.
#[derive(Clone, Debug)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub stream_params: StreamParams,
    /// Legacy API token from the JWT payload; required for user playlists.
    pub legacy_token: String,
    /// Legacy uguid from the JWT payload; required for purchased items.
    pub legacy_uguid: String,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    /// The subject claim is the user ID the stream endpoints expect.
    sub: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Plan {
    plan_id: String,
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Promo {
    plan: Plan,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SubInfo {
    legacy_subscription_id: String,
    started_at: String,
    ends_at: String,
    plan: Plan,
    promo: Promo,
}

/// The JWT payload fields carrying the legacy credentials.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenPayload {
    legacy_token: String,
    legacy_uguid: String,
}

impl Session {
    /// Establish a session: obtain a token, derive the user ID and stream
    /// parameters, and extract the legacy credentials.
    pub async fn establish(
        client: &reqwest::Client,
        config: &AppConfig,
    ) -> Result<Self, DownloadError> {
        let token = if !config.token.is_empty() {
            info!("Using auth token from config");
            config.token.clone()
        } else if !config.email.is_empty() && !config.password.is_empty() {
            let token = authenticate(client, &config.email, &config.password).await?;
            info!("Authenticated with email/password");
            token
        } else {
            return Err(DownloadError::auth(
                "provide email/password or token in config",
            ));
        };

        let user_id = fetch_user_id(client, &token).await?;
        let sub_info = fetch_sub_info(client, &token).await?;

        let (plan_desc, _) = active_plan(&sub_info);
        info!(plan = plan_desc, "User subscription plan determined");

        let stream_params = parse_stream_params(&user_id, &sub_info)?;

        // Best effort: only some asset kinds need the legacy credentials.
        let (legacy_token, legacy_uguid) = match extract_legacy_tokens(&token) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "Could not extract legacy tokens from auth token");
                (String::new(), String::new())
            }
        };

        Ok(Self {
            token,
            user_id,
            stream_params,
            legacy_token,
            legacy_uguid,
        })
    }
}

/// Perform the password grant against the identity endpoint.
async fn authenticate(
    client: &reqwest::Client,
    email: &str,
    password: &str,
) -> Result<String, DownloadError> {
    let form = [
        ("client_id", CLIENT_ID),
        ("grant_type", "password"),
        ("scope", GRANT_SCOPE),
        ("username", email),
        ("password", password),
    ];
    let resp = client
        .post(AUTH_URL)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .form(&form)
        .send()
        .await
        .map_err(|err| DownloadError::auth(err.to_string()))?;

    if !resp.status().is_success() {
        return Err(DownloadError::auth(format!(
            "identity endpoint rejected credentials: HTTP {}",
            resp.status().as_u16()
        )));
    }
    let auth: AuthResponse = resp
        .json()
        .await
        .map_err(|err| DownloadError::upstream_decode("auth response", err.to_string()))?;
    Ok(auth.access_token)
}

async fn fetch_user_id(client: &reqwest::Client, token: &str) -> Result<String, DownloadError> {
    let resp = client
        .get(USER_INFO_URL)
        .bearer_auth(token)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(|err| DownloadError::auth(err.to_string()))?;
    if !resp.status().is_success() {
        return Err(DownloadError::upstream_status(
            "get user info",
            resp.status().as_u16(),
        ));
    }
    let info: UserInfo = resp
        .json()
        .await
        .map_err(|err| DownloadError::upstream_decode("user info response", err.to_string()))?;
    Ok(info.sub)
}

async fn fetch_sub_info(client: &reqwest::Client, token: &str) -> Result<SubInfo, DownloadError> {
    let resp = client
        .get(SUB_INFO_URL)
        .bearer_auth(token)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(|err| DownloadError::auth(err.to_string()))?;
    if !resp.status().is_success() {
        return Err(DownloadError::upstream_status(
            "get subscription info",
            resp.status().as_u16(),
        ));
    }
    resp.json()
        .await
        .map_err(|err| DownloadError::upstream_decode("subscription response", err.to_string()))
}

/// Active plan description and whether it comes from a promo.
fn active_plan(sub: &SubInfo) -> (&str, bool) {
    if !sub.plan.plan_id.is_empty() {
        (&sub.plan.description, false)
    } else if !sub.promo.plan.plan_id.is_empty() {
        (&sub.promo.plan.description, true)
    } else {
        ("Unknown Plan", false)
    }
}

/// Convert the subscription start/end strings to unix-second strings.
///
/// Unparseable stamps degrade to "0" rather than failing the job; the
/// upstream treats them as unset.
fn parse_timestamps(start: &str, end: &str) -> (String, String) {
    let parse = |s: &str| {
        NaiveDateTime::parse_from_str(s, STAMP_LAYOUT)
            .map(|dt| dt.and_utc().timestamp().to_string())
    };
    match (parse(start), parse(end)) {
        (Ok(s), Ok(e)) => (s, e),
        (rs, re) => {
            warn!(start, end, start_err = rs.is_err(), end_err = re.is_err(),
                "Could not parse subscription timestamps");
            ("0".to_string(), "0".to_string())
        }
    }
}

/// Derive the stream parameters from the user ID and subscription info.
///
/// The promo plan ID wins when a promo plan is present; missing both plan
/// IDs is an error because stream-meta calls cannot succeed without one.
fn parse_stream_params(user_id: &str, sub: &SubInfo) -> Result<StreamParams, DownloadError> {
    if user_id.is_empty() {
        return Err(DownloadError::auth("missing user ID for stream parameters"));
    }

    let (_, is_promo) = active_plan(sub);
    let plan_id = if is_promo && !sub.promo.plan.plan_id.is_empty() {
        sub.promo.plan.plan_id.clone()
    } else if !sub.plan.plan_id.is_empty() {
        sub.plan.plan_id.clone()
    } else {
        return Err(DownloadError::auth(
            "could not determine active plan ID from subscription info",
        ));
    };

    let (start_stamp, end_stamp) = parse_timestamps(&sub.started_at, &sub.ends_at);

    Ok(StreamParams {
        subscription_id: sub.legacy_subscription_id.clone(),
        plan_id,
        user_id: user_id.to_string(),
        start_stamp,
        end_stamp,
    })
}

/// Decode the bearer token as a compact JWS and pull the legacy credentials
/// out of its payload.
fn extract_legacy_tokens(token: &str) -> Result<(String, String), DownloadError> {
    let mut parts = token.splitn(3, '.');
    let (_header, payload) = match (parts.next(), parts.next()) {
        (Some(h), Some(p)) => (h, p),
        _ => return Err(DownloadError::auth("invalid JWT token format")),
    };
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|err| DownloadError::auth(format!("failed to decode token payload: {err}")))?;
    let payload: TokenPayload = serde_json::from_slice(&decoded)
        .map_err(|err| DownloadError::auth(format!("failed to parse token payload: {err}")))?;
    Ok((payload.legacy_token, payload.legacy_uguid))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub_info(plan_id: &str, promo_plan_id: &str) -> SubInfo {
        SubInfo {
            legacy_subscription_id: "sub-123".into(),
            started_at: "01/15/2024 00:00:00".into(),
            ends_at: "01/15/2025 00:00:00".into(),
            plan: Plan {
                plan_id: plan_id.into(),
                description: "Regular".into(),
            },
            promo: Promo {
                plan: Plan {
                    plan_id: promo_plan_id.into(),
                    description: "Promo".into(),
                },
            },
        }
    }

    #[test]
    fn regular_plan_id_used_when_present() {
        let params = parse_stream_params("user-1", &sub_info("plan-a", "")).unwrap();
        assert_eq!(params.plan_id, "plan-a");
        assert_eq!(params.subscription_id, "sub-123");
        assert_eq!(params.user_id, "user-1");
    }

    #[test]
    fn promo_plan_id_wins_when_regular_absent() {
        let params = parse_stream_params("user-1", &sub_info("", "plan-promo")).unwrap();
        assert_eq!(params.plan_id, "plan-promo");
    }

    #[test]
    fn missing_both_plan_ids_is_an_error() {
        let err = parse_stream_params("user-1", &sub_info("", "")).unwrap_err();
        assert!(err.to_string().contains("active plan ID"));
    }

    #[test]
    fn timestamps_parse_from_mdy_layout() {
        let (start, end) = parse_timestamps("01/15/2024 00:00:00", "01/15/2025 12:30:45");
        assert_eq!(start, "1705276800");
        assert_eq!(end, "1736944245");
    }

    #[test]
    fn unparseable_timestamps_degrade_to_zero() {
        let (start, end) = parse_timestamps("2024-01-15", "whenever");
        assert_eq!(start, "0");
        assert_eq!(end, "0");
    }

    #[test]
    fn legacy_tokens_extracted_from_jwt_payload() {
        let payload = serde_json::json!({
            "sub": "user-1",
            "legacy_token": "lt-abc",
            "legacy_uguid": "ug-def",
        });
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&payload).unwrap());
        let token = format!("eyJhbGciOiJSUzI1NiJ9.{encoded}.sig");

        let (legacy_token, legacy_uguid) = extract_legacy_tokens(&token).unwrap();
        assert_eq!(legacy_token, "lt-abc");
        assert_eq!(legacy_uguid, "ug-def");
    }

    #[test]
    fn malformed_jwt_is_rejected() {
        assert!(extract_legacy_tokens("no-dots-here").is_err());
        assert!(extract_legacy_tokens("a.!!!notbase64!!!.c").is_err());
    }
}
