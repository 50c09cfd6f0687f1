use crate::application_port::BackendError;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;
use url::Url;

const CLIENT_INFO: &str = concat!("kalimba/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlow {
    /// Tokens come back in the redirect fragment.
    Implicit,
    /// An authorization code comes back and is exchanged with a verifier.
    Pkce,
}

impl std::str::FromStr for AuthFlow {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "implicit" => Ok(AuthFlow::Implicit),
            "pkce" => Ok(AuthFlow::Pkce),
            other => Err(BackendError::validation(format!("unknown auth flow: {}", other))),
        }
    }
}

/// Project URL and keys.
#[derive(Clone)]
pub struct SupabaseConfig {
    url: Url,
    anon_key: String,
    service_role_key: Option<String>,
    pub flow: AuthFlow,
}

impl SupabaseConfig {
    pub fn new(url: &str, anon_key: impl Into<String>) -> Result<Self, BackendError> {
        let anon_key = anon_key.into();
        if url.is_empty() || anon_key.is_empty() {
            return Err(BackendError::validation("missing backend url or anonymous key"));
        }
        // a trailing slash keeps `join` from dropping the last path segment
        let normalized = format!("{}/", url.trim_end_matches('/'));
        let url = Url::parse(&normalized)
            .map_err(|e| BackendError::validation("invalid backend url").with_cause(e))?;
        Ok(SupabaseConfig {
            url,
            anon_key,
            service_role_key: None,
            flow: AuthFlow::Implicit,
        })
    }

    pub fn with_service_role_key(mut self, key: Option<String>) -> Self {
        self.service_role_key = key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_flow(mut self, flow: AuthFlow) -> Self {
        self.flow = flow;
        self
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.url
            .join(path)
            .map_err(|e| BackendError::validation(format!("invalid endpoint {}", path)).with_cause(e))
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    /// Key used for table access: the service role key when configured.
    pub fn table_key(&self) -> &str {
        self.service_role_key.as_deref().unwrap_or(&self.anon_key)
    }

    /// Adds the api key, the bearer token and the client tag.
    pub fn authorize(&self, request: RequestBuilder, api_key: &str, bearer: &str) -> RequestBuilder {
        request
            .header("apikey", api_key)
            .bearer_auth(bearer)
            .header("X-Client-Info", CLIENT_INFO)
    }
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url.as_str())
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::validation("unexpected response from backend").with_cause(e)
        } else {
            BackendError::network("request to backend failed").with_cause(e)
        }
    }
}

/// Error bodies from GoTrue and PostgREST use different field names.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
    }
}

/// Turns a non-2xx response into a [`BackendError`].
pub async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| format!("backend responded with {}", status));
    warn!(status = status.as_u16(), "backend error: {}", message);
    Err(BackendError::from_status(status.as_u16(), message))
}

pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, BackendError> {
    let response = check(request.send().await?).await?;
    Ok(response.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_project_path() {
        let config = SupabaseConfig::new("https://demo.supabase.co/", "anon").unwrap();
        assert_eq!(
            config.endpoint("auth/v1/token").unwrap().as_str(),
            "https://demo.supabase.co/auth/v1/token"
        );

        let proxied = SupabaseConfig::new("https://proxy.local/supabase", "anon").unwrap();
        assert_eq!(
            proxied.endpoint("rest/v1/users").unwrap().as_str(),
            "https://proxy.local/supabase/rest/v1/users"
        );
    }

    #[test]
    fn missing_values_are_rejected() {
        assert!(SupabaseConfig::new("", "anon").is_err());
        assert!(SupabaseConfig::new("https://demo.supabase.co", "").is_err());
    }

    #[test]
    fn table_key_prefers_service_role() {
        let config = SupabaseConfig::new("https://demo.supabase.co", "anon").unwrap();
        assert_eq!(config.table_key(), "anon");
        let config = config.with_service_role_key(Some("service".to_string()));
        assert_eq!(config.table_key(), "service");
    }

    #[test]
    fn error_body_field_precedence() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token"}"#)
                .unwrap();
        assert_eq!(body.into_message().as_deref(), Some("Invalid Refresh Token"));

        let body: ErrorBody = serde_json::from_str(
            r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#,
        )
        .unwrap();
        assert_eq!(
            body.into_message().as_deref(),
            Some("duplicate key value violates unique constraint")
        );
    }
}
