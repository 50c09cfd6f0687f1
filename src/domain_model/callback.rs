use std::collections::HashMap;
use url::Url;

/// Parameters carried by an OAuth callback URL.
///
/// The implicit flow puts them in the fragment, the PKCE flow in the query;
/// fragment parameters win when both are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams(HashMap<String, String>);

impl CallbackParams {
    pub fn parse(callback_url: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(callback_url)?;
        let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        if let Some(fragment) = url.fragment() {
            params.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
        }
        Ok(CallbackParams(params))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Provider or backend error reported through the redirect.
    pub fn error(&self) -> Option<String> {
        self.get("error_description")
            .or_else(|| self.get("error"))
            .map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_params_override_query() {
        let params = CallbackParams::parse(
            "kalimba://auth/callback?access_token=old&state=s#access_token=new&expires_in=3600",
        )
        .unwrap();
        assert_eq!(params.get("access_token"), Some("new"));
        assert_eq!(params.get("state"), Some("s"));
        assert_eq!(params.get("expires_in"), Some("3600"));
    }

    #[test]
    fn error_description_is_preferred() {
        let params = CallbackParams::parse(
            "http://127.0.0.1:54321/auth/callback?error=access_denied&error_description=User+denied",
        )
        .unwrap();
        assert_eq!(params.error().as_deref(), Some("User denied"));
    }

    #[test]
    fn empty_values_read_as_missing() {
        let params = CallbackParams::parse("kalimba://auth/callback?code=").unwrap();
        assert_eq!(params.get("code"), None);
    }
}
