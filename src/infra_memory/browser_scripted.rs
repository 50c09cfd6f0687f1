use crate::application_port::BackendError;
use crate::domain_port::*;
use std::sync::Mutex;
use url::Url;

#[derive(Debug, Clone)]
pub enum BrowserScript {
    /// Redirects back with `params` appended as the URL fragment.
    RedirectWith(String),
    Cancel,
    Dismiss,
    Fail(String),
}

/// Browser double that plays back a fixed outcome and records what it opened.
pub struct ScriptedBrowser {
    scheme: String,
    script: BrowserScript,
    opened: Mutex<Vec<String>>,
}

impl ScriptedBrowser {
    pub fn new(script: BrowserScript) -> Self {
        ScriptedBrowser {
            scheme: "kalimba".to_string(),
            script,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Browser for ScriptedBrowser {
    fn redirect_url(&self, path: &str) -> String {
        format!("{}://{}", self.scheme, path.trim_start_matches('/'))
    }

    async fn open_auth_session(
        &self,
        auth_url: &Url,
        redirect_url: &str,
    ) -> Result<BrowserResult, BackendError> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(auth_url.to_string());
        }
        match &self.script {
            BrowserScript::RedirectWith(params) => Ok(BrowserResult::Success {
                url: format!("{}#{}", redirect_url, params),
            }),
            BrowserScript::Cancel => Ok(BrowserResult::Cancel),
            BrowserScript::Dismiss => Ok(BrowserResult::Dismiss),
            BrowserScript::Fail(message) => Err(BackendError::network(message.clone())),
        }
    }
}
