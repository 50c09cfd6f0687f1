use crate::application_port::BackendError;
use crate::domain_port::*;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, error, info};
use url::Url;
use warp::Filter;
use warp::http::StatusCode;
use warp::reply::Reply;

/// Reads the callback parameters from the query and the fragment, which the
/// server never sees, and hands them back to us on `<path>/complete`.
const RELAY_PAGE: &str = r#"<!doctype html>
<html><head><meta charset="utf-8"><title>Kalimba Go</title></head>
<body><p>Completing sign in&hellip;</p>
<script>
const params = new URLSearchParams(window.location.search);
new URLSearchParams(window.location.hash.slice(1)).forEach((v, k) => params.set(k, v));
window.location.replace(window.location.pathname.replace(/\/$/, '') + '/complete?' + params.toString());
</script></body></html>"#;

const DONE_PAGE: &str = r#"<!doctype html>
<html><head><meta charset="utf-8"><title>Kalimba Go</title></head>
<body><p>You can close this window and return to Kalimba Go.</p></body></html>"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launcher {
    /// Opens the URL with the desktop's default browser.
    System,
    /// Only logs the URL; someone opens it by hand.
    Manual,
}

/// Runs the auth session in the system browser and catches the redirect on a
/// one-shot HTTP listener bound to 127.0.0.1.
pub struct LoopbackBrowser {
    port: u16,
    timeout: Duration,
    launcher: Launcher,
    cancel: Notify,
}

impl LoopbackBrowser {
    pub fn new(port: u16, timeout: Duration, launcher: Launcher) -> Self {
        LoopbackBrowser {
            port,
            timeout,
            launcher,
            cancel: Notify::new(),
        }
    }

    /// Ends the pending session with [`BrowserResult::Cancel`].
    pub fn cancel(&self) {
        self.cancel.notify_waiters();
    }

    fn launch(&self, auth_url: &Url) -> Result<(), BackendError> {
        info!("Open this URL to sign in: {}", auth_url);
        if self.launcher == Launcher::System {
            open::that_detached(auth_url.as_str()).map_err(|e| {
                error!("Failed to open browser: {}", e);
                BackendError::network("failed to open system browser").with_cause(e)
            })?;
        }
        Ok(())
    }
}

fn callback_routes(
    callback_path: String,
    callback_base: String,
    sender: Arc<Mutex<Option<oneshot::Sender<String>>>>,
) -> impl Filter<Extract = (warp::reply::Response,), Error = warp::Rejection> + Clone {
    let complete_path = format!("{}/complete", callback_path);
    warp::get()
        .and(warp::path::full())
        .and(
            warp::query::raw()
                .or(warp::any().map(String::new))
                .unify(),
        )
        .map(move |full: warp::path::FullPath, query: String| {
            let path = full.as_str().trim_end_matches('/');
            if path == callback_path {
                return warp::reply::html(RELAY_PAGE).into_response();
            }
            if path == complete_path {
                let sender = sender.lock().ok().and_then(|mut s| s.take());
                if let Some(sender) = sender {
                    let _ = sender.send(format!("{}?{}", callback_base, query));
                }
                return warp::reply::html(DONE_PAGE).into_response();
            }
            StatusCode::NOT_FOUND.into_response()
        })
}

#[async_trait::async_trait]
impl Browser for LoopbackBrowser {
    fn redirect_url(&self, path: &str) -> String {
        format!(
            "http://{}:{}/{}",
            Ipv4Addr::LOCALHOST,
            self.port,
            path.trim_start_matches('/')
        )
    }

    async fn open_auth_session(
        &self,
        auth_url: &Url,
        redirect_url: &str,
    ) -> Result<BrowserResult, BackendError> {
        let redirect = Url::parse(redirect_url)
            .map_err(|e| BackendError::validation("invalid redirect url").with_cause(e))?;
        let callback_path = redirect.path().trim_end_matches('/').to_string();
        let mut callback_base = redirect.clone();
        callback_base.set_query(None);
        callback_base.set_fragment(None);

        // registered before the listener is up, so an early cancel is seen
        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();

        let (url_tx, url_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let routes = callback_routes(
            callback_path,
            callback_base.to_string(),
            Arc::new(Mutex::new(Some(url_tx))),
        );

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, async move {
                let _ = stop_rx.await;
            })
            .map_err(|e| BackendError::network("cannot listen for auth redirect").with_cause(e))?;
        let server = tokio::spawn(server);
        debug!(%bound, "waiting for auth redirect");

        let outcome = match self.launch(auth_url) {
            Ok(()) => {
                tokio::select! {
                    url = url_rx => match url {
                        Ok(url) => Ok(BrowserResult::Success { url }),
                        Err(_) => Ok(BrowserResult::Dismiss),
                    },
                    _ = tokio::time::sleep(self.timeout) => {
                        info!("auth session timed out");
                        Ok(BrowserResult::Dismiss)
                    }
                    _ = &mut cancelled => Ok(BrowserResult::Cancel),
                }
            }
            Err(e) => Err(e),
        };

        let _ = stop_tx.send(());
        if let Err(e) = server.await {
            error!("redirect listener ended abnormally: {}", e);
        }
        outcome
    }
}
