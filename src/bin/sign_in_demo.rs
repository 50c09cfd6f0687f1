//! Signs in through the system browser and prints the cached user.
//!
//! With the default dev settings the in-memory backend is used, so any
//! redirect carrying `access_token=...` signs in a fixed demo user:
//!
//! ```text
//! cargo run --bin sign_in_demo -- --provider github --launcher manual
//! # then open http://127.0.0.1:54321/auth/callback#access_token=demo
//! ```

use clap::{Parser, ValueEnum};
use kalimba::app::ClientApp;
use kalimba::application_port::AuthFailure;
use kalimba::domain_model::Provider;
use kalimba::infra_loopback::{Launcher, LoopbackBrowser};
use kalimba::infra_memory::DeepLinkChannel;
use kalimba::logger::*;
use kalimba::settings::parse_settings;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LauncherArg {
    System,
    Manual,
}

#[derive(Parser, Debug)]
struct DemoCli {
    #[arg(long)]
    settings: Option<String>,

    #[arg(long, default_value = "github")]
    provider: Provider,

    #[arg(long, value_enum, default_value = "system")]
    launcher: LauncherArg,

    /// URL the app was "launched" with, e.g. a saved callback link.
    #[arg(long)]
    deep_link: Option<String>,

    /// Sign out again before exiting.
    #[arg(long)]
    sign_out: bool,

    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = DemoCli::parse();
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Plain
    };
    let logger = Logger::new_bootstrap(format);

    let settings = parse_settings(cli.settings.as_deref())?;
    logger.reload_from_config(&LogConfig {
        filter: settings.log.filter.clone(),
    })?;

    let launcher = match cli.launcher {
        LauncherArg::System => Launcher::System,
        LauncherArg::Manual => Launcher::Manual,
    };
    let browser = Arc::new(LoopbackBrowser::new(
        settings.auth.redirect_port,
        Duration::from_secs(settings.auth.browser_timeout_secs),
        launcher,
    ));
    let deep_links = Arc::new(DeepLinkChannel::new(cli.deep_link.clone()));
    let app = ClientApp::start(&settings, browser, deep_links).await?;

    match app.auth.current_user().await {
        Ok(Some(user)) => println!("already signed in as {:?}", user.email),
        Ok(None) => match app.auth.sign_in(cli.provider).await {
            Ok(session) => println!("signed in as {:?}", session.user.email),
            Err(AuthFailure::Cancelled) => println!("sign in cancelled"),
            Err(e) => println!("sign in failed: {}", e.message()),
        },
        Err(e) => println!("could not read current user: {}", e),
    }

    if let Ok(Some(user)) = app.auth.current_user().await {
        println!("cached user: {} ({} identities)", user.id, user.identities.len());
    }

    if cli.sign_out {
        match app.auth.sign_out().await {
            Ok(()) => println!("signed out"),
            Err(e) => println!("sign out failed: {}", e.message()),
        }
    }

    app.shutdown().await;
    Ok(())
}
