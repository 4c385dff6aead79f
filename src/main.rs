use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth_session::auth::{Credentials, RegisterRequest};
use auth_session::config::Config;
use auth_session::transport::ApiRequest;
use auth_session::SessionContext;

const USAGE: &str = "usage: auth-session <status | login EMAIL | register EMAIL FULL_NAME | refresh | logout | get PATH>";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let config = Config::load()?;
    info!(data_dir = %config.storage.data_dir, auth = %config.auth.base_url, "Loaded configuration");

    let ctx = SessionContext::init(config)?;
    let result = tokio::select! {
        result = run(&ctx, command, &args[1..]) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    ctx.shutdown().await;
    result
}

async fn run(ctx: &Arc<SessionContext>, command: &str, args: &[String]) -> anyhow::Result<()> {
    match (command, args) {
        ("status", []) => {
            let status = ctx.manager.initialize().await?;
            let expires_at = ctx.store.get_expires_at()?;
            println!("authenticated: {}", status.authenticated);
            if let Some(at) = expires_at {
                println!("expires_at: {}", at.to_rfc3339());
            }
            if let Some(profile) = status.profile {
                println!("user: {}", profile.email);
                if let Some(account) = profile.account_number {
                    println!("account: {account}");
                }
            }
        }
        ("login", [email]) => {
            let credentials = Credentials {
                email: email.clone(),
                password: password()?,
            };
            match ctx.manager.sign_in(&credentials).await {
                Ok(outcome) => println!(
                    "logged in{}",
                    outcome
                        .session
                        .expires_at
                        .map(|at| format!(", token valid until {}", at.to_rfc3339()))
                        .unwrap_or_default()
                ),
                Err(e) => bail!(e.user_message("Login failed")),
            }
        }
        ("register", [email, full_name]) => {
            let payload = RegisterRequest {
                email: email.clone(),
                extra: Default::default(),
                full_name: full_name.clone(),
                password: password()?,
            };
            match ctx.manager.register_and_sign_in(&payload).await {
                Ok(_) => println!("registered and logged in"),
                Err(e) => bail!(e.user_message("Registration failed")),
            }
        }
        ("refresh", []) => {
            let session = ctx.coordinator.refresh_with_lock().await?;
            println!(
                "refreshed{}",
                session
                    .expires_at
                    .map(|at| format!(", token valid until {}", at.to_rfc3339()))
                    .unwrap_or_default()
            );
        }
        ("logout", []) => {
            ctx.manager.logout().await?;
            println!("logged out");
        }
        ("get", [path]) => match ctx.api.send(&ApiRequest::get(path.as_str())).await {
            Ok(response) => println!("{}", serde_json::to_string_pretty(&response.body)?),
            Err(e) => bail!(e.user_message("Request failed")),
        },
        _ => bail!(USAGE),
    }
    Ok(())
}

fn password() -> anyhow::Result<String> {
    std::env::var("AUTH_PASSWORD").context("AUTH_PASSWORD must be set")
}
