use clap::Parser;
use truledgr::auth::{AuthApi, IdentifierOutcome};
use truledgr::config::{Args, Command, normalize_api_url};
use truledgr::health::{HealthProbe, HttpHealthProbe};
use truledgr::{AppContext, Config, telemetry};

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, stopping");
        },
    }
}

/// Turn a client error into the message a user should see
fn user_facing(error: truledgr::Error) -> anyhow::Error {
    tracing::debug!("{:?}", error);
    anyhow::anyhow!(error.user_message())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;

    if matches!(args.command, Command::Validate) {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry()?;

    let ctx = AppContext::from_config(config, args.api_url.as_deref()).map_err(user_facing)?;

    match args.command {
        Command::Health { url: Some(url) } => {
            let url = normalize_api_url(&url).map_err(user_facing)?;
            let probe = HttpHealthProbe::new(ctx.config().health.timeout).map_err(user_facing)?;
            println!("{url}: {}", probe.probe(&url).await);
        }
        Command::Health { url: None } => {
            let status = ctx.health().check_now().await;
            println!("{}: {status}", ctx.health().base_url());
        }
        Command::Watch => {
            let mut updates = ctx.health().subscribe();
            let _periodic = ctx.health().start_periodic();
            println!("Watching {} (Ctrl+C to stop)", ctx.health().base_url());

            let shutdown = shutdown_signal();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let status = *updates.borrow_and_update();
                        println!("{} {status}", chrono::Utc::now().format("%H:%M:%S"));
                    }
                }
            }
        }
        Command::CheckEmail { email } => {
            let exists = AuthApi::new(ctx.client()).check_email(email.trim()).await.map_err(user_facing)?;
            println!("{}", if exists { "Account exists" } else { "No account for this email" });
        }
        Command::Login { email, password } => {
            let mut flow = ctx.identifier_flow();
            flow.set_email(email);

            match flow.submit_identifier().await {
                Ok(IdentifierOutcome::JitSignup) => {
                    println!("No account exists for {}. Sign up in the app to create one.", flow.email());
                    return Ok(());
                }
                Ok(outcome) => tracing::debug!(?outcome, "Identifier checked"),
                Err(_) => anyhow::bail!(flow.error().unwrap_or_default().to_string()),
            }

            flow.set_password(password);
            match flow.submit_password().await {
                Ok(user) => println!("Signed in as {} <{}>", user.username, user.email),
                Err(_) => anyhow::bail!(flow.error().unwrap_or_default().to_string()),
            }
        }
        Command::Logout { all } => {
            ctx.session().logout(all).await;
            println!("Signed out");
        }
        Command::Whoami => {
            ctx.session().initialize().await;
            match ctx.session().user() {
                Some(user) => {
                    println!("{} <{}>", user.username, user.email);
                    if !user.email_verified {
                        println!("Email not verified");
                    }
                }
                None => println!("Not signed in"),
            }
        }
        Command::SetUrl { url } => {
            let url = ctx.set_api_url(&url).map_err(user_facing)?;
            let probe = HttpHealthProbe::new(ctx.config().health.timeout).map_err(user_facing)?;
            println!("API URL set to {url} ({})", probe.probe(&url).await);
        }
        // Answered before the context is built
        Command::Validate => {}
    }

    Ok(())
}
