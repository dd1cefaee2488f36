//! A minimal bot: answers configured slash commands in comments and logs
//! pushes. Real bots replace the config document and the handlers.

use std::process::ExitCode;

use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use robot_runtime::config::{ConfigDocument, RepoFilter, RepoScoped, ValidationError, find_config};
use robot_runtime::dispatch::HandlerRegistry;
use robot_runtime::options::ServiceOptions;
use robot_runtime::secret::{CensoringMakeWriter, SecretAgent, SecretStore, WatchSettings};
use robot_runtime::service;

#[derive(Debug, Default, Deserialize)]
struct BotConfig {
    #[serde(default)]
    config_items: Vec<BotItem>,
}

#[derive(Debug, Deserialize)]
struct BotItem {
    #[serde(flatten)]
    filter: RepoFilter,

    #[serde(default)]
    commands: Vec<String>,
}

impl RepoScoped for BotItem {
    fn repo_filter(&self) -> &RepoFilter {
        &self.filter
    }
}

impl ConfigDocument for BotConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        for item in &self.config_items {
            item.filter.validate()?;
        }
        Ok(())
    }

    fn set_default(&mut self) {
        for item in &mut self.config_items {
            if item.commands.is_empty() {
                item.commands.push("/ping".to_string());
            }
        }
    }
}

fn registry() -> HandlerRegistry<BotConfig> {
    let mut registry = HandlerRegistry::<BotConfig>::new();

    registry.on_note(|note, config, span| async move {
        if !note.is_creating_comment() {
            return Ok(());
        }
        let Some(item) = find_config(&note.repo, &config.document().config_items) else {
            return Ok(());
        };

        let command = note.body.trim();
        if item.commands.iter().any(|c| c == command) {
            info!(
                parent: &span,
                command,
                commenter = %note.commenter,
                target = %note.target.number(),
                "Command received"
            );
        }
        Ok(())
    });

    registry.on_push(|push, _config, span| async move {
        info!(
            parent: &span,
            branch = push.branch().unwrap_or(&push.git_ref),
            after = %push.after,
            pusher = %push.pusher,
            "Branch updated"
        );
        Ok(())
    });

    registry
}

#[tokio::main]
async fn main() -> ExitCode {
    let options = ServiceOptions::parse();

    let store = SecretStore::new();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "robot_runtime=debug,info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(CensoringMakeWriter::new(store.clone(), std::io::stderr)),
        )
        .init();

    let secrets = match SecretAgent::start_with(
        store,
        options.secret_files.iter().cloned(),
        WatchSettings::default(),
    )
    .await
    {
        Ok(secrets) => secrets,
        Err(e) => {
            error!(error = %e, "Failed to load secrets");
            return ExitCode::FAILURE;
        }
    };

    let result = service::run(&options, registry(), shutdown_signal()).await;
    secrets.stop().await;

    match result {
        Ok(()) => {
            info!("Bot stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Bot failed");
            ExitCode::FAILURE
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}
