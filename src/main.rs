use std::{process, sync::Arc, time::Duration};

use pagestash::{
    application::error::AppError,
    cache::{CacheConfig, CacheController, CacheState},
    config::{self, ClearArgs, Command, Settings},
    infra::{
        error::InfraError,
        http::{self, AdminState, HttpState},
        telemetry,
        upstream::UpstreamClient,
    },
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        Command::Serve(_) => run_serve(settings).await,
        Command::Clear(args) => run_clear(settings, args).await,
        Command::Purge(_) => run_purge(settings).await,
    }
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings);
    let controller = cache_config.build_controller();
    let cache = CacheState::new(cache_config, controller);
    let upstream = UpstreamClient::new(&settings.upstream).map_err(InfraError::from)?;

    info!(
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        upstream = %upstream.base(),
        cache_root = %settings.cache.root.display(),
        cache_enabled = settings.cache.enabled,
        minify_enabled = settings.cache.minify_enabled,
        "starting pagestash"
    );

    let admin_state = AdminState {
        controller: Arc::clone(&cache.controller),
        settings_path: settings.admin.settings_path.clone(),
    };
    let http_state = HttpState { cache, upstream };

    serve_http(&settings, http_state, admin_state).await
}

async fn serve_http(
    settings: &Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));

    let servers = async {
        try_join!(public_server, admin_server)
            .map_err(|err| AppError::unexpected(format!("server error: {err}")))
    };
    let deadline = shutdown_deadline(shutdown_rx, settings.server.graceful_shutdown);

    tokio::select! {
        result = servers => {
            result?;
        }
        () = deadline => {
            warn!(
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Resolves once shutdown was requested and the grace period has elapsed.
async fn shutdown_deadline(shutdown: watch::Receiver<bool>, grace: Duration) {
    wait_for_shutdown(shutdown).await;
    tokio::time::sleep(grace).await;
}

async fn run_clear(settings: Settings, args: ClearArgs) -> Result<(), AppError> {
    let controller = CacheConfig::from(&settings).build_controller();
    let all = args.all;

    tokio::task::spawn_blocking(move || {
        if all {
            controller.clear_all_caches()
        } else {
            controller.clear_content_caches()
        }
    })
    .await
    .map_err(|err| AppError::unexpected(format!("clear task failed: {err}")))??;

    info!(cache_root = %settings.cache.root.display(), all, "caches cleared");
    Ok(())
}

async fn run_purge(settings: Settings) -> Result<(), AppError> {
    let controller = CacheConfig::from(&settings).build_controller();

    tokio::task::spawn_blocking(move || purge(&controller))
        .await
        .map_err(|err| AppError::unexpected(format!("purge task failed: {err}")))??;

    info!(cache_root = %settings.cache.root.display(), "cache root removed");
    Ok(())
}

/// Clear everything, then remove the cache root itself.
fn purge(controller: &CacheController) -> Result<(), AppError> {
    controller.clear_all_caches()?;

    match std::fs::remove_dir_all(controller.assets().root()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::from(InfraError::from(err))),
    }
}
