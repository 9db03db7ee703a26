use std::sync::Arc;

use tokio::sync::oneshot;

use attrition_serving::config::ServingConfig;
use attrition_serving::Services;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(error) = run_console() {
        log::error!("[SERVING] {}", error);
        std::process::exit(1);
    }
}

fn run_console() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServingConfig::from_env()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                log::error!("[SERVING] Failed to listen for shutdown: {}", error);
            }
            let _ = shutdown_tx.send(());
        });

        run_until_shutdown(config, shutdown_rx).await
    })
}

async fn run_until_shutdown(
    config: ServingConfig,
    shutdown_rx: oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    log::info!(
        "[SERVING] Starting in {} mode (default model {})",
        config.mode.as_str(),
        config.default_model
    );
    let services = Services::build(config).await?;

    let worker_handle = services.worker.as_ref().map(|worker| {
        let worker = Arc::clone(worker);
        tokio::spawn(async move {
            worker.start().await;
        })
    });

    let mut api_handle = tokio::spawn(attrition_serving::http::serve(
        services.config.api_addr.clone(),
        services.state.clone(),
        services.config.cors_origin.clone(),
    ));

    let mut outcome = Ok(());
    tokio::select! {
        _ = shutdown_rx => {
            log::info!("[SERVING] Shutting down gracefully...");
        }
        joined = &mut api_handle => {
            match joined {
                Ok(Err(error)) => outcome = Err(format!("API server error: {error}")),
                Err(error) => outcome = Err(format!("API task failed: {error}")),
                Ok(Ok(())) => {}
            }
        }
    }

    if let Some(worker) = &services.worker {
        worker.stop();
    }
    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }
    api_handle.abort();

    outcome.map_err(|message| message.into())
}
