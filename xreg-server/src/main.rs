//! Binary entry point: parses configuration, wires up logging and the
//! database, optionally verifies a Model file, then serves HTTP.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use xreg_core::Model;
use xreg_server::config::Config;
use xreg_server::services::ServicesBuilder;
use xreg_storage::{PostgresConfig, PostgresGateway};

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_tracing(config.verbose);

    let mut verified_model: Option<Model> = None;
    if let Some(model_path) = &config.model {
        match load_and_verify_model(model_path) {
            Ok(_) if config.verify_only => {
                tracing::info!(path = %model_path, "model is valid");
                return ExitCode::from(0);
            }
            Ok(model) => verified_model = Some(model),
            Err(err) => {
                tracing::error!(path = %model_path, error = %err, "model failed validation");
                return ExitCode::from(2);
            }
        }
    } else if config.verify_only {
        tracing::error!("--verify-only requires --model");
        return ExitCode::from(2);
    }

    let gateway = match PostgresGateway::new(&PostgresConfig {
        database_url: config.database_url.clone(),
        pool_size: config.pool_size,
    })
    .await
    {
        Ok(g) => Arc::new(g),
        Err(err) => {
            tracing::error!(error = %err, "failed to connect to postgres");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = PostgresGateway::run_migrations(&config.database_url).await {
        tracing::error!(error = %err, "failed to run migrations");
        return ExitCode::from(1);
    }

    if let Err(err) = ensure_default_registry(&gateway, &config.default_registry_uid, verified_model.as_ref()).await {
        tracing::error!(error = %err, "failed to provision default registry");
        return ExitCode::from(1);
    }

    let (handle, task) = match ServicesBuilder::new(gateway, config.default_registry_uid.clone())
        .bind(&config.bind)
        .port(config.port)
        .run()
    {
        Ok(pair) => pair,
        Err(err) => {
            tracing::error!(error = %err, "failed to start http server");
            return ExitCode::from(1);
        }
    };
    tracing::info!(bind = %config.bind, port = config.port, "xreg-server listening");

    if let Err(err) = task.await {
        tracing::error!(error = %err, "server task panicked");
        return ExitCode::from(1);
    }
    drop(handle);
    ExitCode::from(0)
}

/// §3: "A Model is created with its Registry" — makes sure the configured
/// default registry exists before the server starts accepting requests, and
/// (when `--model` was given) persists the verified Model onto it so every
/// write against this registry is validated against it from the first
/// request on.
async fn ensure_default_registry(gateway: &PostgresGateway, uid: &str, model: Option<&Model>) -> Result<(), xreg_core::RegistryError> {
    let model_json = model.map(Model::to_json).unwrap_or_else(|| Model::default().to_json());
    let registry = match gateway.get_registry_by_uid(uid).await {
        Ok(r) => r,
        Err(xreg_core::RegistryError::NotFound(_)) => {
            let id = Uuid::new_v4().to_string();
            tracing::info!(uid, "provisioning default registry");
            gateway.create_registry(&id, uid, model_json.clone()).await?
        }
        Err(err) => return Err(err),
    };
    if model.is_some() {
        gateway.save_model(&registry.id, model_json).await?;
    }
    Ok(())
}

fn load_and_verify_model(path: &str) -> Result<Model, xreg_core::RegistryError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| xreg_core::RegistryError::bad_request(format!("failed to read model file '{path}': {e}")))?;
    let model: Model = serde_json::from_str(&raw)
        .map_err(|e| xreg_core::RegistryError::model_invalid(format!("failed to parse model file '{path}': {e}")))?;
    model.verify()?;
    Ok(model)
}
