#[macro_use]
extern crate rocket;

mod api;
mod blob;
mod config;
mod db;
mod env;
mod error;
mod integrity;
mod models;
mod state;
mod store;
mod telemetry;
#[cfg(test)]
mod test;

use std::sync::Arc;
use std::time::Duration;

use api::*;
use blob::FsBlobStore;
use config::AppConfig;
use error::AppError;
use integrity::orphans::reconcile_orphan_blobs;
use rocket::{Build, Rocket, tokio};
use state::AppState;
use store::SqliteStore;
use telemetry::TelemetryFairing;
use telemetry::init_tracing;
use thiserror::Error;

use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
    #[error("{0}")]
    Rocket(Box<rocket::Error>),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Rocket(Box::new(value))
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    env::load_environment()?;
    let config = AppConfig::from_env()?;
    let _telemetry = init_tracing(&config)?;

    if config.is_production() && config.honeycomb_api_key.is_none() {
        warn!("HONEYCOMB_API_KEY is not set, traces will not be exported");
    }

    info!(profile = %config.profile, database = %config.database_url, "Opening stores");
    let store = SqliteStore::connect(&config.database_url).await?;
    let blobs = FsBlobStore::new(config.blob_root.clone(), &config.blob_base_url)
        .await
        .map_err(AppError::from)?;

    let state = AppState::new(Arc::new(store), Arc::new(blobs));

    match config.orphan_sweep_interval {
        Some(interval) => spawn_orphan_sweep(state.clone(), interval),
        None => info!("Orphan blob sweep disabled"),
    }

    init_rocket(state).launch().await?;
    Ok(())
}

fn spawn_orphan_sweep(state: AppState, interval: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            match reconcile_orphan_blobs(state.store(), state.blobs()).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Removed {} orphan blob(s)", count);
                    }
                }
                Err(e) => {
                    error!("Orphan blob sweep failed: {}", e);
                }
            }

            tokio::time::sleep(interval).await;
        }
    });
}

pub fn init_rocket(state: AppState) -> Rocket<Build> {
    info!("Starting classroom backend");

    rocket::build()
        .manage(state)
        .mount(
            "/api/0",
            routes![
                api_get_institute,
                api_create_institute,
                api_update_institute,
                api_delete_institute,
                api_get_teacher,
                api_create_teacher,
                api_update_teacher,
                api_delete_teacher,
                api_get_course,
                api_create_course,
                api_update_course,
                api_delete_course,
                api_get_student,
                api_create_student,
                api_update_student,
                api_delete_student,
                api_get_relative,
                api_create_relative,
                api_update_relative,
                api_delete_relative,
                api_get_course_record,
                api_create_course_record,
                api_update_course_record,
                api_delete_course_record,
                api_get_course_comment,
                api_create_course_comment,
                api_update_course_comment,
                api_delete_course_comment,
                api_get_cloud_media,
                api_create_cloud_media,
                api_update_cloud_media,
                api_delete_cloud_media,
                api_get_student_course_ref,
                api_create_student_course_ref,
                api_update_student_course_ref,
                api_delete_student_course_ref,
                api_get_student_relative_ref,
                api_create_student_relative_ref,
                api_update_student_relative_ref,
                api_delete_student_relative_ref,
                api_get_student_media,
                api_get_student_course_records,
                api_upload_media,
                api_download_media,
                api_reconcile_orphan_blobs,
            ],
        )
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
}
