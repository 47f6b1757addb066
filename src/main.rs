#[macro_use]
extern crate rocket;

use pv_monitor::clock::SystemClock;
use pv_monitor::manager::RuntimeStatus;
use pv_monitor::plant::PlantSnapshot;
use pv_monitor::{api, metrics, settings, PlantManager};
use rocket::fairing::AdHoc;
use rocket::serde::json::{json, Json, Value};
use rocket::{Build, Rocket, State};
use std::collections::BTreeMap;
use std::sync::Arc;

#[get("/api/plants")]
fn plants_route(manager: &State<PlantManager>) -> Json<BTreeMap<String, PlantSnapshot>> {
    Json(manager.plants())
}

#[get("/api/plants/<id>")]
fn plant_route(id: &str, manager: &State<PlantManager>) -> Result<Json<PlantSnapshot>, api::Error> {
    manager.plant(id).map(Json)
}

#[get("/api/update")]
async fn update_route(manager: &State<PlantManager>) -> Json<Value> {
    let results = manager.update_all().await;
    Json(json!({
        "status": "success",
        "results": results,
        "plants": manager.plants(),
    }))
}

#[get("/api/monitoring/start")]
async fn start_route(manager: &State<PlantManager>) -> Json<Value> {
    Json(match manager.start().await {
        true => json!({"status": "success", "message": "monitoring started"}),
        false => json!({"status": "error", "message": "monitoring already active"}),
    })
}

#[get("/api/monitoring/stop")]
async fn stop_route(manager: &State<PlantManager>) -> Json<Value> {
    Json(match manager.stop().await {
        true => json!({"status": "success", "message": "monitoring stopped"}),
        false => json!({"status": "error", "message": "monitoring not active"}),
    })
}

#[get("/api/status")]
fn status_route(manager: &State<PlantManager>) -> Json<RuntimeStatus> {
    Json(manager.runtime_status())
}

#[get("/metrics")]
fn metrics_route() -> Result<String, api::Error> {
    metrics::read()
}

#[launch]
fn rocket() -> Rocket<Build> {
    env_logger::init();

    let settings = match settings::read_settings(settings::CONFIG_FILE) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };
    let manager = settings::build_manager(&settings, Arc::new(SystemClock));

    rocket::build()
        .manage(manager)
        .attach(AdHoc::on_liftoff("Start monitoring", |rocket| {
            Box::pin(async move {
                if let Some(manager) = rocket.state::<PlantManager>() {
                    manager.start().await;
                }
            })
        }))
        .attach(AdHoc::on_shutdown("Stop monitoring", |rocket| {
            Box::pin(async move {
                if let Some(manager) = rocket.state::<PlantManager>() {
                    manager.stop().await;
                }
            })
        }))
        .mount(
            "/",
            routes![
                plants_route,
                plant_route,
                update_route,
                start_route,
                stop_route,
                status_route,
                metrics_route
            ],
        )
}
