use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use axum_extra::routing::TypedPath;

use crate::{cooker::Manager, db};

pub mod assets;
pub mod auth;
pub mod handler;
pub mod models;
pub mod sse;

#[derive(Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

pub struct State {
    pub manager: Arc<Manager>,
    pub store: db::Store,
    pub sse: Arc<sse::SseManager>,
    pub admin: AdminCredentials,
}

pub type AppState = Arc<State>;

pub fn app(manager: Arc<Manager>, store: db::Store, admin: AdminCredentials) -> Router {
    let sse_hub = sse::SseManager::new();
    sse_hub.register(&manager);

    let state = Arc::new(State {
        manager,
        store,
        sse: sse_hub,
        admin,
    });

    Router::new()
        .route(handler::admin::HealthRoute::PATH, get(handler::admin::health))
        .route(
            handler::admin::DeviceListRoute::PATH,
            get(handler::admin::list_devices),
        )
        .route(
            handler::admin::ServerInfoRoute::PATH,
            get(handler::admin::server_info),
        )
        .route(
            handler::device::StateRoute::PATH,
            get(handler::device::state),
        )
        .route(
            handler::device::TargetTemperatureRoute::PATH,
            get(handler::device::target_temperature).post(handler::device::set_target_temperature),
        )
        .route(
            handler::device::CurrentTemperatureRoute::PATH,
            get(handler::device::current_temperature),
        )
        .route(
            handler::device::StartRoute::PATH,
            post(handler::device::start),
        )
        .route(handler::device::StopRoute::PATH, post(handler::device::stop))
        .route(
            handler::device::TimerRoute::PATH,
            get(handler::device::timer).post(handler::device::set_timer),
        )
        .route(
            handler::device::TimerStartRoute::PATH,
            post(handler::device::start_timer),
        )
        .route(
            handler::device::TimerStopRoute::PATH,
            post(handler::device::stop_timer),
        )
        .route(
            handler::device::AlarmClearRoute::PATH,
            post(handler::device::clear_alarm),
        )
        .route(
            handler::device::UnitRoute::PATH,
            get(handler::device::unit).post(handler::device::set_unit),
        )
        .route(
            handler::device::SpeakerStatusRoute::PATH,
            get(handler::device::speaker_status),
        )
        .route(
            handler::device::EventStreamRoute::PATH,
            get(handler::device::events),
        )
        .fallback(assets::serve)
        .with_state(state)
}
