//! stencil-api: Open Service Broker HTTP surface for Stencil.
//!
//! Decodes OSB requests, checks the protocol headers and hands the calls to
//! a `BrokerEngine`. Every `/v2` request must carry `X-Broker-API-Version`
//! at or above the configured minimum; `X-Broker-API-Originating-Identity`
//! supplies the acting user.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/v2/catalog` | Service catalog |
//! | PUT | `/v2/service_instances/{instance_id}` | Provision |
//! | DELETE | `/v2/service_instances/{instance_id}` | Deprovision |
//! | GET | `/v2/service_instances/{instance_id}/last_operation` | Poll an async operation |
//! | PUT | `/v2/service_instances/{instance_id}/service_bindings/{binding_id}` | Bind |
//! | DELETE | `/v2/service_instances/{instance_id}/service_bindings/{binding_id}` | Unbind |

pub mod error;
pub mod handlers;
pub mod headers;

use axum::Router;
use axum::routing::{get, put};
use semver::Version;
use stencil_broker::BrokerEngine;

pub use error::ApiError;
pub use headers::{API_VERSION_HEADER, ORIGINATING_IDENTITY_HEADER, parse_api_version};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: BrokerEngine,
    pub min_api_version: Version,
}

/// Build the OSB router.
pub fn build_router(engine: BrokerEngine, min_api_version: Version) -> Router {
    let state = ApiState {
        engine,
        min_api_version,
    };

    let v2 = Router::new()
        .route("/catalog", get(handlers::catalog))
        .route(
            "/service_instances/{instance_id}",
            put(handlers::provision).delete(handlers::deprovision),
        )
        .route(
            "/service_instances/{instance_id}/last_operation",
            get(handlers::last_operation),
        )
        .route(
            "/service_instances/{instance_id}/service_bindings/{binding_id}",
            put(handlers::bind).delete(handlers::unbind),
        )
        .with_state(state);

    Router::new().nest("/v2", v2)
}
