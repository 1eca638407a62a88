use std::collections::HashSet;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{sse::Sse, IntoResponse},
    routing::get,
    Extension, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;

use catalog_core::notifier::ChannelKind;
use catalog_core::presenter::{ApiVersion, Presenter};

use crate::api;
use crate::catalog::ProductCatalog;
use crate::deliveries::{
    delivery_keep_alive, delivery_stream, parse_channel_list, DeliveryFeed, DeliveryFilter,
};
use crate::telemetry;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    catalog: ProductCatalog,
    presenter: Presenter,
    deliveries: DeliveryFeed,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        catalog: ProductCatalog,
        presenter: Presenter,
        deliveries: DeliveryFeed,
    ) -> Self {
        Self {
            metrics,
            catalog,
            presenter,
            deliveries,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    pub fn deliveries(&self) -> &DeliveryFeed {
        &self.deliveries
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/_debug/deliveries", get(debug_deliveries))
        .nest("/api/v1", v1_routes())
        .nest("/api/v2", v2_routes())
        .with_state(state)
}

/// Product routes shared by both API versions. The version tag travels as a
/// request extension so handlers never look at the path.
fn product_routes(version: ApiVersion) -> Router<AppState> {
    Router::new()
        .route("/products", get(api::list_products))
        .route(
            "/product",
            get(api::get_product)
                .post(api::create_product)
                .put(api::update_product)
                .delete(api::delete_product),
        )
        .layer(Extension(version))
}

fn v1_routes() -> Router<AppState> {
    product_routes(ApiVersion::V1).route("/sellers", get(api::list_sellers))
}

fn v2_routes() -> Router<AppState> {
    product_routes(ApiVersion::V2).route("/sellers/top10", get(api::top_sellers))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[derive(Debug, Deserialize)]
struct DeliveryQuery {
    #[serde(default)]
    channels: Option<String>,
}

async fn debug_deliveries(
    State(state): State<AppState>,
    Query(query): Query<DeliveryQuery>,
) -> Result<
    Sse<impl tokio_stream::Stream<Item = Result<axum::response::sse::Event, serde_json::Error>>>,
    (StatusCode, String),
> {
    let channels: Option<HashSet<ChannelKind>> =
        parse_channel_list(query.channels).map_err(|err| (StatusCode::BAD_REQUEST, err))?;
    let filter = DeliveryFilter::from_channels(channels);
    let stream = delivery_stream(state.deliveries().clone(), filter);

    Ok(Sse::new(stream).keep_alive(delivery_keep_alive()))
}
