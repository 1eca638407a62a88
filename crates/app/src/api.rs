use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Extension, Json,
};
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use catalog_core::presenter::{ApiVersion, ProductView};
use catalog_core::types::{NewProduct, ProductChanges, Seller};

use crate::catalog::{CatalogError, TOP_SELLERS_LIMIT};
use crate::problem::ProblemResponse;
use crate::router::AppState;

pub const LIST_PAGE_SIZE: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    page: u32,
}

fn default_page() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    id: String,
}

impl ProductQuery {
    fn uuid(&self) -> Result<&str, ProblemResponse> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(ProblemResponse::invalid_request("id must not be empty"));
        }
        Ok(id)
    }
}

fn page_offset(page: u32) -> Result<u32, ProblemResponse> {
    if page == 0 {
        return Err(ProblemResponse::invalid_request("page must be 1 or greater"));
    }
    (page - 1)
        .checked_mul(LIST_PAGE_SIZE)
        .ok_or_else(|| ProblemResponse::invalid_request("page is out of range"))
}

fn observe<T>(op: &'static str, result: Result<T, CatalogError>) -> Result<T, ProblemResponse> {
    let label = match &result {
        Ok(_) => "ok",
        Err(CatalogError::NotFound | CatalogError::SellerNotFound) => "not_found",
        Err(CatalogError::Notification(_) | CatalogError::SellerVanished(_)) => "notification_error",
        Err(err) if err.is_storage() => "storage_error",
        Err(_) => "error",
    };
    counter!("catalog_requests_total", "op" => op, "result" => label).increment(1);
    result.map_err(ProblemResponse::from)
}

pub async fn list_products(
    State(state): State<AppState>,
    Extension(version): Extension<ApiVersion>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<ProductView>>, ProblemResponse> {
    let Query(query) = query?;
    let offset = page_offset(query.page)?;
    let products = observe("list", state.catalog().list(offset, LIST_PAGE_SIZE).await)?;
    Ok(Json(state.presenter().present_all(&products, version)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Extension(version): Extension<ApiVersion>,
    query: Result<Query<ProductQuery>, QueryRejection>,
) -> Result<Json<ProductView>, ProblemResponse> {
    let Query(query) = query?;
    let product = observe("get", state.catalog().get(query.uuid()?).await)?;
    Ok(Json(state.presenter().present(&product, version)))
}

pub async fn create_product(
    State(state): State<AppState>,
    Extension(version): Extension<ApiVersion>,
    payload: Result<Json<NewProduct>, JsonRejection>,
) -> Result<Json<ProductView>, ProblemResponse> {
    let Json(input) = payload?;
    if input.seller_uuid.trim().is_empty() {
        return Err(ProblemResponse::invalid_request("seller must not be empty"));
    }
    let product = observe("create", state.catalog().create(&input).await)?;
    Ok(Json(state.presenter().present(&product, version)))
}

pub async fn update_product(
    State(state): State<AppState>,
    Extension(version): Extension<ApiVersion>,
    query: Result<Query<ProductQuery>, QueryRejection>,
    payload: Result<Json<ProductChanges>, JsonRejection>,
) -> Result<Json<ProductView>, ProblemResponse> {
    let Query(query) = query?;
    let Json(changes) = payload?;
    let updated = observe("update", state.catalog().update(query.uuid()?, &changes).await)?;
    if let Some(report) = &updated.dispatch {
        let channels: Vec<&str> = report
            .attempts
            .iter()
            .map(|attempt| attempt.channel.as_str())
            .collect();
        info!(
            stage = "api",
            product_uuid = %updated.product.uuid,
            old_stock = report.change.old_stock,
            new_stock = report.change.new_stock,
            ?channels,
            "seller notified of stock change"
        );
    }
    Ok(Json(state.presenter().present(&updated.product, version)))
}

pub async fn delete_product(
    State(state): State<AppState>,
    query: Result<Query<ProductQuery>, QueryRejection>,
) -> Result<Json<Value>, ProblemResponse> {
    let Query(query) = query?;
    observe("delete", state.catalog().delete(query.uuid()?).await)?;
    Ok(Json(json!({})))
}

pub async fn list_sellers(State(state): State<AppState>) -> Result<Json<Vec<Seller>>, ProblemResponse> {
    let sellers = observe("sellers", state.catalog().sellers().await)?;
    Ok(Json(sellers))
}

pub async fn top_sellers(State(state): State<AppState>) -> Result<Json<Vec<Seller>>, ProblemResponse> {
    let sellers = observe(
        "top_sellers",
        state.catalog().top_sellers(TOP_SELLERS_LIMIT).await,
    )?;
    Ok(Json(sellers))
}
