use axum::response::IntoResponse;

/// Service banner for `/`; intentionally not part of the OpenAPI document.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
