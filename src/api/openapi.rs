use utoipa::openapi::{InfoBuilder, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::handlers::{auth, health};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both
/// served and documented. Routes added outside (like `/`) are intentionally
/// not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    // `routes!` reads #[utoipa::path] to bind HTTP method + path.
    let router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::register::register))
        .routes(routes!(auth::session::login))
        .routes(routes!(auth::session::logout))
        .routes(routes!(auth::session::refresh))
        .routes(routes!(auth::account::me))
        .routes(routes!(auth::account::export_data))
        .routes(routes!(auth::account::delete_account))
        .routes(routes!(auth::verification::verify_email))
        .routes(routes!(auth::verification::resend_verification))
        .routes(routes!(auth::password_reset::forgot_password))
        .routes(routes!(auth::password_reset::reset_password));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Accounts, sessions, and password recovery".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Service and dependency health".to_string());

    OpenApiBuilder::new()
        .info(info)
        .tags(Some(vec![auth_tag, health_tag]))
        .build()
}
