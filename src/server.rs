use axum::{extract::Request, middleware::Next, response::Response, routing::get, Router};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::routes;
use crate::routes::rag::UserId;
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public_routes = Router::new().route("/health", get(routes::health::health_check));

    let core_routes = routes::rag::core_routes().layer(axum::middleware::from_fn(inject_user_id));

    public_routes
        .merge(core_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

/// Inserts the caller's identity as `Extension<UserId>` for downstream
/// handlers. Authenticating that identity is out of scope here — the caller
/// is trusted to already have been authenticated upstream of this process —
/// so this only reads the `x-user-id` header the caller presents, defaulting
/// to a single fixed identity when absent.
async fn inject_user_id(mut req: Request, next: Next) -> Response {
    let owner_id = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("default")
        .to_string();
    req.extensions_mut().insert(UserId(owner_id));
    next.run(req).await
}
