// src/routes.rs

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{config::AppState, handlers};

/// Monta todas as rotas da API sobre o estado compartilhado.
pub fn router(app_state: AppState) -> Router {
    let tenancy_routes = Router::new()
        .route("/", post(handlers::tenancy::create_root))
        .route(
            "/{id}",
            get(handlers::tenancy::get_tenant).delete(handlers::tenancy::delete_tenant),
        )
        .route("/{id}/branches", post(handlers::tenancy::create_branch))
        .route("/{id}/ancestors", get(handlers::tenancy::get_ancestors))
        .route("/{id}/descendants", get(handlers::tenancy::get_descendants))
        .route("/{id}/root", get(handlers::tenancy::get_root))
        .route("/{id}/parent", put(handlers::tenancy::reparent))
        .route(
            "/{id}/stock/{product_id}",
            get(handlers::inventory::get_aggregate_balance),
        );

    let plan_routes = Router::new()
        .route("/", post(handlers::subscriptions::create_plan))
        .route("/{id}", get(handlers::subscriptions::get_plan));

    let branch_routes = Router::new()
        .route(
            "/{id}/subscriptions",
            post(handlers::subscriptions::subscribe).get(handlers::subscriptions::list_subscriptions),
        )
        .route("/{id}/authorization", get(handlers::subscriptions::get_authorization))
        .route("/{id}/sales", post(handlers::sales::sell))
        .route("/{id}/stock-changes", post(handlers::inventory::stock_change))
        .route("/{id}/stock/{product_id}", get(handlers::inventory::get_balance))
        .route(
            "/{id}/stock/{product_id}/movements",
            get(handlers::inventory::list_movements),
        )
        .route(
            "/{id}/stock/{product_id}/reconcile",
            get(handlers::inventory::reconcile),
        );

    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .nest("/api/tenants", tenancy_routes)
        .nest("/api/plans", plan_routes)
        .nest("/api/branches", branch_routes)
        .route(
            "/api/subscriptions/{id}/cancel",
            post(handlers::subscriptions::cancel_subscription),
        )
        .route("/api/products", post(handlers::inventory::create_product))
        .route("/api/products/{id}", get(handlers::inventory::get_product))
        .route("/api/transfers", post(handlers::inventory::transfer))
        .route(
            "/api/movements/{id}/reverse",
            post(handlers::inventory::reverse_movement),
        )
        .route("/api/sales/{id}", get(handlers::sales::get_sale))
        .with_state(app_state)
}
