pub mod invoices;

use axum::{routing::any, Router};

use crate::AppState;

/// Route table. Both paths accept any method; the handler decides which
/// ones it serves.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", any(invoices::create_invoice))
        .route("/invoices", any(invoices::create_invoice))
}
