mod analytics;
mod handlers;
mod routes;

pub use analytics::{build_report, AnalyticsError};
pub use handlers::{generate_short_code, AppState, ErrorResponse};
pub use routes::create_api_router;
