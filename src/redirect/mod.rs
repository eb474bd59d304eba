mod handlers;
mod middleware;
mod routes;

pub use handlers::{pending_visit, CampaignParams, RedirectState};
pub use routes::create_redirect_router;
