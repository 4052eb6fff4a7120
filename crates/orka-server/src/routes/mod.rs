pub mod agents;
pub mod budgets;
pub mod events;
pub mod federation;
pub mod sessions;
pub mod teams;
pub mod workflows;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(agents::router())
        .merge(teams::router())
        .merge(workflows::router())
        .merge(budgets::router())
        .merge(federation::router())
        .merge(sessions::router())
        .merge(events::router())
}
