pub mod admin;
pub mod handlers;
pub mod routes;
pub mod trace;

pub use handlers::AppState;
pub use routes::create_api_router;
