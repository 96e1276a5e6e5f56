pub mod channel_routes;
pub mod check_routes;
pub mod ping_routes;
