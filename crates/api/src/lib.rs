pub mod app;
pub mod context;
pub mod middleware;
pub mod session;
