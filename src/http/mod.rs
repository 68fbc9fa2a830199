pub mod server;
pub mod handlers;

pub use server::HttpServer;
