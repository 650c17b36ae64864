pub mod auth_handlers;
mod server;

pub use server::*;
