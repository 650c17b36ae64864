mod auth_service_impl;
mod token_service_impl;
mod user_directory_fake;
mod user_directory_rpc;

pub use auth_service_impl::*;
pub use token_service_impl::*;
pub use user_directory_fake::*;
pub use user_directory_rpc::*;
