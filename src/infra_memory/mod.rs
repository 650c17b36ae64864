mod refresh_token_repo_memory;
mod revocation_store_memory;

pub use refresh_token_repo_memory::*;
pub use revocation_store_memory::*;
