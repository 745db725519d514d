mod model;
mod repository;

pub use model::{AccountDB, DeletedTokenDB, ServerDB};
pub use repository::AccountRepository;
