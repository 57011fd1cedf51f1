mod find_repository_root;
mod parse_category;
mod resolve_repository;

pub use find_repository_root::find_repository_root;
pub use parse_category::parse_category;
pub use resolve_repository::resolve_repository;
