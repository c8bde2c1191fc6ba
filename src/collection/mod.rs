mod batch;
mod core;
mod index_admin;
mod modify;
mod ops;

pub use self::core::Collection;
