pub mod index;
pub mod rag;
pub mod summary;
