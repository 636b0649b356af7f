pub mod attributes;
pub mod drain;
pub mod local_store;
pub mod multipart;
pub mod pool;
pub mod tokens;
pub mod uploader;
