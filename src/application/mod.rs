pub mod error;
pub mod jobs;
pub mod repos;
pub mod services;

pub use error::AppError;
