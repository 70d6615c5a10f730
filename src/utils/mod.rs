pub mod error;
pub mod logger;
pub mod timeout;
pub mod validation;
