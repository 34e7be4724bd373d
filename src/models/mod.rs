pub mod did;
pub mod progress;
pub mod registration;
