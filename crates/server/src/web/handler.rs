pub mod admin;
pub mod device;
