pub mod collapse;
pub mod config;
pub mod info;
