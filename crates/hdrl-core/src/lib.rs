pub mod collapse;
pub mod config;
pub mod consts;
pub mod error;
pub mod image;
pub mod imagelist;
pub mod io;
pub mod iter;
pub mod pool;
pub mod view;
