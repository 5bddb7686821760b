// Library exports for the herder process supervisor

pub mod cli;
pub mod config;
pub mod error;
pub mod logs;
pub mod process;
