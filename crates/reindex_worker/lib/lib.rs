pub mod build_info;
pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod logging;
