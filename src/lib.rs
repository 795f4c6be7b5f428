pub mod api;
pub mod arg_parser;
pub mod cli;
pub mod config;
pub mod controller;
pub mod device_record;
pub mod dispatcher;
pub mod errors;
pub mod gateway;
pub mod inventory;
pub mod logger;
pub mod power_limit;
