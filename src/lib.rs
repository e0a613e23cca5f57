pub mod device_monitor_proto {
    tonic::include_proto!("device_monitor");
}

pub mod config;
pub mod db;
pub mod logging;
pub mod monitor;
pub mod services;
pub mod simulator;
pub mod version;
pub mod web;
pub mod worker;
