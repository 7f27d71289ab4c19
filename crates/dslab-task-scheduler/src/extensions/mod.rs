pub mod energy_meter;
pub mod power_model;
pub mod static_cluster;
pub mod workload;
