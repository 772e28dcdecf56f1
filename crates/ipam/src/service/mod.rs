//! IPAM service layer

mod manager;

pub use manager::IpamManager;
