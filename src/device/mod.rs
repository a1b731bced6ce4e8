pub mod btle;
pub mod channel;
pub mod constants;
pub mod link;
pub mod scan;
pub mod transport;
pub mod types;
