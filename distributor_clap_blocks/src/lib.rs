//! Building blocks for the `clap` command line configuration of the distributor node
pub mod bind_addr;
pub mod byte_size;
pub mod tokio;
