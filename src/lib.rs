pub mod error;
pub mod kv;
pub mod probe;
pub mod protocol;
pub mod settings;
pub mod supervisor;
pub mod transcode;
pub mod transport;
pub mod worker;
