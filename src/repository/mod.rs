pub mod endpoint;

pub use endpoint::{keys, EndpointStore, FileEndpointStore, MemoryEndpointStore};
