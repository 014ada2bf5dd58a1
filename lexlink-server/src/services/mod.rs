pub mod fallback;
pub mod relay;
pub mod sse;
pub mod store;
pub mod upstream;
