pub mod classify;
pub mod envelope;

pub use classify::{decode_request, ProxyRequest, Variant};
pub use envelope::encode;
