pub mod logging;
pub mod transport;

pub use transport::{HttpTransport, RpcTransport};
