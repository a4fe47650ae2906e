pub mod discovery;
pub mod http;
