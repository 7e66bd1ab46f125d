pub mod grant;
pub mod transport;
