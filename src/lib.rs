pub mod calc;
pub mod config;
pub mod dom;
pub mod fetch;
pub mod layout;
pub mod links;
pub mod preview;
pub mod resolve;
pub mod server;
pub mod session;
#[doc(hidden)]
pub mod test_support;
