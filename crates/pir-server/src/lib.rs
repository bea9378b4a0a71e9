//! PIR Server - answers oblivious requests for both protocol variants

pub mod responder;

pub use responder::Responder;
