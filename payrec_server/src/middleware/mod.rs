mod hmac;
mod operator;

pub use hmac::HmacMiddlewareFactory;
pub use operator::OperatorAuthMiddlewareFactory;
