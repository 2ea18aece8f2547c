//! Handler decorators and the built-in terminal handlers.

pub mod aggregate;
pub mod exec;
pub mod external;
pub mod log;
pub mod matching;
pub mod post;
pub mod publish;
pub mod tcp;
