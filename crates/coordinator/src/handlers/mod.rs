//! Tool handlers, one module per surface. Each is a thin layer:
//! decode arguments, call into the domain crate, render the reply.

pub mod admin;
pub mod context;
pub mod message;
pub mod pipeline;
pub mod session;
pub mod task;
pub mod team;
pub mod wake;
pub mod worker;
