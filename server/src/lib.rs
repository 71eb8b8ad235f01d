pub mod context;
pub mod deposit;
pub mod executor;
pub mod frame;
pub mod games;
pub mod lifecycle;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod room;
pub mod rpc;
pub mod server;
pub mod session;
