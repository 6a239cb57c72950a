//! Service lifecycle: assembly, startup and ordered shutdown.

mod app;
mod assembler;
mod shutdown;

pub use app::Application;
pub use assembler::ServiceGraph;
pub use shutdown::{
    shutdown_signal, ListenerControl, PoolTeardown, ShutdownOrchestrator, ShutdownPhase,
    ShutdownReport,
};
