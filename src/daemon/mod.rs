//! The node daemon: control server, app catalog, announcements, lifecycle.

pub mod announce;
pub mod catalog;
pub mod counters;
pub mod run;
pub mod server;

pub use announce::{Announcer, Publish};
pub use catalog::Catalog;
pub use run::run_node;
pub use server::{ControlRequest, Node, SignalFlags};
