//! Service capability: reactor-based components bound to a protocol.

pub mod logging;

pub use logging::LoggingService;

use crate::dispatch::Channel;
use crate::protocol::ProtocolError;
use crate::registry::Category;

/// A named component serving one protocol on channels handed to it.
pub trait Service: Send {
    fn name(&self) -> &str;

    /// Drain one channel until its peer goes away.
    fn serve(&mut self, channel: &mut dyn Channel) -> Result<(), ProtocolError>;
}

/// Registry tag for service types.
pub struct ServiceTag;

impl Category for ServiceTag {
    type Instance = dyn Service;
    const NAME: &'static str = "service";
}
