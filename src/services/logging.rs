//! Logging service: lets workers log through the node's sink.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::daemon::counters;
use crate::dispatch::{Channel, Reactor};
use crate::logging::{LogSink, Severity};
use crate::protocol::logging::{Emit, Logging};
use crate::protocol::ProtocolError;
use crate::services::Service;

pub struct LoggingService {
    name: String,
    reactor: Reactor<Logging>,
    sources: Arc<Mutex<BTreeSet<String>>>,
}

impl LoggingService {
    pub fn new(name: &str, sink: Arc<dyn LogSink>) -> Self {
        let sources = Arc::new(Mutex::new(BTreeSet::new()));
        let mut reactor = Reactor::new();

        let seen = sources.clone();
        reactor.on::<Emit, _>(move |(level, source, message): (i32, String, String)| {
            let severity = Severity::from_wire(level);
            if severity == Severity::Ignore {
                return false;
            }
            {
                let mut seen = seen.lock().expect("logging sources lock poisoned");
                // One live log per distinct source, like any other logger.
                if seen.insert(source.clone()) {
                    counters::logger_created();
                }
            }
            sink.emit(severity, &source, &message);
            true
        });

        Self {
            name: name.to_string(),
            reactor,
            sources,
        }
    }
}

impl Service for LoggingService {
    fn name(&self) -> &str {
        &self.name
    }

    fn serve(&mut self, channel: &mut dyn Channel) -> Result<(), ProtocolError> {
        self.reactor.serve(channel)
    }
}

impl Drop for LoggingService {
    fn drop(&mut self) {
        let sources = self.sources.lock().expect("logging sources lock poisoned");
        for _ in sources.iter() {
            counters::logger_dropped();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::{unpack_value, ArgTuple};
    use crate::protocol::Message;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<(Severity, String, String)>>,
    }

    impl LogSink for RecordingSink {
        fn emit(&self, severity: Severity, source: &str, message: &str) {
            self.records
                .lock()
                .unwrap()
                .push((severity, source.to_string(), message.to_string()));
        }
    }

    #[derive(Default)]
    struct ScriptedChannel {
        inbound: VecDeque<(u32, Vec<u8>)>,
        outbound: Vec<(u32, Vec<u8>)>,
    }

    impl Channel for ScriptedChannel {
        fn recv(&mut self) -> Result<Option<(u32, Vec<u8>)>, ProtocolError> {
            Ok(self.inbound.pop_front())
        }

        fn send(&mut self, opcode: u32, payload: &[u8]) -> Result<(), ProtocolError> {
            self.outbound.push((opcode, payload.to_vec()));
            Ok(())
        }
    }

    fn emit_frame(level: i32, source: &str, message: &str) -> (u32, Vec<u8>) {
        let mut buf = Vec::new();
        (level, source.to_string(), message.to_string())
            .pack(&mut buf)
            .unwrap();
        (Emit::OPCODE, buf)
    }

    #[test]
    fn emit_forwards_to_the_sink_and_acks() {
        let _guard = counters::serialize_tests();
        let sink = Arc::new(RecordingSink::default());
        let mut service = LoggingService::new("logging", sink.clone());

        let mut channel = ScriptedChannel::default();
        channel.inbound.push_back(emit_frame(3, "app/echo", "ready"));
        channel.inbound.push_back(emit_frame(1, "app/echo", "crashed"));

        service.serve(&mut channel).unwrap();

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (Severity::Info, "app/echo".into(), "ready".into()));
        assert_eq!(records[1].0, Severity::Error);

        assert_eq!(channel.outbound.len(), 2);
        assert!(unpack_value::<bool>(&channel.outbound[0].1).unwrap());
    }

    #[test]
    fn ignored_levels_are_refused() {
        let sink = Arc::new(RecordingSink::default());
        let mut service = LoggingService::new("logging", sink.clone());

        let mut channel = ScriptedChannel::default();
        channel.inbound.push_back(emit_frame(0, "app/echo", "noise"));

        service.serve(&mut channel).unwrap();
        assert!(sink.records.lock().unwrap().is_empty());
        assert!(!unpack_value::<bool>(&channel.outbound[0].1).unwrap());
    }

    #[test]
    fn distinct_sources_are_counted_once() {
        let _guard = counters::serialize_tests();
        let before = counters::snapshot().loggers_alive;
        let sink = Arc::new(RecordingSink::default());
        let mut service = LoggingService::new("logging", sink);

        let mut channel = ScriptedChannel::default();
        channel.inbound.push_back(emit_frame(3, "app/a", "x"));
        channel.inbound.push_back(emit_frame(3, "app/a", "y"));
        channel.inbound.push_back(emit_frame(3, "app/b", "z"));
        service.serve(&mut channel).unwrap();

        assert_eq!(counters::snapshot().loggers_alive, before + 2);
        drop(service);
        assert_eq!(counters::snapshot().loggers_alive, before);
    }
}
