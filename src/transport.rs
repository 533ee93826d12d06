//! Transport port: the narrow interface tasks use to move bulk data to and
//! from the initiator, and to emit the final response PDU. A real iSCSI PDU
//! layer implements this trait externally to this crate; the core only
//! depends on the trait, never on a concrete wire-protocol implementation.

use crate::sense::SenseData;

/// SCSI status codes (SPC-4 Table 42), the subset this crate emits.
pub mod scsi_status {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
}

/// Abstraction over the iSCSI/SCSI PDU layer moving bulk data between
/// initiator and target. A task calls `read_data`/`write_data` at most once
/// each and `write_response` exactly once.
pub trait TransportPort {
    /// Pull the negotiated byte count from the initiator into `sink`.
    /// Returns `true` on a full, successful pull; `false` on a short or
    /// failed transfer (the caller turns this into
    /// `SynchronousDataTransferError`).
    fn read_data(&mut self, sink: &mut [u8]) -> bool;

    /// Push `source` to the initiator. Same success contract as
    /// `read_data`.
    fn write_data(&mut self, source: &[u8]) -> bool;

    /// Emit the final response PDU. `sense_data` must be `Some` iff `status`
    /// is `CHECK CONDITION`.
    fn write_response(&mut self, status: u8, sense_data: Option<&SenseData>);
}

/// An incoming request: a decoded CDB paired with the transport handle it
/// arrived on and the initiator's task tag. Immutable after acceptance.
pub struct Command<'a> {
    pub cdb: crate::cdb::Cdb,
    pub initiator_task_tag: u32,
    pub transport: &'a mut dyn TransportPort,
}

impl<'a> Command<'a> {
    pub fn new(cdb: crate::cdb::Cdb, initiator_task_tag: u32, transport: &'a mut dyn TransportPort) -> Self {
        Command {
            cdb,
            initiator_task_tag,
            transport,
        }
    }
}

/// An in-memory [`TransportPort`] used by tests: reads come from a fixed
/// buffer, writes land in a growable one, and short transfers can be forced
/// to exercise the `SynchronousDataTransferError` path.
#[derive(Default)]
pub struct MockTransport {
    pub inbound: Vec<u8>,
    pub outbound: Vec<u8>,
    pub last_status: Option<u8>,
    pub last_sense: Option<SenseData>,
    pub fail_read: bool,
    pub fail_write: bool,
}

impl MockTransport {
    pub fn with_inbound(data: Vec<u8>) -> Self {
        MockTransport {
            inbound: data,
            ..Default::default()
        }
    }
}

impl TransportPort for MockTransport {
    fn read_data(&mut self, sink: &mut [u8]) -> bool {
        if self.fail_read || self.inbound.len() < sink.len() {
            return false;
        }
        let (used, rest) = self.inbound.split_at(sink.len());
        sink.copy_from_slice(used);
        self.inbound = rest.to_vec();
        true
    }

    fn write_data(&mut self, source: &[u8]) -> bool {
        if self.fail_write {
            return false;
        }
        self.outbound.extend_from_slice(source);
        true
    }

    fn write_response(&mut self, status: u8, sense_data: Option<&SenseData>) {
        self.last_status = Some(status);
        self.last_sense = sense_data.cloned();
    }
}
