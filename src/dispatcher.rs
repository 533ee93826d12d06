//! Maps an incoming [`Command`] to a task and drives it to completion.
//!
//! One task per command; tasks share nothing but the backing store. SCSI
//! task-attribute ordering (SIMPLE/ORDERED/HEAD-OF-QUEUE) is a higher
//! layer's concern — the dispatcher here assumes it is already being invoked
//! in the right order and just runs the task body sequentially: range
//! check, transfer, respond.

use crate::cdb::Cdb;
use crate::device::BlockDevice;
use crate::scsi::ScsiHandler;
use crate::sense::SenseException;
use crate::engine::TaskEngine;
use crate::transport::{scsi_status, Command};

/// Lifecycle of a single dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Dispatches one [`Command`] against a backing [`BlockDevice`], running the
/// resulting task to completion and writing the final response through the
/// command's transport. Never lets a `SenseException` escape: every fault is
/// turned into a CHECK CONDITION response here — no exception escapes the
/// core to the transport adapter.
pub struct Dispatcher;

impl Dispatcher {
    pub fn dispatch(command: &mut Command, device: &mut dyn BlockDevice) -> TaskState {
        let mut state = TaskState::Running;

        let fields = command.cdb.as_transfer().copied();
        let is_write = command.cdb.is_write();
        let outcome = match fields {
            Some(f) if is_write => TaskEngine::execute_write(device, &f, &mut *command.transport),
            Some(f) => TaskEngine::execute_read(device, &f, &mut *command.transport),
            None => ScsiHandler::dispatch_ancillary(&command.cdb, device, &mut *command.transport),
        };

        Self::respond(command, outcome, &mut state)
    }

    fn respond(
        command: &mut Command,
        outcome: Result<(), SenseException>,
        state: &mut TaskState,
    ) -> TaskState {
        match outcome {
            Ok(()) => {
                command.transport.write_response(scsi_status::GOOD, None);
                *state = TaskState::Completed;
            }
            Err(exception) => {
                log::warn!(
                    "task {} failed: {exception}",
                    command.initiator_task_tag
                );
                let sense = exception.to_sense_data();
                command
                    .transport
                    .write_response(scsi_status::CHECK_CONDITION, Some(&sense));
                *state = TaskState::Failed;
            }
        }
        *state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdb::Cdb;
    use crate::engine::BufferedStore;
    use crate::transport::MockTransport;

    fn open_store() -> BufferedStore {
        let mut s = BufferedStore::new("d", 512, 1024);
        s.open().unwrap();
        s
    }

    #[test]
    fn dispatch_write10_then_read10_round_trips() {
        let mut store = open_store();
        let mut write_transport = MockTransport::with_inbound(vec![0x5A; 512]);
        let write_cdb = Cdb::decode(&[0x2A, 0, 0, 0, 0, 16, 0, 0, 1, 0]).unwrap();
        let mut write_cmd = Command::new(write_cdb, 1, &mut write_transport);
        let state = Dispatcher::dispatch(&mut write_cmd, &mut store);
        assert_eq!(state, TaskState::Completed);
        assert_eq!(write_transport.last_status, Some(scsi_status::GOOD));

        let mut read_transport = MockTransport::default();
        let read_cdb = Cdb::decode(&[0x28, 0, 0, 0, 0, 16, 0, 0, 1, 0]).unwrap();
        let mut read_cmd = Command::new(read_cdb, 2, &mut read_transport);
        let state = Dispatcher::dispatch(&mut read_cmd, &mut store);
        assert_eq!(state, TaskState::Completed);
        assert_eq!(read_transport.outbound, vec![0x5A; 512]);
    }

    #[test]
    fn dispatch_out_of_range_write_is_check_condition() {
        let mut store = open_store();
        let mut transport = MockTransport::with_inbound(vec![0u8; 10 * 512]);
        let cdb = Cdb::decode(&[0x2A, 0, 0, 0, 0x03, 0xFC, 0, 0, 10, 0]).unwrap(); // lba=1020
        let mut cmd = Command::new(cdb, 3, &mut transport);
        let state = Dispatcher::dispatch(&mut cmd, &mut store);
        assert_eq!(state, TaskState::Failed);
        assert_eq!(transport.last_status, Some(scsi_status::CHECK_CONDITION));
        assert!(transport.last_sense.is_some());
        let sense = transport.last_sense.unwrap();
        assert_eq!(sense.sense_key, crate::sense::sense_key::ILLEGAL_REQUEST);
        assert_eq!(sense.asc, 0x21);
    }
}
