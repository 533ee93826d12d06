//! The buffered task engine: an in-memory backing store plus the READ/WRITE
//! execution contract (range-check, transfer, respond).
//!
//! Range checking lives here, not in the backing store, so the same check
//! (and the same CDB-form-sensitive field pointer) applies whether the
//! device underneath is a plain [`BufferedStore`] or a [`crate::striped::StripedDevice`].

use crate::cdb::TransferFields;
use crate::device::{not_ready, BlockDevice, DeviceState};
use crate::sense::{FieldPointer, SenseException, SenseExceptionKind};
use crate::transport::TransportPort;
use std::sync::RwLock;

/// A byte-addressable in-memory block device. The backing `Vec<u8>` is
/// shared by all concurrent tasks; each read/write computes its own
/// `(offset, length)` pair rather than retaining a cursor, so overlapping
/// concurrent access never corrupts bookkeeping.
pub struct BufferedStore {
    name: String,
    block_size: u32,
    block_count: u64,
    state: DeviceState,
    data: RwLock<Vec<u8>>,
}

impl BufferedStore {
    pub fn new(name: impl Into<String>, block_size: u32, block_count: u64) -> Self {
        BufferedStore {
            name: name.into(),
            block_size,
            block_count,
            state: DeviceState::Closed,
            data: RwLock::new(Vec::new()),
        }
    }

    fn require_open(&self) -> Result<(), SenseException> {
        if self.state == DeviceState::Open {
            Ok(())
        } else {
            Err(not_ready())
        }
    }

    fn require_block_aligned(&self, len: usize) -> Result<(), SenseException> {
        if len as u64 % self.block_size as u64 == 0 {
            Ok(())
        } else {
            Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb))
        }
    }
}

impl BlockDevice for BufferedStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), SenseException> {
        if self.state == DeviceState::Open {
            return Err(not_ready());
        }
        *self.data.write().expect("store lock poisoned") =
            vec![0u8; self.block_count as usize * self.block_size as usize];
        self.state = DeviceState::Open;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SenseException> {
        self.require_open()?;
        self.state = DeviceState::Closed;
        self.data.write().expect("store lock poisoned").clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state == DeviceState::Open
    }

    fn block_size(&self) -> Result<u32, SenseException> {
        self.require_open()?;
        Ok(self.block_size)
    }

    fn block_count(&self) -> Result<u64, SenseException> {
        self.require_open()?;
        Ok(self.block_count)
    }

    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<(), SenseException> {
        self.require_open()?;
        self.require_block_aligned(buffer.len())?;
        let offset = address as usize * self.block_size as usize;
        let store = self.data.read().expect("store lock poisoned");
        let end = offset
            .checked_add(buffer.len())
            .filter(|&end| end <= store.len())
            .ok_or_else(|| SenseException::new(SenseExceptionKind::LogicalBlockAddressOutOfRange))?;
        buffer.copy_from_slice(&store[offset..end]);
        Ok(())
    }

    fn write(&mut self, address: u64, buffer: &[u8]) -> Result<(), SenseException> {
        self.require_open()?;
        self.require_block_aligned(buffer.len())?;
        let offset = address as usize * self.block_size as usize;
        let mut store = self.data.write().expect("store lock poisoned");
        let end = offset
            .checked_add(buffer.len())
            .filter(|&end| end <= store.len())
            .ok_or_else(|| SenseException::new(SenseExceptionKind::LogicalBlockAddressOutOfRange))?;
        store[offset..end].copy_from_slice(buffer);
        Ok(())
    }
}

/// Executes a single READ or WRITE task against a backing [`BlockDevice`]
/// and a [`TransportPort`]. Stateless: every call is self-contained,
/// matching "one command, one task, one response".
pub struct TaskEngine;

impl TaskEngine {
    /// Range-check `fields` against `capacity`, failing with
    /// `LogicalBlockAddressOutOfRange` and the CDB-form-appropriate field
    /// pointer.
    fn range_check(fields: &TransferFields, capacity: u64) -> Result<(), SenseException> {
        let end = fields
            .logical_block_address
            .checked_add(fields.transfer_length);
        let in_range = matches!(end, Some(end) if fields.logical_block_address <= capacity && end <= capacity);
        if in_range {
            Ok(())
        } else {
            Err(
                SenseException::new(SenseExceptionKind::LogicalBlockAddressOutOfRange)
                    .with_field_pointer(fields.form.range_check_field_pointer())
                    .with_information(fields.logical_block_address.min(u32::MAX as u64) as u32),
            )
        }
    }

    fn transfer_error() -> SenseException {
        SenseException::new(SenseExceptionKind::SynchronousDataTransferError)
    }

    /// Execute a READ: range-check, then push bytes from the device to the
    /// transport port. A zero-length transfer completes with no data phase.
    pub fn execute_read(
        device: &dyn BlockDevice,
        fields: &TransferFields,
        transport: &mut dyn TransportPort,
    ) -> Result<(), SenseException> {
        let block_size = device.block_size()?;
        let capacity = device.block_count()?;
        Self::range_check(fields, capacity)?;
        if fields.transfer_length == 0 {
            return Ok(());
        }

        let mut buffer = vec![0u8; fields.transfer_length as usize * block_size as usize];
        device.read(fields.logical_block_address, &mut buffer)?;
        if !transport.write_data(&buffer) {
            return Err(Self::transfer_error());
        }
        Ok(())
    }

    /// Execute a WRITE: range-check, then pull bytes from the transport
    /// port into the device. A zero-length transfer completes with no data
    /// phase and leaves the store untouched.
    pub fn execute_write(
        device: &mut dyn BlockDevice,
        fields: &TransferFields,
        transport: &mut dyn TransportPort,
    ) -> Result<(), SenseException> {
        let block_size = device.block_size()?;
        let capacity = device.block_count()?;
        Self::range_check(fields, capacity)?;
        if fields.transfer_length == 0 {
            return Ok(());
        }

        let mut buffer = vec![0u8; fields.transfer_length as usize * block_size as usize];
        if !transport.read_data(&mut buffer) {
            return Err(Self::transfer_error());
        }
        device.write(fields.logical_block_address, &buffer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdb::CdbForm;
    use crate::transport::MockTransport;

    fn open_store(block_size: u32, block_count: u64) -> BufferedStore {
        let mut store = BufferedStore::new("test", block_size, block_count);
        store.open().unwrap();
        store
    }

    fn fields(lba: u64, len: u64, form: CdbForm) -> TransferFields {
        TransferFields {
            operation_code: 0,
            logical_block_address: lba,
            transfer_length: len,
            linked: false,
            normal_aca: false,
            form,
        }
    }

    #[test]
    fn write6_one_block_in_range() {
        let mut store = open_store(512, 1024);
        let mut transport = MockTransport::with_inbound(vec![0xAB; 512]);
        let f = fields(16, 1, CdbForm::Six);
        TaskEngine::execute_write(&mut store, &f, &mut transport).unwrap();
        let mut out = vec![0u8; 512];
        store.read(16, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn write10_out_of_range_reports_byte_two() {
        let mut store = open_store(512, 1024);
        let mut transport = MockTransport::with_inbound(vec![0u8; 10 * 512]);
        let f = fields(1020, 10, CdbForm::Ten);
        let err = TaskEngine::execute_write(&mut store, &f, &mut transport).unwrap_err();
        assert_eq!(err.kind, SenseExceptionKind::LogicalBlockAddressOutOfRange);
        assert_eq!(err.field_pointer, Some(FieldPointer::byte(2)));
        assert!(transport.outbound.is_empty());
    }

    #[test]
    fn range_check_failure_transfers_no_bytes() {
        let mut store = open_store(512, 10);
        let mut transport = MockTransport::with_inbound(vec![0xFF; 512 * 20]);
        let f = fields(5, 20, CdbForm::Ten);
        TaskEngine::execute_write(&mut store, &f, &mut transport).unwrap_err();
        let mut out = vec![0u8; 512];
        store.read(5, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn short_pull_is_synchronous_data_transfer_error_and_store_unchanged() {
        let mut store = open_store(512, 1024);
        let mut transport = MockTransport::with_inbound(vec![0xCC; 512]);
        transport.fail_read = true;
        let f = fields(0, 1, CdbForm::Ten);
        let err = TaskEngine::execute_write(&mut store, &f, &mut transport).unwrap_err();
        assert_eq!(err.kind, SenseExceptionKind::SynchronousDataTransferError);
        let mut out = vec![0u8; 512];
        store.read(0, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_length_transfer_completes_without_touching_store() {
        let mut store = open_store(512, 1024);
        let mut transport = MockTransport::default();
        let f = fields(0, 0, CdbForm::Ten);
        TaskEngine::execute_write(&mut store, &f, &mut transport).unwrap();
        TaskEngine::execute_read(&store, &f, &mut transport).unwrap();
        assert!(transport.outbound.is_empty());
    }

    #[test]
    fn read_is_symmetric_with_write() {
        let mut store = open_store(512, 1024);
        let mut write_transport = MockTransport::with_inbound(vec![0x42; 1024]);
        let f = fields(10, 2, CdbForm::Ten);
        TaskEngine::execute_write(&mut store, &f, &mut write_transport).unwrap();

        let mut read_transport = MockTransport::default();
        TaskEngine::execute_read(&store, &f, &mut read_transport).unwrap();
        assert_eq!(read_transport.outbound, vec![0x42; 1024]);
    }

    #[test]
    fn closed_device_fails_device_not_ready() {
        let store = BufferedStore::new("test", 512, 10);
        let f = fields(0, 1, CdbForm::Ten);
        let mut transport = MockTransport::default();
        let err = TaskEngine::execute_read(&store, &f, &mut transport).unwrap_err();
        assert_eq!(err.kind, SenseExceptionKind::DeviceNotReady);
    }

    #[test]
    fn double_open_fails() {
        let mut store = BufferedStore::new("test", 512, 10);
        store.open().unwrap();
        assert!(store.open().is_err());
    }

    #[test]
    fn close_without_open_fails() {
        let mut store = BufferedStore::new("test", 512, 10);
        assert!(store.close().is_err());
    }
}
