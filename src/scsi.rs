//! Ancillary SCSI command handling: everything besides READ/WRITE, which the
//! [`crate::dispatcher`] routes straight to the [`crate::engine::TaskEngine`].
//!
//! These opcodes (INQUIRY, MODE SENSE, REPORT LUNS, …) sit outside this
//! crate's hard core but are kept here, generalized to the
//! [`crate::device::BlockDevice`] contract, so the crate still answers a
//! real initiator's full command set.

use crate::cdb::Cdb;
use crate::device::BlockDevice;
use crate::sense::{SenseData, SenseException, SenseExceptionKind};
use crate::transport::TransportPort;
use byteorder::{BigEndian, ByteOrder};

/// Ancillary opcodes not modeled as typed [`Cdb`] variants, forwarded as
/// `Cdb::Other { opcode, bytes }`.
mod other_opcode {
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const START_STOP_UNIT: u8 = 0x1B;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const VERIFY_10: u8 = 0x2F;
    pub const SYNCHRONIZE_CACHE_10: u8 = 0x35;
    pub const MODE_SENSE_10: u8 = 0x5A;
    pub const VERIFY_16: u8 = 0x8F;
    pub const SYNCHRONIZE_CACHE_16: u8 = 0x91;
    pub const SERVICE_ACTION_IN_16: u8 = 0x9E;
}

/// Handles every CDB the dispatcher does not recognize as a transfer
/// variant.
pub struct ScsiHandler;

impl ScsiHandler {
    /// Entry point called by [`crate::dispatcher::Dispatcher`] for any
    /// non-transfer CDB: TEST UNIT READY, INQUIRY, REPORT LUNS, and the
    /// raw-byte `Other` opcodes.
    pub fn dispatch_ancillary(
        cdb: &Cdb,
        device: &mut dyn BlockDevice,
        transport: &mut dyn TransportPort,
    ) -> Result<(), SenseException> {
        match cdb {
            Cdb::TestUnitReady => {
                device.block_count()?; // DeviceNotReady if closed, else ready
                Ok(())
            }
            Cdb::Inquiry {
                evpd,
                page_code,
                alloc_len,
            } => Self::handle_inquiry(*evpd, *page_code, *alloc_len, device, transport),
            Cdb::ReportLuns { alloc_len } => Self::handle_report_luns(*alloc_len, transport),
            Cdb::Other { opcode, bytes } => Self::dispatch_other(*opcode, bytes, device, transport),
            _ => Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb)),
        }
    }

    fn dispatch_other(
        opcode: u8,
        bytes: &[u8],
        device: &dyn BlockDevice,
        transport: &mut dyn TransportPort,
    ) -> Result<(), SenseException> {
        use other_opcode::*;
        match opcode {
            READ_CAPACITY_10 => Self::handle_read_capacity_10(device, transport),
            SERVICE_ACTION_IN_16 => Self::handle_read_capacity_16(bytes, device, transport),
            MODE_SENSE_6 => Self::handle_mode_sense_6(bytes, transport),
            MODE_SENSE_10 => Self::handle_mode_sense_10(bytes, transport),
            REQUEST_SENSE => Self::handle_request_sense(bytes, transport),
            SYNCHRONIZE_CACHE_10 | SYNCHRONIZE_CACHE_16 | START_STOP_UNIT | VERIFY_10 | VERIFY_16 => Ok(()),
            _ => Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb)),
        }
    }

    fn push(transport: &mut dyn TransportPort, data: &[u8]) -> Result<(), SenseException> {
        if transport.write_data(data) {
            Ok(())
        } else {
            Err(SenseException::new(SenseExceptionKind::SynchronousDataTransferError))
        }
    }

    fn handle_inquiry(
        evpd: bool,
        page_code: u8,
        alloc_len: u16,
        device: &dyn BlockDevice,
        transport: &mut dyn TransportPort,
    ) -> Result<(), SenseException> {
        if evpd {
            return Self::handle_inquiry_vpd(page_code, alloc_len as usize, transport);
        }

        let mut data = vec![0u8; 36];
        data[0] = 0x00; // direct access block device
        data[2] = 0x05; // SPC-3
        data[3] = 0x12; // response format + hisup
        data[4] = 31; // additional length

        data[8..16].copy_from_slice(b"ISCSI   ");

        let product = device.name().as_bytes();
        for (i, slot) in data[16..32].iter_mut().enumerate() {
            *slot = *product.get(i).unwrap_or(&b' ');
        }
        data[32..36].copy_from_slice(b"1.0 ");

        data.truncate(alloc_len as usize);
        Self::push(transport, &data)
    }

    fn handle_inquiry_vpd(
        page_code: u8,
        alloc_len: usize,
        transport: &mut dyn TransportPort,
    ) -> Result<(), SenseException> {
        let mut data = match page_code {
            0x00 => vec![0x00, 0x00, 0x00, 1, 0x80], // supported VPD pages: just page 0x80
            0x80 => {
                let mut d = vec![0x00, 0x80, 0x00, 18];
                d.extend_from_slice(b"ISCSI000000000001");
                d
            }
            _ => return Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb)),
        };
        data.truncate(alloc_len);
        Self::push(transport, &data)
    }

    fn handle_read_capacity_10(
        device: &dyn BlockDevice,
        transport: &mut dyn TransportPort,
    ) -> Result<(), SenseException> {
        let capacity = device.block_count()?;
        let block_size = device.block_size()?;
        let mut data = vec![0u8; 8];
        let last_lba = capacity.saturating_sub(1);
        let last_lba_32 = u32::try_from(last_lba).unwrap_or(u32::MAX);
        BigEndian::write_u32(&mut data[0..4], last_lba_32);
        BigEndian::write_u32(&mut data[4..8], block_size);
        Self::push(transport, &data)
    }

    /// SERVICE ACTION IN(16) with READ CAPACITY(16) service action (0x10).
    fn handle_read_capacity_16(
        bytes: &[u8],
        device: &dyn BlockDevice,
        transport: &mut dyn TransportPort,
    ) -> Result<(), SenseException> {
        if bytes.len() < 16 || bytes[1] & 0x1F != 0x10 {
            return Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb));
        }
        let alloc_len = BigEndian::read_u32(&bytes[10..14]) as usize;
        let capacity = device.block_count()?;
        let block_size = device.block_size()?;
        let mut data = vec![0u8; 32];
        BigEndian::write_u64(&mut data[0..8], capacity.saturating_sub(1));
        BigEndian::write_u32(&mut data[8..12], block_size);
        data.truncate(alloc_len.min(data.len()));
        Self::push(transport, &data)
    }

    fn handle_mode_sense_6(bytes: &[u8], transport: &mut dyn TransportPort) -> Result<(), SenseException> {
        if bytes.len() < 6 {
            return Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb));
        }
        let alloc_len = bytes[4] as usize;
        let mut data = vec![3u8, 0, 0, 0]; // mode data length, medium type, device-specific, block descriptor length
        data.truncate(alloc_len.min(data.len()));
        Self::push(transport, &data)
    }

    fn handle_mode_sense_10(bytes: &[u8], transport: &mut dyn TransportPort) -> Result<(), SenseException> {
        if bytes.len() < 10 {
            return Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb));
        }
        let alloc_len = BigEndian::read_u16(&bytes[7..9]) as usize;
        let mut data = vec![0u8; 8];
        BigEndian::write_u16(&mut data[0..2], 6);
        data.truncate(alloc_len.min(data.len()));
        Self::push(transport, &data)
    }

    fn handle_request_sense(bytes: &[u8], transport: &mut dyn TransportPort) -> Result<(), SenseException> {
        if bytes.len() < 6 {
            return Err(SenseException::new(SenseExceptionKind::InvalidFieldInCdb));
        }
        let alloc_len = bytes[4] as usize;
        let mut data = SenseData::new(crate::sense::sense_key::NO_SENSE, 0, 0).to_bytes();
        data.truncate(alloc_len.min(data.len()));
        Self::push(transport, &data)
    }

    fn handle_report_luns(alloc_len: u32, transport: &mut dyn TransportPort) -> Result<(), SenseException> {
        let mut data = vec![0u8; 16]; // lun list length (4) + reserved (4) + one 8-byte LUN entry
        BigEndian::write_u32(&mut data[0..4], 8);
        data.truncate((alloc_len as usize).min(data.len()));
        Self::push(transport, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BufferedStore;
    use crate::transport::MockTransport;

    fn open_store() -> BufferedStore {
        let mut s = BufferedStore::new("unit-under-test", 512, 1000);
        s.open().unwrap();
        s
    }

    #[test]
    fn test_unit_ready_on_open_device_succeeds() {
        let mut device = open_store();
        let mut transport = MockTransport::default();
        let cdb = Cdb::decode(&[0x00, 0, 0, 0, 0, 0]).unwrap();
        ScsiHandler::dispatch_ancillary(&cdb, &mut device, &mut transport).unwrap();
    }

    #[test]
    fn test_unit_ready_on_closed_device_fails_not_ready() {
        let mut device = BufferedStore::new("closed", 512, 10);
        let mut transport = MockTransport::default();
        let cdb = Cdb::decode(&[0x00, 0, 0, 0, 0, 0]).unwrap();
        let err = ScsiHandler::dispatch_ancillary(&cdb, &mut device, &mut transport).unwrap_err();
        assert_eq!(err.kind, SenseExceptionKind::DeviceNotReady);
    }

    #[test]
    fn inquiry_returns_standard_page() {
        let mut device = open_store();
        let mut transport = MockTransport::default();
        let cdb = Cdb::decode(&[0x12, 0, 0, 0, 96, 0]).unwrap();
        ScsiHandler::dispatch_ancillary(&cdb, &mut device, &mut transport).unwrap();
        assert_eq!(transport.outbound[0], 0x00);
        assert!(transport.outbound.len() >= 36);
        assert_eq!(&transport.outbound[16..33], b"unit-under-test  ");
    }

    #[test]
    fn inquiry_vpd_unit_serial_number_page() {
        let mut device = open_store();
        let mut transport = MockTransport::default();
        let cdb = Cdb::decode(&[0x12, 0x01, 0x80, 0, 64, 0]).unwrap();
        ScsiHandler::dispatch_ancillary(&cdb, &mut device, &mut transport).unwrap();
        assert_eq!(transport.outbound[1], 0x80);
    }

    #[test]
    fn read_capacity_10_reports_device_geometry() {
        let mut device = open_store();
        let mut transport = MockTransport::default();
        let cdb = Cdb::decode(&[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        ScsiHandler::dispatch_ancillary(&cdb, &mut device, &mut transport).unwrap();
        assert_eq!(BigEndian::read_u32(&transport.outbound[0..4]), 999);
        assert_eq!(BigEndian::read_u32(&transport.outbound[4..8]), 512);
    }

    #[test]
    fn report_luns_lists_one_lun() {
        let mut device = open_store();
        let mut transport = MockTransport::default();
        let cdb = Cdb::decode(&[0xA0, 0, 0, 0, 0, 0, 0, 0, 0, 16, 0, 0]).unwrap();
        ScsiHandler::dispatch_ancillary(&cdb, &mut device, &mut transport).unwrap();
        assert_eq!(transport.outbound.len(), 16);
        assert_eq!(BigEndian::read_u32(&transport.outbound[0..4]), 8);
    }

    #[test]
    fn synchronize_cache_and_start_stop_unit_are_acknowledged() {
        let mut device = open_store();
        let mut transport = MockTransport::default();
        let sync_cdb = Cdb::decode(&[0x35, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        ScsiHandler::dispatch_ancillary(&sync_cdb, &mut device, &mut transport).unwrap();
        let start_stop_cdb = Cdb::decode(&[0x1B, 0, 0, 0, 0x01, 0]).unwrap();
        ScsiHandler::dispatch_ancillary(&start_stop_cdb, &mut device, &mut transport).unwrap();
    }

    #[test]
    fn unsupported_opcode_is_invalid_field_in_cdb() {
        let mut device = open_store();
        let mut transport = MockTransport::default();
        let cdb = Cdb::decode(&[0xFF, 0, 0, 0, 0, 0]).unwrap();
        let err = ScsiHandler::dispatch_ancillary(&cdb, &mut device, &mut transport).unwrap_err();
        assert_eq!(err.kind, SenseExceptionKind::InvalidFieldInCdb);
    }
}
