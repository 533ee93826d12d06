//! SCSI Command Descriptor Block codec
//!
//! Decodes the wire bytes of a CDB (as handed over by the transport's SCSI
//! Command PDU parsing) into a tagged [`Cdb`], and encodes one back. The
//! codec is total: a malformed CDB decodes to `Err(SenseException)` carrying
//! `InvalidFieldInCdb` and a field pointer at the offending byte, it never
//! panics.

use crate::sense::{FieldPointer, SenseException, SenseExceptionKind};
use byteorder::{BigEndian, ByteOrder};

pub const OP_READ6: u8 = 0x08;
pub const OP_WRITE6: u8 = 0x0A;
pub const OP_INQUIRY: u8 = 0x12;
pub const OP_READ10: u8 = 0x28;
pub const OP_WRITE10: u8 = 0x2A;
pub const OP_REPORT_LUNS: u8 = 0xA0;
pub const OP_READ12: u8 = 0xA8;
pub const OP_WRITE12: u8 = 0xAA;
pub const OP_READ16: u8 = 0x88;
pub const OP_WRITE16: u8 = 0x8A;
pub const OP_TEST_UNIT_READY: u8 = 0x00;

/// Which of the four transfer CDB byte layouts produced a [`TransferFields`].
/// Carried so sense reporting can pick the WRITE6-specific field pointer
/// form a range-check failure should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdbForm {
    Six,
    Ten,
    Twelve,
    Sixteen,
}

impl CdbForm {
    /// The field pointer a range-check failure should report for this form:
    /// 6-byte forms point at the LBA bit field in byte 1, the others at byte
    /// 2.
    pub fn range_check_field_pointer(&self) -> FieldPointer {
        match self {
            CdbForm::Six => FieldPointer::bit(1, 4),
            CdbForm::Ten | CdbForm::Twelve | CdbForm::Sixteen => FieldPointer::byte(2),
        }
    }
}

/// The fields every transfer (READ/WRITE) CDB carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFields {
    pub operation_code: u8,
    pub logical_block_address: u64,
    pub transfer_length: u64,
    pub linked: bool,
    pub normal_aca: bool,
    pub form: CdbForm,
}

/// Uniform accessors over any transfer CDB, implemented by [`TransferFields`].
pub trait TransferCdb {
    fn operation_code(&self) -> u8;
    fn logical_block_address(&self) -> u64;
    fn transfer_length(&self) -> u64;
    fn form(&self) -> CdbForm;
}

impl TransferCdb for TransferFields {
    fn operation_code(&self) -> u8 {
        self.operation_code
    }

    fn logical_block_address(&self) -> u64 {
        self.logical_block_address
    }

    fn transfer_length(&self) -> u64 {
        self.transfer_length
    }

    fn form(&self) -> CdbForm {
        self.form
    }
}

/// A decoded Command Descriptor Block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cdb {
    TestUnitReady,
    Inquiry {
        evpd: bool,
        page_code: u8,
        alloc_len: u16,
    },
    ReportLuns {
        alloc_len: u32,
    },
    Read6(TransferFields),
    Write6(TransferFields),
    Read10(TransferFields),
    Write10(TransferFields),
    Read12(TransferFields),
    Write12(TransferFields),
    Read16(TransferFields),
    Write16(TransferFields),
    /// Any opcode this codec does not model as a typed variant. Carries the
    /// raw bytes so callers that only need the opcode (e.g. MODE SENSE,
    /// REQUEST SENSE, handled in [`crate::scsi`]) can still dispatch on it.
    Other { opcode: u8, bytes: Vec<u8> },
}

impl Cdb {
    /// `true` for any of the eight transfer (READ/WRITE) variants.
    pub fn as_transfer(&self) -> Option<&TransferFields> {
        match self {
            Cdb::Read6(f)
            | Cdb::Write6(f)
            | Cdb::Read10(f)
            | Cdb::Write10(f)
            | Cdb::Read12(f)
            | Cdb::Write12(f)
            | Cdb::Read16(f)
            | Cdb::Write16(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Cdb::Write6(_) | Cdb::Write10(_) | Cdb::Write12(_) | Cdb::Write16(_)
        )
    }

    pub fn operation_code(&self) -> u8 {
        match self {
            Cdb::TestUnitReady => OP_TEST_UNIT_READY,
            Cdb::Inquiry { .. } => OP_INQUIRY,
            Cdb::ReportLuns { .. } => OP_REPORT_LUNS,
            Cdb::Other { opcode, .. } => *opcode,
            _ => self.as_transfer().expect("all variants covered above").operation_code,
        }
    }

    /// Decode a CDB from its wire bytes. Total: never panics, fails closed
    /// with `InvalidFieldInCdb` on truncated input.
    pub fn decode(bytes: &[u8]) -> Result<Cdb, SenseException> {
        let opcode = *bytes.first().ok_or_else(|| {
            SenseException::new(SenseExceptionKind::InvalidFieldInCdb)
                .with_field_pointer(FieldPointer::byte(0))
        })?;

        match opcode {
            OP_TEST_UNIT_READY => Ok(Cdb::TestUnitReady),
            OP_INQUIRY => decode_inquiry(bytes),
            OP_REPORT_LUNS => decode_report_luns(bytes),
            OP_READ6 => decode_transfer6(bytes, Cdb::Read6),
            OP_WRITE6 => decode_transfer6(bytes, Cdb::Write6),
            OP_READ10 => decode_transfer10(bytes, Cdb::Read10),
            OP_WRITE10 => decode_transfer10(bytes, Cdb::Write10),
            OP_READ12 => decode_transfer12(bytes, Cdb::Read12),
            OP_WRITE12 => decode_transfer12(bytes, Cdb::Write12),
            OP_READ16 => decode_transfer16(bytes, Cdb::Read16),
            OP_WRITE16 => decode_transfer16(bytes, Cdb::Write16),
            other => Ok(Cdb::Other {
                opcode: other,
                bytes: bytes.to_vec(),
            }),
        }
    }

    /// Encode back to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Cdb::TestUnitReady => vec![OP_TEST_UNIT_READY, 0, 0, 0, 0, 0],
            Cdb::Inquiry {
                evpd,
                page_code,
                alloc_len,
            } => {
                let mut b = vec![OP_INQUIRY, if *evpd { 0x01 } else { 0x00 }, *page_code, 0, 0, 0];
                BigEndian::write_u16(&mut b[3..5], *alloc_len);
                b
            }
            Cdb::ReportLuns { alloc_len } => {
                let mut b = vec![0u8; 12];
                b[0] = OP_REPORT_LUNS;
                BigEndian::write_u32(&mut b[6..10], *alloc_len);
                b
            }
            Cdb::Read6(f) | Cdb::Write6(f) => encode_transfer6(f),
            Cdb::Read10(f) | Cdb::Write10(f) => encode_transfer10(f),
            Cdb::Read12(f) | Cdb::Write12(f) => encode_transfer12(f),
            Cdb::Read16(f) | Cdb::Write16(f) => encode_transfer16(f),
            Cdb::Other { bytes, .. } => bytes.clone(),
        }
    }
}

fn control_byte(linked: bool, normal_aca: bool) -> u8 {
    (linked as u8) | ((normal_aca as u8) << 2)
}

fn decode_inquiry(bytes: &[u8]) -> Result<Cdb, SenseException> {
    if bytes.len() < 6 {
        return Err(short_cdb(bytes.len()));
    }
    Ok(Cdb::Inquiry {
        evpd: bytes[1] & 0x01 != 0,
        page_code: bytes[2],
        alloc_len: BigEndian::read_u16(&bytes[3..5]),
    })
}

fn decode_report_luns(bytes: &[u8]) -> Result<Cdb, SenseException> {
    if bytes.len() < 12 {
        return Err(short_cdb(bytes.len()));
    }
    Ok(Cdb::ReportLuns {
        alloc_len: BigEndian::read_u32(&bytes[6..10]),
    })
}

fn short_cdb(len: usize) -> SenseException {
    SenseException::new(SenseExceptionKind::InvalidFieldInCdb)
        .with_field_pointer(FieldPointer::byte(len as u8))
}

fn decode_transfer6(bytes: &[u8], build: fn(TransferFields) -> Cdb) -> Result<Cdb, SenseException> {
    if bytes.len() < 6 {
        return Err(short_cdb(bytes.len()));
    }
    let lba = (((bytes[1] & 0x1F) as u64) << 16) | ((bytes[2] as u64) << 8) | (bytes[3] as u64);
    let raw_len = bytes[4];
    let transfer_length = if raw_len == 0 { 256 } else { raw_len as u64 };
    Ok(build(TransferFields {
        operation_code: bytes[0],
        logical_block_address: lba,
        transfer_length,
        linked: bytes[5] & 0x01 != 0,
        normal_aca: bytes[5] & 0x04 != 0,
        form: CdbForm::Six,
    }))
}

fn encode_transfer6(f: &TransferFields) -> Vec<u8> {
    let mut b = vec![0u8; 6];
    b[0] = f.operation_code;
    b[1] = ((f.logical_block_address >> 16) & 0x1F) as u8;
    b[2] = ((f.logical_block_address >> 8) & 0xFF) as u8;
    b[3] = (f.logical_block_address & 0xFF) as u8;
    b[4] = if f.transfer_length == 256 {
        0
    } else {
        f.transfer_length as u8
    };
    b[5] = control_byte(f.linked, f.normal_aca);
    b
}

fn decode_transfer10(bytes: &[u8], build: fn(TransferFields) -> Cdb) -> Result<Cdb, SenseException> {
    if bytes.len() < 10 {
        return Err(short_cdb(bytes.len()));
    }
    Ok(build(TransferFields {
        operation_code: bytes[0],
        logical_block_address: BigEndian::read_u32(&bytes[2..6]) as u64,
        transfer_length: BigEndian::read_u16(&bytes[7..9]) as u64,
        linked: bytes[9] & 0x01 != 0,
        normal_aca: bytes[9] & 0x04 != 0,
        form: CdbForm::Ten,
    }))
}

fn encode_transfer10(f: &TransferFields) -> Vec<u8> {
    let mut b = vec![0u8; 10];
    b[0] = f.operation_code;
    BigEndian::write_u32(&mut b[2..6], f.logical_block_address as u32);
    BigEndian::write_u16(&mut b[7..9], f.transfer_length as u16);
    b[9] = control_byte(f.linked, f.normal_aca);
    b
}

fn decode_transfer12(bytes: &[u8], build: fn(TransferFields) -> Cdb) -> Result<Cdb, SenseException> {
    if bytes.len() < 12 {
        return Err(short_cdb(bytes.len()));
    }
    Ok(build(TransferFields {
        operation_code: bytes[0],
        logical_block_address: BigEndian::read_u32(&bytes[2..6]) as u64,
        transfer_length: BigEndian::read_u32(&bytes[6..10]) as u64,
        linked: bytes[11] & 0x01 != 0,
        normal_aca: bytes[11] & 0x04 != 0,
        form: CdbForm::Twelve,
    }))
}

fn encode_transfer12(f: &TransferFields) -> Vec<u8> {
    let mut b = vec![0u8; 12];
    b[0] = f.operation_code;
    BigEndian::write_u32(&mut b[2..6], f.logical_block_address as u32);
    BigEndian::write_u32(&mut b[6..10], f.transfer_length as u32);
    b[11] = control_byte(f.linked, f.normal_aca);
    b
}

fn decode_transfer16(bytes: &[u8], build: fn(TransferFields) -> Cdb) -> Result<Cdb, SenseException> {
    if bytes.len() < 16 {
        return Err(short_cdb(bytes.len()));
    }
    Ok(build(TransferFields {
        operation_code: bytes[0],
        logical_block_address: BigEndian::read_u64(&bytes[2..10]),
        transfer_length: BigEndian::read_u32(&bytes[10..14]) as u64,
        linked: bytes[15] & 0x01 != 0,
        normal_aca: bytes[15] & 0x04 != 0,
        form: CdbForm::Sixteen,
    }))
}

fn encode_transfer16(f: &TransferFields) -> Vec<u8> {
    let mut b = vec![0u8; 16];
    b[0] = f.operation_code;
    BigEndian::write_u64(&mut b[2..10], f.logical_block_address);
    BigEndian::write_u32(&mut b[10..14], f.transfer_length as u32);
    b[15] = control_byte(f.linked, f.normal_aca);
    b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read10_round_trips() {
        let mut cdb = vec![OP_READ10, 0, 0, 0, 0x10, 0x01, 0, 0, 1, 0];
        cdb[2..6].copy_from_slice(&[0, 0, 0x10, 0x01]);
        let decoded = Cdb::decode(&cdb).unwrap();
        assert_eq!(decoded.encode(), cdb);
        match &decoded {
            Cdb::Read10(f) => {
                assert_eq!(f.logical_block_address, 0x1001);
                assert_eq!(f.transfer_length, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn write6_transfer_length_zero_means_256() {
        let cdb = [OP_WRITE6, 0x00, 0x00, 0x10, 0x00, 0x00];
        let decoded = Cdb::decode(&cdb).unwrap();
        let fields = decoded.as_transfer().unwrap();
        assert_eq!(fields.transfer_length, 256);
        assert_eq!(decoded.encode(), cdb);
    }

    #[test]
    fn write6_lba_is_21_bits() {
        // byte1 low 5 bits = 0x1F, byte2 = 0xFF, byte3 = 0xFF -> LBA = 0x1FFFFF
        let cdb = [OP_WRITE6, 0x1F, 0xFF, 0xFF, 0x01, 0x00];
        let decoded = Cdb::decode(&cdb).unwrap();
        let fields = decoded.as_transfer().unwrap();
        assert_eq!(fields.logical_block_address, 0x1F_FFFF);
    }

    #[test]
    fn read16_full_width_fields_round_trip() {
        let mut cdb = vec![0u8; 16];
        cdb[0] = OP_READ16;
        BigEndian::write_u64(&mut cdb[2..10], 0x0102030405060708);
        BigEndian::write_u32(&mut cdb[10..14], 4096);
        let decoded = Cdb::decode(&cdb).unwrap();
        assert_eq!(decoded.encode(), cdb);
        let fields = decoded.as_transfer().unwrap();
        assert_eq!(fields.logical_block_address, 0x0102030405060708);
        assert_eq!(fields.transfer_length, 4096);
    }

    #[test]
    fn truncated_cdb_is_invalid_field_in_cdb() {
        let cdb = [OP_READ10, 0, 0, 0, 0];
        let err = Cdb::decode(&cdb).unwrap_err();
        assert_eq!(err.kind.sense_key(), crate::sense::sense_key::ILLEGAL_REQUEST);
        assert_eq!(err.kind, SenseExceptionKind::InvalidFieldInCdb);
    }

    #[test]
    fn unknown_opcode_decodes_as_other() {
        let cdb = [0xFF, 1, 2, 3];
        let decoded = Cdb::decode(&cdb).unwrap();
        assert_eq!(decoded.operation_code(), 0xFF);
        assert_eq!(decoded.encode(), cdb);
    }

    #[test]
    fn range_check_field_pointer_distinguishes_six_byte_form() {
        assert_eq!(CdbForm::Six.range_check_field_pointer(), FieldPointer::bit(1, 4));
        assert_eq!(CdbForm::Ten.range_check_field_pointer(), FieldPointer::byte(2));
        assert_eq!(CdbForm::Sixteen.range_check_field_pointer(), FieldPointer::byte(2));
    }
}
