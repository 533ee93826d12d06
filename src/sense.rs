//! SCSI sense data: structured error kinds and their SPC-4 wire encoding
//!
//! Every fault the task engine and striped device can raise is represented as
//! a [`SenseException`] carrying a [`SenseExceptionKind`], a sense key, and an
//! ASC/ASCQ pair. [`SenseData`] is the wire-format encoder used when a task's
//! result is serialized into a SCSI response PDU.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

/// SCSI sense key codes (SPC-4 Table 29)
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const HARDWARE_ERROR: u8 = 0x04;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const ABORTED_COMMAND: u8 = 0x0B;
}

/// Additional Sense Code / Qualifier pairs used by this crate
pub mod asc {
    pub const NO_ADDITIONAL_SENSE: (u8, u8) = (0x00, 0x00);
    pub const LBA_OUT_OF_RANGE: (u8, u8) = (0x21, 0x00);
    pub const INVALID_FIELD_IN_CDB: (u8, u8) = (0x24, 0x00);
    pub const UNRECOVERED_READ_ERROR: (u8, u8) = (0x11, 0x00);
    pub const WRITE_ERROR: (u8, u8) = (0x0C, 0x00);
    pub const LOGICAL_UNIT_NOT_READY: (u8, u8) = (0x04, 0x00);
    pub const INTERNAL_TARGET_FAILURE: (u8, u8) = (0x44, 0x00);
}

/// Points at the CDB byte (and, for bit fields, the bit offset within it)
/// that a validation failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPointer {
    pub byte: u8,
    pub bit: Option<u8>,
}

impl FieldPointer {
    pub const fn byte(byte: u8) -> Self {
        FieldPointer { byte, bit: None }
    }

    pub const fn bit(byte: u8, bit: u8) -> Self {
        FieldPointer {
            byte,
            bit: Some(bit),
        }
    }
}

/// The structured fault taxonomy this crate raises, one variant per row of
/// the error taxonomy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenseExceptionKind {
    LogicalBlockAddressOutOfRange,
    InvalidFieldInCdb,
    SynchronousDataTransferError,
    TaskAborted,
    DeviceNotReady,
    /// Raised by the striped device when a leaf I/O fails; `leaf` carries the
    /// leaf's own kind as additional information.
    InternalTargetFailure { leaf: Box<SenseExceptionKind> },
}

impl SenseExceptionKind {
    pub fn sense_key(&self) -> u8 {
        match self {
            SenseExceptionKind::LogicalBlockAddressOutOfRange => sense_key::ILLEGAL_REQUEST,
            SenseExceptionKind::InvalidFieldInCdb => sense_key::ILLEGAL_REQUEST,
            SenseExceptionKind::SynchronousDataTransferError => sense_key::MEDIUM_ERROR,
            SenseExceptionKind::TaskAborted => sense_key::ABORTED_COMMAND,
            SenseExceptionKind::DeviceNotReady => sense_key::NOT_READY,
            SenseExceptionKind::InternalTargetFailure { .. } => sense_key::HARDWARE_ERROR,
        }
    }

    pub fn asc_ascq(&self) -> (u8, u8) {
        match self {
            SenseExceptionKind::LogicalBlockAddressOutOfRange => asc::LBA_OUT_OF_RANGE,
            SenseExceptionKind::InvalidFieldInCdb => asc::INVALID_FIELD_IN_CDB,
            SenseExceptionKind::SynchronousDataTransferError => asc::UNRECOVERED_READ_ERROR,
            SenseExceptionKind::TaskAborted => asc::NO_ADDITIONAL_SENSE,
            SenseExceptionKind::DeviceNotReady => asc::LOGICAL_UNIT_NOT_READY,
            SenseExceptionKind::InternalTargetFailure { .. } => asc::INTERNAL_TARGET_FAILURE,
        }
    }
}

/// A structured SCSI fault, convertible to fixed-format sense bytes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("SCSI exception: {kind:?}")]
pub struct SenseException {
    pub kind: SenseExceptionKind,
    pub field_pointer: Option<FieldPointer>,
    pub information: u32,
}

impl SenseException {
    pub fn new(kind: SenseExceptionKind) -> Self {
        SenseException {
            kind,
            field_pointer: None,
            information: 0,
        }
    }

    pub fn with_field_pointer(mut self, pointer: FieldPointer) -> Self {
        self.field_pointer = Some(pointer);
        self
    }

    pub fn with_information(mut self, information: u32) -> Self {
        self.information = information;
        self
    }

    /// Wrap this exception as the leaf cause of an `InternalTargetFailure`,
    /// per the striped device's "first failing leaf wins" propagation policy.
    pub fn into_internal_target_failure(self) -> SenseException {
        SenseException::new(SenseExceptionKind::InternalTargetFailure {
            leaf: Box::new(self.kind),
        })
    }

    pub fn to_sense_data(&self) -> SenseData {
        let (asc, ascq) = self.kind.asc_ascq();
        let mut data = SenseData::new(self.kind.sense_key(), asc, ascq).with_info(self.information);
        if let Some(fp) = self.field_pointer {
            data = data.with_field_pointer(fp);
        }
        data
    }
}

/// SCSI sense data, fixed format (SPC-4 §4.5.3), response code 70h (current).
#[derive(Debug, Clone)]
pub struct SenseData {
    pub sense_key: u8,
    pub asc: u8,
    pub ascq: u8,
    pub information: u32,
    pub field_pointer: Option<FieldPointer>,
}

impl SenseData {
    pub fn new(sense_key: u8, asc: u8, ascq: u8) -> Self {
        SenseData {
            sense_key,
            asc,
            ascq,
            information: 0,
            field_pointer: None,
        }
    }

    pub fn with_info(mut self, info: u32) -> Self {
        self.information = info;
        self
    }

    pub fn with_field_pointer(mut self, pointer: FieldPointer) -> Self {
        self.field_pointer = Some(pointer);
        self
    }

    /// Create sense data for invalid/unsupported command opcode
    pub fn invalid_command() -> Self {
        SenseData::new(sense_key::ILLEGAL_REQUEST, asc::INVALID_FIELD_IN_CDB.0, 0)
    }

    /// Serialize to fixed-format sense data, 18 bytes, including an optional
    /// command-specific "sense key specific" field pointer (bytes 15..18,
    /// SKSV set in byte 15 bit 7) when one is present.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; 18];

        data[0] = 0x70; // current error, fixed format
        data[2] = self.sense_key & 0x0F;
        BigEndian::write_u32(&mut data[3..7], self.information);
        data[7] = 10; // additional sense length: remaining bytes after this field
        data[12] = self.asc;
        data[13] = self.ascq;

        if let Some(fp) = self.field_pointer {
            data[15] = 0x80; // SKSV (sense key specific valid)
            if let Some(bit) = fp.bit {
                data[15] |= 0x08 | (bit & 0x07); // C/D clear (CDB field), bit position
            }
            BigEndian::write_u16(&mut data[16..18], fp.byte as u16);
        }

        data
    }
}
