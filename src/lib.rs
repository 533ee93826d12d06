//! A pure Rust iSCSI target implementation
//!
//! This library provides a reusable iSCSI target server that can be
//! integrated into storage applications. Users implement the
//! [`BlockDevice`] trait to provide the actual storage backend: a single
//! buffered store ([`engine::BufferedStore`]) or a striped (RAID-0)
//! composition of several ([`striped::StripedDevice`]).
//!
//! # Example
//!
//! ```no_run
//! use iscsi_target::{BlockDevice, IscsiTarget, ScsiResult};
//! use iscsi_target::engine::BufferedStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = BufferedStore::new("disk1", 512, 2 * 1024 * 1024 / 512);
//! let target = IscsiTarget::builder()
//!     .bind_addr("0.0.0.0:3260")
//!     .target_name("iqn.2025-12.local:storage.disk1")
//!     .build(storage)?;
//! target.run()?;
//! # Ok(())
//! # }
//! ```

pub mod cdb;
pub mod device;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod scsi;
pub mod sense;
pub mod striped;
pub mod target;
pub mod transport;

pub use cdb::Cdb;
pub use device::BlockDevice;
pub use dispatcher::Dispatcher;
pub use error::{IscsiError, ScsiResult};
pub use sense::{SenseData, SenseException, SenseExceptionKind};
pub use target::{IscsiTarget, IscsiTargetBuilder};
pub use transport::{Command, TransportPort};

/// Version of this library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
