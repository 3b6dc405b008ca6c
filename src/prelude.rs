//! Reexports the traits needed to use the driver.

pub use crate::BlockDevice as _sst25vf_BlockDevice;
pub use crate::Read as _sst25vf_Read;
