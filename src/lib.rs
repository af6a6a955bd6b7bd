//! odfi-link - ACH file transport and ODFI ingestion
//!
//! Moves ACH files to and from banking hosts over FTP and SFTP, then parses,
//! identifies, audits and processes what the ODFI sends back.

pub mod ach;
pub mod audit;
pub mod config;
pub mod incoming;
pub mod logging;
pub mod transfer;
