//! Pieces of the dashcam client that do no network I/O of their own:
//! data model, firmware response parsers, configuration and gateway
//! discovery.

pub mod config;
pub mod discovery;
pub mod model;
pub mod parse;
