//! Core functionality for the garage opener client
//! This module contains the core functionality for talking to the opener

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::OpenerService;
