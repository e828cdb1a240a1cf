// Protocol module - byte-command decoding and dispatch
//
// The controller drives the device with single-byte commands, a few of
// which carry a length-delimited ASCII payload. codes holds the closed
// command table and decoder; dispatcher maps decoded commands onto
// session operations and answers ACK/NAK on the same transport.

pub mod codes;
pub mod dispatcher;

pub use codes::{Command, Decoded};
pub use dispatcher::{Dispatch, Dispatcher};
