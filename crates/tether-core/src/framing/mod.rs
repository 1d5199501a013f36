//! Stream framing used to delimit call frames on a byte stream.

pub mod hdlc;
