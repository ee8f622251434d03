pub mod destination;
pub mod key;
pub mod source;
