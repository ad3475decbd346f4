pub mod sos;
pub mod thread;
