mod bpf;
mod packet_source;

pub use bpf::SockFilter;
pub use packet_source::{Frame, PacketSource};
