//! The event ingestor (C5): a single-threaded loop that subscribes to the Linux process connector
//! over netlink and multiplexes it with the shutdown-wake descriptor.
//!
//! The wire structures (`nlmsghdr`, `cn_msg`, `proc_event`) are raw `#[repr(C)]` types and
//! constants, grouped at the bottom of this module alongside the raw syscall wrappers they're
//! used with. Readiness multiplexing is done with `mio`.

use crate::dispatch::dispatch_event;
use crate::state::Supervisor;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::os::unix::io::RawFd;
use tracing::{event, Level};

const NETLINK_TOKEN: Token = Token(0);
const SHUTDOWN_TOKEN: Token = Token(1);

const NETLINK_CONNECTOR: libc::c_int = 11;
const CN_IDX_PROC: u32 = 0x1;
const CN_VAL_PROC: u32 = 0x1;
const PROC_CN_MCAST_LISTEN: u32 = 1;
const PROC_CN_MCAST_IGNORE: u32 = 2;

const PROC_EVENT_FORK: u32 = 0x0000_0001;
const PROC_EVENT_EXIT: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy)]
pub enum ProcEventKind {
    Fork,
    Exit,
    Other,
}

/// A reusable view of the most recently decoded event, to avoid allocating per message.
#[derive(Debug, Clone, Copy)]
pub struct ProcEvent {
    pub kind: ProcEventKind,
    pub parent_pid: i32,
    pub parent_tgid: i32,
    pub child_pid: i32,
    pub child_tgid: i32,
    pub exit_code: u32,
    pub exit_signal: u32,
}

impl Default for ProcEvent {
    fn default() -> Self {
        ProcEvent {
            kind: ProcEventKind::Other,
            parent_pid: 0,
            parent_tgid: 0,
            child_pid: 0,
            child_tgid: 0,
            exit_code: 0,
            exit_signal: 0,
        }
    }
}

pub struct Ingestor {
    netlink_fd: RawFd,
    shutdown_fd: RawFd,
    poll: Poll,
}

impl Ingestor {
    /// Opens and binds the netlink socket and registers it, along with the shutdown-wake
    /// descriptor, with the readiness facility. Failure here is fatal to the supervisor: without
    /// a bound socket the ingestor cannot be constructed at all. The initial subscribe call
    /// happens later, in `run`, where its failure is merely fatal to the ingestor's own loop
    /// rather than to supervisor startup (see `run`'s doc comment).
    pub fn new(self_pid: i32, shutdown_fd: RawFd) -> io::Result<Self> {
        let netlink_fd = open_netlink_socket()?;
        bind_netlink_socket(netlink_fd, self_pid)?;
        set_nonblocking(netlink_fd)?;

        let poll = Poll::new()?;
        poll.registry().register(
            &mut SourceFd(&netlink_fd),
            NETLINK_TOKEN,
            Interest::READABLE,
        )?;
        poll.registry().register(
            &mut SourceFd(&shutdown_fd),
            SHUTDOWN_TOKEN,
            Interest::READABLE,
        )?;

        Ok(Ingestor {
            netlink_fd,
            shutdown_fd,
            poll,
        })
    }

    /// Runs the loop until shutdown is requested or a non-recoverable error occurs.
    ///
    /// A failure to send the initial subscribe message is logged and aborts only this loop, not
    /// the whole supervisor: the caller still proceeds through its ordinary shutdown sequence for
    /// the other threads, and the process exits cleanly rather than with an error status. This
    /// differs from a fatal startup failure (where `Ingestor::new` itself returns `Err` and `main`
    /// reports and exits nonzero): here the supervisor run is still considered to have completed,
    /// just without kernel-level process events for its duration.
    pub fn run(mut self, supervisor: &Supervisor) {
        if let Err(e) = send_subscribe(self.netlink_fd, PROC_CN_MCAST_LISTEN) {
            event!(Level::ERROR, %e, "failed to subscribe to process events, exiting ingestor");
            unsafe {
                libc::close(self.netlink_fd);
            }
            return;
        }

        let mut events = Events::with_capacity(16);
        let mut event_data = ProcEvent::default();

        'outer: loop {
            match self.poll.poll(&mut events, None) {
                Ok(()) => (),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    event!(Level::ERROR, %e, "readiness facility failed, exiting ingestor");
                    break;
                }
            }

            for ready in events.iter() {
                match ready.token() {
                    SHUTDOWN_TOKEN => {
                        drain_shutdown_wake(self.shutdown_fd);
                        event!(Level::INFO, "shutdown requested, exiting ingestor");
                        break 'outer;
                    }
                    NETLINK_TOKEN => {
                        loop {
                            match recv_one(self.netlink_fd, &mut event_data) {
                                RecvOutcome::Message(pid) if pid > 0 => {
                                    dispatch_event(pid, &event_data, supervisor);
                                }
                                RecvOutcome::Message(_) => {}
                                RecvOutcome::WouldBlock => break,
                                RecvOutcome::Retry => continue,
                                RecvOutcome::PeerClosed => {
                                    event!(Level::INFO, "netlink peer closed, exiting ingestor");
                                    break 'outer;
                                }
                                RecvOutcome::Error(e) => {
                                    event!(Level::ERROR, %e, "netlink recv failed, exiting ingestor");
                                    break 'outer;
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let _ = send_subscribe(self.netlink_fd, PROC_CN_MCAST_IGNORE);
        unsafe {
            libc::close(self.netlink_fd);
        }
    }
}

enum RecvOutcome {
    Message(i32),
    WouldBlock,
    Retry,
    PeerClosed,
    Error(io::Error),
}

fn recv_one(fd: RawFd, event_data: &mut ProcEvent) -> RecvOutcome {
    let mut buf = [0u8; 256];
    let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
    if n == 0 {
        return RecvOutcome::PeerClosed;
    }
    if n < 0 {
        let err = io::Error::last_os_error();
        return match err.kind() {
            io::ErrorKind::Interrupted => RecvOutcome::Retry,
            io::ErrorKind::WouldBlock => RecvOutcome::WouldBlock,
            _ => RecvOutcome::Error(err),
        };
    }

    let n = n as usize;
    // Layout: nlmsghdr (16 bytes) + cn_msg (20 bytes) + proc_event.
    const NLMSGHDR_LEN: usize = 16;
    const CN_MSG_LEN: usize = 20;
    const PROC_EVENT_HEADER_LEN: usize = 16; // what(4) + cpu(4) + timestamp_ns(8)
    if n < NLMSGHDR_LEN + CN_MSG_LEN + PROC_EVENT_HEADER_LEN {
        return RecvOutcome::Message(0);
    }

    let payload = &buf[NLMSGHDR_LEN + CN_MSG_LEN..n];
    let what = u32::from_ne_bytes(payload[0..4].try_into().unwrap());

    match what {
        PROC_EVENT_FORK => {
            let data = &payload[PROC_EVENT_HEADER_LEN..];
            if data.len() < 16 {
                return RecvOutcome::Message(0);
            }
            event_data.kind = ProcEventKind::Fork;
            event_data.parent_pid = i32::from_ne_bytes(data[0..4].try_into().unwrap());
            event_data.parent_tgid = i32::from_ne_bytes(data[4..8].try_into().unwrap());
            event_data.child_pid = i32::from_ne_bytes(data[8..12].try_into().unwrap());
            event_data.child_tgid = i32::from_ne_bytes(data[12..16].try_into().unwrap());
            RecvOutcome::Message(event_data.parent_pid)
        }
        PROC_EVENT_EXIT => {
            let data = &payload[PROC_EVENT_HEADER_LEN..];
            if data.len() < 16 {
                return RecvOutcome::Message(0);
            }
            let pid = i32::from_ne_bytes(data[0..4].try_into().unwrap());
            event_data.kind = ProcEventKind::Exit;
            event_data.parent_pid = 0;
            event_data.parent_tgid = i32::from_ne_bytes(data[4..8].try_into().unwrap());
            event_data.child_pid = pid;
            event_data.exit_code = u32::from_ne_bytes(data[8..12].try_into().unwrap());
            event_data.exit_signal = u32::from_ne_bytes(data[12..16].try_into().unwrap());
            RecvOutcome::Message(pid)
        }
        _ => {
            event_data.kind = ProcEventKind::Other;
            RecvOutcome::Message(0)
        }
    }
}

fn drain_shutdown_wake(fd: RawFd) {
    let mut buf = [0u8; 8];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, 8) };
    if n < 0 {
        let err = io::Error::last_os_error();
        event!(Level::DEBUG, %err, "read on shutdown-wake descriptor failed, proceeding with shutdown anyway");
    }
}

fn open_netlink_socket() -> io::Result<RawFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_DGRAM,
            NETLINK_CONNECTOR,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn bind_netlink_socket(fd: RawFd, self_pid: i32) -> io::Result<()> {
    let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as u16;
    addr.nl_pid = self_pid as u32;
    addr.nl_groups = CN_IDX_PROC;

    let ret = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Sends a `cn_msg` whose payload is a single `proc_cn_mcast_op` value, framed with an
/// `nlmsghdr`. `op` is `PROC_CN_MCAST_LISTEN` to subscribe, `PROC_CN_MCAST_IGNORE` to unsubscribe.
fn send_subscribe(fd: RawFd, op: u32) -> io::Result<()> {
    const NLMSGHDR_LEN: usize = 16;
    const CN_MSG_LEN: usize = 20;
    const PAYLOAD_LEN: usize = 4;
    const TOTAL_LEN: usize = NLMSGHDR_LEN + CN_MSG_LEN + PAYLOAD_LEN;

    let mut buf = [0u8; TOTAL_LEN];

    // nlmsghdr
    buf[0..4].copy_from_slice(&(TOTAL_LEN as u32).to_ne_bytes());
    buf[4..6].copy_from_slice(&(libc::NLMSG_DONE as u16).to_ne_bytes());
    buf[6..8].copy_from_slice(&0u16.to_ne_bytes()); // flags
    buf[8..12].copy_from_slice(&0u32.to_ne_bytes()); // seq
    buf[12..16].copy_from_slice(&0u32.to_ne_bytes()); // pid (kernel doesn't check on send)

    // cn_msg: cb_id{idx,val}, seq, ack, len, flags
    buf[16..20].copy_from_slice(&CN_IDX_PROC.to_ne_bytes());
    buf[20..24].copy_from_slice(&CN_VAL_PROC.to_ne_bytes());
    buf[24..28].copy_from_slice(&0u32.to_ne_bytes()); // seq
    buf[28..32].copy_from_slice(&0u32.to_ne_bytes()); // ack
    buf[32..34].copy_from_slice(&(PAYLOAD_LEN as u16).to_ne_bytes());
    buf[34..36].copy_from_slice(&0u16.to_ne_bytes()); // flags

    // payload: proc_cn_mcast_op
    buf[36..40].copy_from_slice(&op.to_ne_bytes());

    let mut dest: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
    dest.nl_family = libc::AF_NETLINK as u16;

    let ret = unsafe {
        libc::sendto(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            0,
            &dest as *const libc::sockaddr_nl as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
