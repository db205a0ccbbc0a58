//! Readiness multiplexer
//!
//! The kernel only needs four operations from the OS readiness layer:
//! register a (descriptor, interest, owner) triple, unregister it, poll with
//! a timeout, and ask who is waiting on a descriptor. [`PollSelector`] is the
//! default implementation on top of `poll(2)`; embedders can plug in their
//! own through [`Kernel::with_selector`](crate::Kernel::with_selector).

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use rustc_hash::FxHashMap;
use spindle_sdk::{Interest, TaskId};

/// A registration that became ready
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Event {
    /// The descriptor
    pub fd: RawFd,
    /// Which readiness fired
    pub interest: Interest,
    /// Task that registered it
    pub owner: TaskId,
}

/// OS readiness notification
pub trait Selector {
    /// Watch `fd` for `interest` on behalf of `owner`
    ///
    /// Fails with `AlreadyExists` if another task already waits for the same
    /// readiness on the same descriptor.
    fn register(&mut self, fd: RawFd, interest: Interest, owner: TaskId) -> io::Result<()>;

    /// Stop watching `fd` for `interest`
    fn unregister(&mut self, fd: RawFd, interest: Interest) -> io::Result<()>;

    /// Wait up to `timeout` (forever if `None`) and append ready registrations
    /// to `events`
    ///
    /// An interrupted wait returns `Ok` with no events.
    fn poll(&mut self, timeout: Option<Duration>, events: &mut Vec<Event>) -> io::Result<()>;

    /// Tasks waiting to read and to write `fd`
    fn waiting(&self, fd: RawFd) -> (Option<TaskId>, Option<TaskId>);

    /// Number of live registrations
    fn len(&self) -> usize;

    /// True if nothing is registered
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Interests {
    reader: Option<TaskId>,
    writer: Option<TaskId>,
}

impl Interests {
    fn slot(&mut self, interest: Interest) -> &mut Option<TaskId> {
        match interest {
            Interest::Read => &mut self.reader,
            Interest::Write => &mut self.writer,
        }
    }

    fn events(&self) -> libc::c_short {
        let mut events = 0;
        if self.reader.is_some() {
            events |= libc::POLLIN;
        }
        if self.writer.is_some() {
            events |= libc::POLLOUT;
        }
        events
    }

    fn is_empty(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }
}

/// `poll(2)`-backed selector
#[derive(Debug, Default)]
pub struct PollSelector {
    interests: FxHashMap<RawFd, Interests>,
    /// Scratch buffer rebuilt on every poll
    pollfds: Vec<libc::pollfd>,
}

impl PollSelector {
    /// Create an empty selector
    pub fn new() -> Self {
        Self::default()
    }
}

/// Round up to whole milliseconds so a timer never fires early
fn poll_timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if Duration::from_millis(ms as u64) < d {
                ms += 1;
            }
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

impl Selector for PollSelector {
    fn register(&mut self, fd: RawFd, interest: Interest, owner: TaskId) -> io::Result<()> {
        let entry = self.interests.entry(fd).or_default();
        let slot = entry.slot(interest);
        match *slot {
            Some(existing) if existing != owner => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("fd {} already has a {:?} waiter ({})", fd, interest, existing),
            )),
            _ => {
                *slot = Some(owner);
                Ok(())
            }
        }
    }

    fn unregister(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let Some(entry) = self.interests.get_mut(&fd) else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("fd {} is not registered", fd),
            ));
        };
        if entry.slot(interest).take().is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("fd {} has no {:?} waiter", fd, interest),
            ));
        }
        if entry.is_empty() {
            self.interests.remove(&fd);
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, events: &mut Vec<Event>) -> io::Result<()> {
        self.pollfds.clear();
        self.pollfds
            .extend(self.interests.iter().map(|(&fd, interests)| libc::pollfd {
                fd,
                events: interests.events(),
                revents: 0,
            }));

        // SAFETY: pollfds is a valid, exclusively borrowed array of the given length
        let n = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                poll_timeout_ms(timeout),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for pfd in self.pollfds.iter().filter(|p| p.revents != 0) {
            let Some(interests) = self.interests.get(&pfd.fd) else {
                continue;
            };
            // Errors and hang-ups wake both sides so they observe the failure
            // on their next syscall.
            let failed = pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
            if let Some(owner) = interests.reader {
                if failed || pfd.revents & libc::POLLIN != 0 {
                    events.push(Event {
                        fd: pfd.fd,
                        interest: Interest::Read,
                        owner,
                    });
                }
            }
            if let Some(owner) = interests.writer {
                if failed || pfd.revents & libc::POLLOUT != 0 {
                    events.push(Event {
                        fd: pfd.fd,
                        interest: Interest::Write,
                        owner,
                    });
                }
            }
        }
        Ok(())
    }

    fn waiting(&self, fd: RawFd) -> (Option<TaskId>, Option<TaskId>) {
        self.interests
            .get(&fd)
            .map(|i| (i.reader, i.writer))
            .unwrap_or((None, None))
    }

    fn len(&self) -> usize {
        self.interests
            .values()
            .map(|i| i.reader.is_some() as usize + i.writer.is_some() as usize)
            .sum()
    }
}
