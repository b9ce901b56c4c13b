/*! A single-threaded readiness loop.

Sockets participate through the [Source] capability set: a descriptor to
watch, a data-ready callback, and a pair of deadline hooks. [Sources] keeps
weak registrations, so a source is deregistered by dropping its owning
handle, and computes each wakeup from the soonest deadline across all live
sources.

No callback ever runs re-entrantly: readiness and deadline dispatch happen
strictly in sequence on the calling thread.
*/

use std::cell::RefCell;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

use crate::time::{Duration, Instant};

/// The capability set the loop needs from a participating socket.
pub trait Source {
    /// The descriptor polled for readability.
    fn fd(&self) -> RawFd;

    /// The descriptor became readable.
    fn ready(&mut self);

    /// The next instant this source wants waking, if any.
    fn next_deadline(&self) -> Option<Instant>;

    /// Called once per loop pass with the current time; the source fires
    /// whatever deadlines have expired.
    fn on_deadline(&mut self, now: Instant);

    /// The descriptor reported an error condition.
    fn set_error(&mut self);
}

/// The set of registered sources.
#[derive(Default)]
pub struct Sources {
    sources: Vec<Weak<RefCell<dyn Source>>>,
}

impl Sources {
    pub fn new() -> Sources {
        Sources::default()
    }

    /// Register a source. The registry only holds a weak handle: dropping
    /// the owning side deregisters the source on the next poll.
    pub fn register(&mut self, source: &Rc<RefCell<dyn Source>>) {
        self.sources.push(Rc::downgrade(source));
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.sources
            .iter()
            .filter(|source| source.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one pass of the loop: wait until a descriptor is readable or the
    /// soonest deadline arrives (bounded by `timeout`, if given), dispatch
    /// readiness and error callbacks, then let every source check its
    /// deadlines against the new current time.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.sources.retain(|source| source.strong_count() > 0);
        let sources: Vec<Rc<RefCell<dyn Source>>> =
            self.sources.iter().filter_map(Weak::upgrade).collect();

        let now = Instant::now();
        let mut wait = timeout;
        for source in &sources {
            if let Some(deadline) = source.borrow().next_deadline() {
                let until = if deadline <= now {
                    Duration::ZERO
                } else {
                    deadline - now
                };
                wait = Some(match wait {
                    Some(wait) if wait < until => wait,
                    _ => until,
                });
            }
        }
        let timeout_ms = match wait {
            Some(wait) => wait.total_millis().min(i32::MAX as u64) as libc::c_int,
            None => -1,
        };

        let mut fds: Vec<libc::pollfd> = sources
            .iter()
            .map(|source| libc::pollfd {
                fd: source.borrow().fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        net_trace!("poll: {} sources, timeout {} ms", fds.len(), timeout_ms);
        let res = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if res == -1 {
            return Err(io::Error::last_os_error());
        }

        for (source, pollfd) in sources.iter().zip(&fds) {
            if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                source.borrow_mut().set_error();
            } else if pollfd.revents & libc::POLLIN != 0 {
                source.borrow_mut().ready();
            }
        }

        let now = Instant::now();
        for source in &sources {
            source.borrow_mut().on_deadline(now);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Script {
        fd: RawFd,
        deadline: Option<Instant>,
        ready_calls: usize,
        deadline_calls: usize,
        errors: usize,
    }

    impl Script {
        fn new(fd: RawFd) -> Script {
            Script {
                fd,
                deadline: None,
                ready_calls: 0,
                deadline_calls: 0,
                errors: 0,
            }
        }
    }

    impl Source for Script {
        fn fd(&self) -> RawFd {
            self.fd
        }

        fn ready(&mut self) {
            self.ready_calls += 1;
            let mut byte = [0u8; 16];
            unsafe {
                libc::read(self.fd, byte.as_mut_ptr() as *mut libc::c_void, byte.len());
            }
        }

        fn next_deadline(&self) -> Option<Instant> {
            self.deadline
        }

        fn on_deadline(&mut self, now: Instant) {
            if let Some(deadline) = self.deadline {
                if deadline < now {
                    self.deadline_calls += 1;
                    self.deadline = None;
                }
            }
        }

        fn set_error(&mut self) {
            self.errors += 1;
        }
    }

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as libc::c_int; 2];
        let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(res, 0);
        (fds[0], fds[1])
    }

    fn write(fd: RawFd, data: &[u8]) {
        let res = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        assert_eq!(res, data.len() as isize);
    }

    #[test]
    fn dispatches_readiness() {
        let (rx, tx) = pipe();
        let source = Rc::new(RefCell::new(Script::new(rx)));
        let handle: Rc<RefCell<dyn Source>> = source.clone();

        let mut sources = Sources::new();
        sources.register(&handle);
        assert_eq!(sources.len(), 1);

        write(tx, b"x");
        sources.poll(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(source.borrow().ready_calls, 1);

        // Nothing pending: the pass returns on timeout without dispatching.
        sources.poll(Some(Duration::ZERO)).unwrap();
        assert_eq!(source.borrow().ready_calls, 1);

        unsafe {
            libc::close(rx);
            libc::close(tx);
        }
    }

    #[test]
    fn fires_expired_deadline_once() {
        let (rx, tx) = pipe();
        let source = Rc::new(RefCell::new(Script::new(rx)));
        source.borrow_mut().deadline = Some(Instant::now() - Duration::from_millis(1));
        let handle: Rc<RefCell<dyn Source>> = source.clone();

        let mut sources = Sources::new();
        sources.register(&handle);

        sources.poll(Some(Duration::ZERO)).unwrap();
        assert_eq!(source.borrow().deadline_calls, 1);

        // The deadline was consumed; later passes stay quiet.
        sources.poll(Some(Duration::ZERO)).unwrap();
        assert_eq!(source.borrow().deadline_calls, 1);

        unsafe {
            libc::close(rx);
            libc::close(tx);
        }
    }

    #[test]
    fn drop_deregisters() {
        let (rx, tx) = pipe();
        let source = Rc::new(RefCell::new(Script::new(rx)));
        let handle: Rc<RefCell<dyn Source>> = source.clone();

        let mut sources = Sources::new();
        sources.register(&handle);
        drop(handle);
        drop(source);
        assert!(sources.is_empty());
        sources.poll(Some(Duration::ZERO)).unwrap();

        unsafe {
            libc::close(rx);
            libc::close(tx);
        }
    }

    #[test]
    fn hangup_sets_error() {
        let (rx, tx) = pipe();
        let source = Rc::new(RefCell::new(Script::new(rx)));
        let handle: Rc<RefCell<dyn Source>> = source.clone();

        let mut sources = Sources::new();
        sources.register(&handle);

        unsafe {
            libc::close(tx);
        }
        sources.poll(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(source.borrow().errors, 1);

        unsafe {
            libc::close(rx);
        }
    }
}
