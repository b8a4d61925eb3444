use std::{fs, io, thread, time::Duration};
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use super::error::Error;

const BACKOFF_START: Duration = Duration::from_micros(100);
const BACKOFF_CAP: Duration = Duration::from_millis(10);

pub struct ProcessControl {
    pid: u32,
}

/// Keeps the target stopped for as long as it is alive, resuming on drop, so
/// no error path leaves the target frozen.
pub struct Frozen<'a> {
    control: &'a ProcessControl,
}

impl Drop for Frozen<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.control.resume() {
            log::warn!("failed to resume pid {}: {}", self.control.pid, error);
        }
    }
}

impl ProcessControl {
    pub fn new(pid: u32) -> Self {
        ProcessControl { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Stop the target and wait until the kernel reports it stopped, so a
    /// subsequent maps/pagemap snapshot is internally consistent. The wait is
    /// unbounded, the poll interval backs off to avoid pegging a core.
    pub fn freeze(&self) -> Result<Frozen<'_>, Error> {
        self.kill(Signal::SIGSTOP)?;

        let path = format!("/proc/{}/stat", self.pid);
        let mut delay = BACKOFF_START;
        loop {
            let stat = fs::read_to_string(&path).map_err(|error| match error.kind() {
                io::ErrorKind::NotFound => Error::ProcessNotFound(self.pid),
                _ => Error::from_io(error, &path),
            })?;
            if stat_state(&stat, &path)? == 'T' {
                break;
            }
            thread::sleep(delay);
            delay = (delay * 2).min(BACKOFF_CAP);
        }

        Ok(Frozen { control: self })
    }

    pub fn resume(&self) -> Result<(), Error> {
        self.kill(Signal::SIGCONT)
    }

    /// Liveness probe via zero-signal delivery. A pid that stopped existing
    /// reports `TargetLost`.
    pub fn alive(&self) -> Result<(), Error> {
        match signal::kill(Pid::from_raw(self.pid as i32), None) {
            Ok(()) => Ok(()),
            // EPERM still proves the pid exists
            Err(Errno::EPERM) => Ok(()),
            Err(Errno::ESRCH) => Err(Error::TargetLost),
            Err(errno) => Err(Error::Io(io::Error::from_raw_os_error(errno as i32))),
        }
    }

    fn kill(&self, signal: Signal) -> Result<(), Error> {
        match signal::kill(Pid::from_raw(self.pid as i32), signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(Error::ProcessNotFound(self.pid)),
            Err(Errno::EPERM) => Err(Error::PermissionDenied(format!("kill({})", self.pid))),
            Err(errno) => Err(Error::Io(io::Error::from_raw_os_error(errno as i32))),
        }
    }
}

// the comm field may contain spaces and parentheses, the state char is the
// first field after the last `)`
fn stat_state(stat: &str, path: &str) -> Result<char, Error> {
    stat.rfind(')')
        .map(|pos| &stat[pos + 1..])
        .and_then(|tail| tail.split_whitespace().next())
        .and_then(|field| field.chars().next())
        .ok_or_else(|| Error::malformed(path, "missing state field"))
}

#[cfg(test)]
mod tests {
    use super::stat_state;

    #[test]
    fn state_field() {
        let stat = "1234 (cat) R 1 1234 1234 0 -1 4194304 95 0 0 0 0 0 0 0 20";
        assert_eq!(stat_state(stat, "stat").unwrap(), 'R');
    }

    #[test]
    fn state_field_with_hostile_comm() {
        let stat = "1234 (a b) T (x) T 1 1234";
        // state follows the *last* closing parenthesis of comm
        assert_eq!(stat_state("1234 ((sd) pam) T 1 1234", "stat").unwrap(), 'T');
        assert_eq!(stat_state(stat, "stat").unwrap(), 'T');
    }

    #[test]
    fn truncated_record() {
        assert!(stat_state("1234 (cat", "stat").is_err());
    }
}
