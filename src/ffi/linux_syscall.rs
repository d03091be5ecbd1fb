use std::fs::{self, File};
use std::io::{Error, ErrorKind, Result};
use std::os::fd::{AsRawFd, FromRawFd};

use libc::{c_int, epoll_event};

use super::Attr;

pub fn perf_event_open(
    attr: &mut Attr,
    pid: i32,
    cpu: i32,
    group_fd: i32,
    flags: u64,
) -> Result<File> {
    let fd = unsafe { perf_event_open_sys::perf_event_open(attr, pid, cpu, group_fd, flags as _) };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd) })
    } else {
        Err(Error::last_os_error())
    }
}

pub fn ioctl<A>(file: &File, op: unsafe fn(c_int, A) -> c_int, arg: A) -> Result<i32> {
    let result = unsafe { op(file.as_raw_fd(), arg) };
    if result != -1 {
        Ok(result)
    } else {
        Err(Error::last_os_error())
    }
}

pub unsafe fn mmap<T>(
    ptr: *mut (),
    len: usize,
    prot: i32,
    flags: i32,
    file: &File,
    offset: i64,
) -> Result<*mut T> {
    let ptr = libc::mmap(ptr as _, len, prot, flags, file.as_raw_fd(), offset);
    if ptr != libc::MAP_FAILED {
        Ok(ptr as _)
    } else {
        Err(Error::last_os_error())
    }
}

pub unsafe fn munmap<T>(ptr: *mut T, len: usize) -> Result<()> {
    let result = libc::munmap(ptr as _, len);
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn epoll_create1(flags: i32) -> Result<File> {
    let fd = unsafe { libc::epoll_create1(flags) };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd as _) })
    } else {
        Err(Error::last_os_error())
    }
}

pub fn epoll_ctl(epoll: &File, op: i32, file: &File, event: &mut epoll_event) -> Result<()> {
    let result = unsafe { libc::epoll_ctl(epoll.as_raw_fd(), op, file.as_raw_fd(), event as _) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn epoll_wait<'a>(
    epoll: &File,
    events: &'a mut [epoll_event],
    timeout: i32,
) -> Result<&'a [epoll_event]> {
    let len = unsafe {
        libc::epoll_wait(
            epoll.as_raw_fd(),
            events.as_mut_ptr(),
            events.len() as _,
            timeout,
        )
    };
    if len != -1 {
        Ok(&events[..len as _])
    } else {
        Err(Error::last_os_error())
    }
}

pub fn eventfd(init: u32, flags: i32) -> Result<File> {
    let fd = unsafe { libc::eventfd(init, flags) };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd) })
    } else {
        Err(Error::last_os_error())
    }
}

pub fn online_cpus() -> Result<Vec<u32>> {
    let list = fs::read_to_string("/sys/devices/system/cpu/online")?;
    parse_cpu_list(&list)
}

// Kernel cpu list format, e.g. `0,2-5,7`:
// https://github.com/torvalds/linux/blob/v6.13/Documentation/admin-guide/cputopology.rst
pub fn parse_cpu_list(list: &str) -> Result<Vec<u32>> {
    let invalid = || Error::new(ErrorKind::InvalidData, format!("invalid cpu list: {:?}", list));
    let parse = |n: &str| n.trim().parse::<u32>().map_err(|_| invalid());

    let mut cpus = vec![];
    for range in list.trim().split(',').filter(|r| !r.is_empty()) {
        match range.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse(start)?, parse(end)?);
                if start > end {
                    return Err(invalid());
                }
                cpus.extend(start..=end);
            }
            None => cpus.push(parse(range)?),
        }
    }
    if cpus.is_empty() {
        return Err(invalid());
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}
