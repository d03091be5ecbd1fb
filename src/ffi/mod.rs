use std::sync::LazyLock;

pub use perf_event_open_sys::ioctls;

pub mod bindings {
    pub use perf_event_open_sys::bindings::*;

    // Newer than the headers the bindings are generated from, these shadow
    // the generated ones where present.
    // Since Linux 5.13:
    pub const PERF_COUNT_SW_CGROUP_SWITCHES: u32 = 11;
    // Since Linux 6.0:
    pub const PERF_FORMAT_LOST: u32 = 1 << 4;
}

pub mod linux_syscall;

pub static PAGE_SIZE: LazyLock<usize> = LazyLock::new(|| {
    let name = libc::_SC_PAGE_SIZE;
    let size = unsafe { libc::sysconf(name) };
    size as _
});

pub type Attr = bindings::perf_event_attr;
pub type Metadata = bindings::perf_event_mmap_page;
pub type Header = bindings::perf_event_header;
