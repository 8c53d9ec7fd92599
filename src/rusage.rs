//! Process resource usage, sampled around the measured part of a run.

use crate::error::Result;
use crate::histogram::CsvOutput;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// A snapshot of the resources consumed by the process so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rusage {
    /// Block input operations.
    pub iops_read: u64,
    /// Block output operations.
    pub iops_write: u64,
    /// Major page faults.
    pub iops_page: u64,
    pub cpu_user_ns: u64,
    pub cpu_kernel_ns: u64,
    /// Bytes under the data directory.
    pub disk: u64,
    /// Peak resident set, in bytes.
    pub ram: u64,
}

impl Rusage {
    /// Samples the process counters and the size of `datadir`, if given.
    pub fn sample(datadir: Option<&Path>) -> Result<Self> {
        let mut usage = process()?;
        if let Some(dir) = datadir {
            usage.disk = disk_usage(dir)?;
        }
        Ok(usage)
    }
}

#[cfg(unix)]
fn process() -> io::Result<Rusage> {
    let mut ru = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: the buffer is large enough and is only read after a successful call
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, ru.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let ru = unsafe { ru.assume_init() };
    let ns = |tv: libc::timeval| tv.tv_sec as u64 * 1_000_000_000 + tv.tv_usec as u64 * 1_000;
    // kilobytes everywhere but on macOS
    let ram = if cfg!(target_os = "macos") {
        ru.ru_maxrss as u64
    } else {
        ru.ru_maxrss as u64 * 1024
    };
    Ok(Rusage {
        iops_read: ru.ru_inblock as u64,
        iops_write: ru.ru_oublock as u64,
        iops_page: ru.ru_majflt as u64,
        cpu_user_ns: ns(ru.ru_utime),
        cpu_kernel_ns: ns(ru.ru_stime),
        disk: 0,
        ram,
    })
}

#[cfg(not(unix))]
fn process() -> io::Result<Rusage> {
    Ok(Rusage::default())
}

/// Apparent size of everything under `path`, directories included. Symlinks are not followed.
fn disk_usage(path: &Path) -> io::Result<u64> {
    let meta = fs::symlink_metadata(path)?;
    let mut total = meta.len();
    if meta.is_dir() {
        for entry in fs::read_dir(path)? {
            total += disk_usage(&entry?.path())?;
        }
    }
    Ok(total)
}

fn diff(finish: u64, start: u64) -> i64 {
    finish as i64 - start as i64
}

/// Prints the resources consumed between two samples, and writes them to
/// `<prefix><engine>_<sync>_rusage.csv` if `csv` is given.
pub fn report(start: &Rusage, finish: &Rusage, csv: Option<&CsvOutput>) -> Result<()> {
    const MB: f64 = (1u64 << 20) as f64;
    let iops_read = diff(finish.iops_read, start.iops_read);
    let iops_write = diff(finish.iops_write, start.iops_write);
    let iops_page = diff(finish.iops_page, start.iops_page);
    let cpu_user = diff(finish.cpu_user_ns, start.cpu_user_ns) as f64 * 1e-9;
    let cpu_kernel = diff(finish.cpu_kernel_ns, start.cpu_kernel_ns) as f64 * 1e-9;
    let disk = diff(finish.disk, start.disk) as f64 / MB;
    let ram = diff(finish.ram, start.ram) as f64 / MB;

    println!();
    println!(">>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>> rusage");
    println!(
        "iops: read {}, write {}, page {}",
        iops_read, iops_write, iops_page
    );
    println!("cpu: user {:.6}, system {:.6}", cpu_user, cpu_kernel);
    println!("space: disk {:.6}, ram {:.6}", disk, ram);

    if let Some(csv) = csv {
        let mut w = csv.create("rusage")?;
        writeln!(
            w,
            "iops_read,\tiops_write,\tiops_page,\tcpu_user,\tcpu_kernel,\tdisk,\tram"
        )?;
        writeln!(
            w,
            "{},\t{},\t{},\t{:e},\t{:e},\t{:e},\t{:e}",
            iops_read, iops_write, iops_page, cpu_user, cpu_kernel, disk, ram
        )?;
        w.flush()?;
    }
    Ok(())
}
