use std::{
    env,
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
};

use orchestra_parallel::launch::ENV_RESULT_PATH;

/// Writes straight to the stdout descriptor, bypassing the test harness capture.
pub fn emit(marker: &str) {
    let mut out = io::stdout();
    out.write_all(marker.as_bytes()).unwrap();
    out.write_all(b"\n").unwrap();
    out.flush().unwrap();
}

/// Everything written to fd 1 while `f` runs, child processes included.
///
/// A spawned worker process runs `f` untouched so its output lands in the
/// parent's capture.
pub fn capture_stdout(f: impl FnOnce()) -> String {
    if env::var_os(ENV_RESULT_PATH).is_some() {
        f();
        return String::new();
    }

    let mut file = tempfile::tempfile().unwrap();
    io::stdout().flush().unwrap();

    let saved = unsafe {
        let raw = libc::dup(libc::STDOUT_FILENO);
        assert!(raw >= 0);
        OwnedFd::from_raw_fd(raw)
    };
    assert!(unsafe { libc::dup2(file.as_raw_fd(), libc::STDOUT_FILENO) } >= 0);

    f();

    io::stdout().flush().unwrap();
    assert!(unsafe { libc::dup2(saved.as_raw_fd(), libc::STDOUT_FILENO) } >= 0);

    read_all(&mut file)
}

fn read_all(file: &mut File) -> String {
    let mut captured = String::new();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.read_to_string(&mut captured).unwrap();
    captured
}
