//! End-to-end tests that drive the real `jcsh` binary through a
//! pseudo-terminal, exercising the §8 scenarios that need a controlling
//! tty: background jobs, Ctrl-Z suspension, `fg`/`bg`/`kill`, and
//! pipelines.
//!
//! Only runs on Unix. Each test gets its own PTY + child process.

#![cfg(unix)]
#![allow(unsafe_code)]

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
use std::process::Command;
use std::time::{Duration, Instant};

use nix::libc;
use nix::pty::openpty;
use nix::sys::termios;

fn jcsh_bin() -> String {
    env!("CARGO_BIN_EXE_jcsh").to_string()
}

struct PtySession {
    master: std::fs::File,
    child: std::process::Child,
}

impl PtySession {
    fn new() -> Self {
        let pty = openpty(None, None).expect("openpty failed");

        let mut attrs = termios::tcgetattr(&pty.slave).expect("tcgetattr");
        attrs.local_flags.remove(termios::LocalFlags::ECHO);
        attrs.local_flags.insert(termios::LocalFlags::ISIG);
        termios::tcsetattr(&pty.slave, termios::SetArg::TCSANOW, &attrs).expect("tcsetattr");

        let slave_fd = pty.slave.as_raw_fd();

        let tmp_home = std::env::temp_dir().join(format!("jcsh-pty-home-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&tmp_home);

        // SAFETY: duplicating the pty's slave fd into the child's stdio and
        // establishing it as the controlling terminal of a fresh session,
        // both standard and required for a job-control shell under test.
        let child = unsafe {
            use std::os::unix::process::CommandExt;
            let mut cmd = Command::new(jcsh_bin());
            cmd.env("JCSH_HISTFILE", tmp_home.join(".jcsh_history"))
                .stdin(std::process::Stdio::from_raw_fd(libc::dup(slave_fd)))
                .stdout(std::process::Stdio::from_raw_fd(libc::dup(slave_fd)))
                .stderr(std::process::Stdio::from_raw_fd(libc::dup(slave_fd)));

            cmd.pre_exec(move || {
                libc::setsid();
                libc::ioctl(0, libc::TIOCSCTTY, 0);
                Ok(())
            });

            cmd.spawn().expect("failed to spawn jcsh")
        };

        drop(pty.slave);

        let master_fd = pty.master.as_raw_fd();
        unsafe {
            let flags = libc::fcntl(master_fd, libc::F_GETFL);
            libc::fcntl(master_fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }

        let raw_fd = pty.master.into_raw_fd();
        let master = unsafe { std::fs::File::from_raw_fd(raw_fd) };

        let mut session = PtySession { master, child };
        session
            .wait_for("# ", Duration::from_secs(5))
            .expect("never got initial prompt");
        session
    }

    fn send_line(&mut self, line: &str) {
        write!(self.master, "{line}\n").expect("write to pty failed");
    }

    fn send_bytes(&mut self, bytes: &[u8]) {
        self.master.write_all(bytes).expect("write to pty failed");
    }

    fn send_ctrl_z(&mut self) {
        self.send_bytes(&[0x1a]);
    }

    fn read_available(&mut self) -> String {
        let mut buf = [0u8; 4096];
        let mut output = String::new();
        loop {
            match self.master.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => output.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => panic!("read error: {e}"),
            }
        }
        output
    }

    fn wait_for(&mut self, expected: &str, timeout: Duration) -> Result<String, String> {
        let start = Instant::now();
        let mut accumulated = String::new();
        while start.elapsed() < timeout {
            let chunk = self.read_available();
            if !chunk.is_empty() {
                accumulated.push_str(&chunk);
                if accumulated.contains(expected) {
                    return Ok(accumulated);
                }
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        Err(format!(
            "timeout waiting for {expected:?} in output:\n---\n{accumulated}\n---"
        ))
    }

    fn run_command(&mut self, cmd: &str) -> String {
        self.send_line(cmd);
        match self.wait_for("# ", Duration::from_secs(5)) {
            Ok(output) => output,
            Err(e) => panic!("command {cmd:?} failed: {e}"),
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        let _ = write!(self.master, "quit\n");
        std::thread::sleep(Duration::from_millis(100));
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn background_job_reported_running_then_killed() {
    let mut session = PtySession::new();

    let output = session.run_command("sleep 30 &");
    assert!(
        output.contains("[1] running 'sleep 30'"),
        "expected background job notice, got:\n{output}"
    );

    let output = session.run_command("jobs");
    assert!(
        output.contains("[1] running 'sleep 30'"),
        "jobs should list the background job, got:\n{output}"
    );

    let output = session.run_command("kill %1");
    std::thread::sleep(Duration::from_millis(200));
    let output = output + &session.read_available();
    assert!(
        output.contains("killed 'sleep 30' by signal 15") || output.contains("[1]"),
        "expected a termination notice for job 1, got:\n{output}"
    );
}

#[test]
fn ctrl_z_suspends_and_bg_resumes() {
    let mut session = PtySession::new();

    session.send_line("sleep 60");
    std::thread::sleep(Duration::from_millis(300));
    session.send_ctrl_z();

    let output = session
        .wait_for("# ", Duration::from_secs(3))
        .expect("should get prompt back after Ctrl-Z");
    assert!(
        output.contains("suspended 'sleep 60'"),
        "expected suspended notice, got:\n{output}"
    );

    let output = session.run_command("bg");
    assert!(
        output.contains("continue 'sleep 60'"),
        "expected continue notice from bg, got:\n{output}"
    );

    let output = session.run_command("kill %1");
    std::thread::sleep(Duration::from_millis(200));
    let output = output + &session.read_available();
    assert!(
        output.contains("killed") || output.contains("[1]"),
        "expected job 1 to terminate, got:\n{output}"
    );
}

#[test]
fn pipeline_does_not_hang_the_shell() {
    let mut session = PtySession::new();

    session.run_command("false | true");
    let output = session.run_command("echo still-alive");
    assert!(
        output.contains("still-alive"),
        "shell should remain responsive after a pipeline, got:\n{output}"
    );
}

#[test]
fn redirected_pipeline_counts_lines() {
    let mut session = PtySession::new();

    let file = tempfile::NamedTempFile::new().expect("tempfile");
    std::fs::write(file.path(), "one\ntwo\nthree\n").expect("write fixture");
    let path = file.path().display().to_string();

    let output = session.run_command(&format!("cat < {path} | wc -l"));
    assert!(
        output.contains('3'),
        "expected a line count of 3, got:\n{output}"
    );
}

#[test]
fn cd_to_missing_directory_reports_error() {
    let mut session = PtySession::new();

    let output = session.run_command("cd /this/path/does/not/exist");
    assert!(
        output.contains("cd:"),
        "expected a cd error diagnostic, got:\n{output}"
    );
}
