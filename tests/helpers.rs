use std::time::{Duration, Instant};

use maniac_subprocess::{Command, OrphanQueue, ProcessError, Reaper, Redirect};

#[tokio::test(flavor = "current_thread")]
async fn status_runs_to_completion() {
    let status = Command::new("ls")
        .arg("/")
        .stdout(Redirect::Discard)
        .status()
        .await
        .unwrap();
    assert!(status.success());
}

#[tokio::test(flavor = "current_thread")]
async fn status_checked_reports_failures() {
    Command::new("ls")
        .arg("/")
        .stdout(Redirect::Discard)
        .status_checked()
        .await
        .unwrap();

    let err = Command::new("/donotexist/poorexec")
        .status_checked()
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }), "{err:?}");
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));

    let err = Command::new("sh")
        .args(["-c", "exit 3"])
        .status_checked()
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), Some(3));
    assert!(err.output().is_none());
}

#[tokio::test(flavor = "current_thread")]
async fn capture_output_returns_stdout() {
    let stdout = Command::new("ls")
        .args(["-d", "/tmp"])
        .capture_output()
        .await
        .unwrap();
    assert_eq!(stdout, b"/tmp\n");

    let err = Command::new("/donotexist/poorexec")
        .capture_output()
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }), "{err:?}");
}

#[tokio::test(flavor = "current_thread")]
async fn capture_output_keeps_output_of_failed_command() {
    let err = Command::new("sh")
        .args(["-c", "echo partial; exit 2"])
        .capture_output()
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), Some(2));
    assert_eq!(err.output(), Some(&b"partial\n"[..]));
}

#[tokio::test(flavor = "current_thread")]
async fn capture_output_refuses_redirected_stdout() {
    let err = Command::new("true")
        .stdout(Redirect::Discard)
        .capture_output()
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::InvalidInput(_)));
}

#[tokio::test(flavor = "current_thread")]
async fn output_collects_everything() {
    let output = Command::new("sh")
        .args(["-c", "echo o; echo e >&2; exit 3"])
        .output()
        .await
        .unwrap();
    assert_eq!(output.status.returncode(), 3);
    assert_eq!(output.stdout, b"o\n");
    assert_eq!(output.stderr, b"e\n");
}

#[tokio::test(flavor = "current_thread")]
async fn environment_and_working_directory() {
    let stdout = Command::new("sh")
        .args(["-c", "printf %s \"$GREETING\""])
        .env("GREETING", "bonjour")
        .capture_output()
        .await
        .unwrap();
    assert_eq!(stdout, b"bonjour");

    let stdout = Command::new("sh")
        .args(["-c", "printf %s \"${HOME-unset}\""])
        .env_clear()
        .env("PATH", "/usr/bin:/bin")
        .capture_output()
        .await
        .unwrap();
    assert_eq!(stdout, b"unset");

    let dir = tempfile::tempdir().unwrap();
    let stdout = Command::new("pwd")
        .arg("-P")
        .current_dir(dir.path())
        .capture_output()
        .await
        .unwrap();
    let expected = format!("{}\n", dir.path().canonicalize().unwrap().display());
    assert_eq!(String::from_utf8(stdout).unwrap(), expected);
}

#[tokio::test(flavor = "current_thread")]
async fn shell_mode_passes_positional_arguments() {
    let stdout = Command::new("echo $0-$1")
        .shell(true)
        .args(["a", "b"])
        .capture_output()
        .await
        .unwrap();
    assert_eq!(stdout, b"a-b\n");
}

#[tokio::test(flavor = "current_thread")]
async fn executable_replaces_the_program_image() {
    let stdout = Command::new("not-a-real-program")
        .executable("/bin/sh")
        .args(["-c", "echo ok"])
        .capture_output()
        .await
        .unwrap();
    assert_eq!(stdout, b"ok\n");
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "current_thread")]
async fn close_fds_hides_parent_descriptors() {
    use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

    let mut fds = [-1; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let (read, _write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    let probe = format!(
        "[ -e /proc/self/fd/{} ] && echo open || echo closed",
        read.as_raw_fd()
    );

    let hidden = Command::new("sh")
        .args(["-c", probe.as_str()])
        .capture_output()
        .await
        .unwrap();
    assert_eq!(hidden, b"closed\n");

    let leaked = Command::new("sh")
        .args(["-c", probe.as_str()])
        .close_fds(false)
        .capture_output()
        .await
        .unwrap();
    assert_eq!(leaked, b"open\n");
}

#[tokio::test(flavor = "current_thread")]
async fn dropped_children_are_reaped() {
    let reaper = Reaper::new();
    let child = Command::new("true").reaper(reaper.clone()).spawn().unwrap();
    drop(child);
    assert_eq!(reaper.pending(), 1);

    let deadline = Instant::now() + Duration::from_secs(5);
    while reaper.pending() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
        reaper.reap_orphans();
    }
    assert_eq!(reaper.pending(), 0);

    let mut child = Command::new("true").reaper(reaper.clone()).spawn().unwrap();
    child.wait().await.unwrap();
    drop(child);
    assert_eq!(reaper.pending(), 0);
}

#[test]
fn spawn_requires_a_runtime() {
    let err = Command::new("sleep")
        .arg("3")
        .stdout(Redirect::Pipe)
        .spawn()
        .unwrap_err();
    assert!(matches!(err, ProcessError::InvalidInput(_)), "{err:?}");
}

#[tokio::test(flavor = "current_thread")]
async fn pre_exec_hooks_run_in_the_child() {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "umask"]);
    unsafe {
        cmd.pre_exec(|| {
            libc::umask(0o077);
            Ok(())
        });
    }
    let stdout = cmd.capture_output().await.unwrap();
    assert_eq!(stdout, b"0077\n");

    let mut cmd = Command::new("true");
    unsafe {
        cmd.pre_exec(|| Err(std::io::Error::from_raw_os_error(libc::EPERM)));
    }
    let err = cmd.status().await.unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }), "{err:?}");
    assert_eq!(err.raw_os_error(), Some(libc::EPERM));
}
