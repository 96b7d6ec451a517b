//! Command builder for spawning child processes.

use std::ffi::{OsStr, OsString};
use std::io;
use std::os::unix::io::OwnedFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tracing::debug;

use crate::config::ProcessConfig;
use crate::error::{ProcessError, ProcessResult};

use super::child::{Child, ExitStatus, Output};
use super::reaper::OrphanQueue;
use super::unix::{dup_cloexec, mark_inherited_cloexec, pipe_cloexec};

const SHELL: &str = "/bin/sh";

type PreExecHook = Arc<dyn Fn() -> io::Result<()> + Send + Sync>;

/// Where one of the child's standard streams goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Redirect {
    /// Share the parent's stream.
    #[default]
    Inherit,
    /// Connect the stream to a [`Pipe`](crate::Pipe) owned by the [`Child`].
    Pipe,
    /// Connect the stream to `/dev/null`.
    Discard,
    /// Only valid for stderr: send it wherever stdout goes.
    Stdout,
}

/// A builder for spawning child processes.
///
/// # Examples
///
/// ```no_run
/// use maniac_subprocess::{Command, Redirect};
///
/// # async fn example() -> maniac_subprocess::ProcessResult<()> {
/// let listing = Command::new("ls")
///     .arg("-d")
///     .arg("/tmp")
///     .capture_output()
///     .await?;
/// assert_eq!(listing, b"/tmp\n");
///
/// let mut child = Command::new("cat")
///     .stdin(Redirect::Pipe)
///     .stdout(Redirect::Pipe)
///     .spawn()?;
/// let (stdout, _) = child.communicate(Some(b"hello")).await?;
/// assert_eq!(stdout.unwrap(), b"hello");
/// # Ok(())
/// # }
/// ```
pub struct Command {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, Option<OsString>)>,
    env_clear: bool,
    current_dir: Option<PathBuf>,
    executable: Option<PathBuf>,
    stdin: Option<Redirect>,
    stdout: Option<Redirect>,
    stderr: Option<Redirect>,
    shell: bool,
    config: ProcessConfig,
    orphans: Option<Arc<dyn OrphanQueue>>,
    pre_exec: Vec<PreExecHook>,
}

impl Command {
    /// Creates a new `Command` for launching `program`.
    ///
    /// The default configuration inherits the environment, working directory
    /// and all three standard streams, and marks every other inherited
    /// descriptor close-on-exec.
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        let config = ProcessConfig::default();
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            envs: Vec::new(),
            env_clear: false,
            current_dir: None,
            executable: None,
            stdin: None,
            stdout: None,
            stderr: None,
            shell: false,
            config,
            orphans: None,
            pre_exec: Vec::new(),
        }
    }

    /// Adds an argument to pass to the program.
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Adds multiple arguments to pass to the program.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_owned()));
        self
    }

    /// Sets the working directory for the child process.
    pub fn current_dir<P: AsRef<Path>>(&mut self, dir: P) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Sets an environment variable for the child process.
    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.envs
            .push((key.as_ref().to_owned(), Some(val.as_ref().to_owned())));
        self
    }

    /// Sets multiple environment variables for the child process.
    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, val) in vars {
            self.env(key, val);
        }
        self
    }

    /// Removes an environment variable from the child process.
    pub fn env_remove<K: AsRef<OsStr>>(&mut self, key: K) -> &mut Self {
        self.envs.push((key.as_ref().to_owned(), None));
        self
    }

    /// Clears all environment variables for the child process.
    pub fn env_clear(&mut self) -> &mut Self {
        self.env_clear = true;
        self.envs.clear();
        self
    }

    /// Sets where the child's stdin comes from.
    pub fn stdin(&mut self, redirect: Redirect) -> &mut Self {
        self.stdin = Some(redirect);
        self
    }

    /// Sets where the child's stdout goes.
    pub fn stdout(&mut self, redirect: Redirect) -> &mut Self {
        self.stdout = Some(redirect);
        self
    }

    /// Sets where the child's stderr goes. [`Redirect::Stdout`] merges it into stdout.
    pub fn stderr(&mut self, redirect: Redirect) -> &mut Self {
        self.stderr = Some(redirect);
        self
    }

    /// Runs the program as a `/bin/sh -c` script; extra arguments become `$0`, `$1`...
    pub fn shell(&mut self, shell: bool) -> &mut Self {
        self.shell = shell;
        self
    }

    /// Executes `path` instead of the program, which is still passed as `argv[0]`.
    pub fn executable<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.executable = Some(path.as_ref().to_owned());
        self
    }

    /// Whether descriptors above stderr are kept from leaking into the child.
    pub fn close_fds(&mut self, close_fds: bool) -> &mut Self {
        self.config.close_fds = close_fds;
        self
    }

    pub fn config(&mut self, config: ProcessConfig) -> &mut Self {
        self.config = config.normalized();
        self
    }

    /// Schedules `hook` to run in the child after `fork` and before `exec`.
    ///
    /// Hooks run in registration order, before descriptors are hidden by
    /// [`close_fds`](Self::close_fds). An error from a hook aborts the spawn
    /// and is reported as [`ProcessError::Spawn`].
    ///
    /// # Safety
    ///
    /// The hook runs in a forked copy of a possibly multi-threaded process:
    /// it must only make async-signal-safe calls. It must not allocate or
    /// take locks. See [`CommandExt::pre_exec`].
    pub unsafe fn pre_exec<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> io::Result<()> + Send + Sync + 'static,
    {
        self.pre_exec.push(Arc::new(hook));
        self
    }

    /// Hands children dropped before they were reaped to `queue`, which is also
    /// drained before every spawn.
    pub fn reaper<Q: OrphanQueue + 'static>(&mut self, queue: Q) -> &mut Self {
        self.orphans = Some(Arc::new(queue));
        self
    }

    /// Returns the program given to [`Command::new`].
    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    /// Returns the arguments that will be passed to the program.
    pub fn get_args(&self) -> impl Iterator<Item = &OsStr> {
        self.args.iter().map(OsString::as_os_str)
    }

    /// Returns the working directory for the child process.
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// The command line, lossily rendered for logs and errors.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Spawns the command as a child process, returning a handle to it.
    ///
    /// # Errors
    ///
    /// Piped streams are registered with the current tokio reactor, so this
    /// must be called from within a runtime. Outside one it fails with
    /// [`ProcessError::InvalidInput`] without starting the program.
    pub fn spawn(&mut self) -> ProcessResult<Child> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ProcessError::InvalidInput(
                "spawn must be called from within a tokio runtime".into(),
            ));
        }
        if let Some(orphans) = &self.orphans {
            orphans.reap_orphans();
        }

        let command = self.display();
        let (mut cmd, merged_stdout) = self.build()?;
        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: command.clone(),
            source,
        })?;
        // Releases our copies of any descriptors handed to the child.
        drop(cmd);
        debug!(pid = child.id(), command = %command, "spawned child");

        let stdin = child.stdin.take().map(OwnedFd::from);
        let stdout = merged_stdout.or_else(|| child.stdout.take().map(OwnedFd::from));
        let stderr = child.stderr.take().map(OwnedFd::from);
        Child::from_parts(
            child,
            stdin,
            stdout,
            stderr,
            self.config,
            self.orphans.clone(),
            command,
        )
    }

    /// Runs the command to completion and returns its exit status.
    pub async fn status(&mut self) -> ProcessResult<ExitStatus> {
        self.spawn()?.wait().await
    }

    /// Like [`status`](Self::status) but fails with
    /// [`ProcessError::NonZeroExit`] unless the exit code is zero.
    pub async fn status_checked(&mut self) -> ProcessResult<ExitStatus> {
        let status = self.status().await?;
        if status.returncode() != 0 {
            return Err(ProcessError::NonZeroExit {
                code: status.returncode(),
                command: self.display(),
                output: None,
            });
        }
        Ok(status)
    }

    /// Runs the command with stdout captured and returns what it printed.
    ///
    /// Fails with [`ProcessError::NonZeroExit`] carrying the captured output
    /// unless the exit code is zero. Stdout must not have been redirected.
    pub async fn capture_output(&mut self) -> ProcessResult<Vec<u8>> {
        if self.stdout.is_some() {
            return Err(ProcessError::InvalidInput(
                "stdout is captured and cannot be redirected".into(),
            ));
        }

        self.stdout = Some(Redirect::Pipe);
        let spawned = self.spawn();
        self.stdout = None;
        let mut child = spawned?;

        let (stdout, _) = child.communicate(None).await?;
        let stdout = stdout.unwrap_or_default();
        let status = child.wait().await?;
        if status.returncode() != 0 {
            return Err(ProcessError::NonZeroExit {
                code: status.returncode(),
                command: self.display(),
                output: Some(stdout),
            });
        }
        Ok(stdout)
    }

    /// Executes the command and collects all of its output.
    ///
    /// This method sets up piped stdout and stderr and discards stdin. A
    /// non-zero exit code is reported in the returned status, not as an error.
    pub async fn output(&mut self) -> ProcessResult<Output> {
        self.stdin(Redirect::Discard)
            .stdout(Redirect::Pipe)
            .stderr(Redirect::Pipe);

        let mut child = self.spawn()?;
        let (stdout, stderr) = child.communicate(None).await?;
        let status = child.wait().await?;
        Ok(Output {
            status,
            stdout: stdout.unwrap_or_default(),
            stderr: stderr.unwrap_or_default(),
        })
    }

    /// Builds the std command. Also returns our read end when stderr is merged
    /// into a piped stdout, since the pipe is then created here.
    fn build(&self) -> ProcessResult<(std::process::Command, Option<OwnedFd>)> {
        let mut cmd = if self.shell {
            let shell = self.executable.as_deref().unwrap_or(Path::new(SHELL));
            let mut cmd = std::process::Command::new(shell);
            cmd.arg("-c").arg(&self.program);
            cmd
        } else if let Some(executable) = &self.executable {
            let mut cmd = std::process::Command::new(executable);
            cmd.arg0(&self.program);
            cmd
        } else {
            std::process::Command::new(&self.program)
        };
        cmd.args(&self.args);

        if self.env_clear {
            cmd.env_clear();
        }
        for (key, val) in &self.envs {
            match val {
                Some(val) => cmd.env(key, val),
                None => cmd.env_remove(key),
            };
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(stdio_for(self.stdin.unwrap_or_default(), "stdin")?);
        let stdout = self.stdout.unwrap_or_default();
        let mut merged_stdout = None;
        match self.stderr.unwrap_or_default() {
            Redirect::Stdout => match stdout {
                Redirect::Pipe => {
                    let (read, write) = pipe_cloexec()?;
                    cmd.stdout(Stdio::from(write.try_clone()?));
                    cmd.stderr(Stdio::from(write));
                    merged_stdout = Some(read);
                }
                Redirect::Inherit => {
                    cmd.stdout(Stdio::inherit());
                    cmd.stderr(Stdio::from(dup_cloexec(libc::STDOUT_FILENO)?));
                }
                Redirect::Discard => {
                    cmd.stdout(Stdio::null());
                    cmd.stderr(Stdio::null());
                }
                Redirect::Stdout => return Err(invalid_redirect("stdout")),
            },
            stderr => {
                cmd.stdout(stdio_for(stdout, "stdout")?);
                cmd.stderr(stdio_for(stderr, "stderr")?);
            }
        }

        for hook in &self.pre_exec {
            let hook = Arc::clone(hook);
            // SAFETY: the caller of `Command::pre_exec` vouched for the hook.
            unsafe {
                cmd.pre_exec(move || hook());
            }
        }
        if self.config.close_fds {
            // SAFETY: the hook only issues async-signal-safe fcntl calls.
            unsafe {
                cmd.pre_exec(mark_inherited_cloexec);
            }
        }

        Ok((cmd, merged_stdout))
    }
}

fn stdio_for(redirect: Redirect, stream: &str) -> ProcessResult<Stdio> {
    Ok(match redirect {
        Redirect::Inherit => Stdio::inherit(),
        Redirect::Pipe => Stdio::piped(),
        Redirect::Discard => Stdio::null(),
        Redirect::Stdout => return Err(invalid_redirect(stream)),
    })
}

fn invalid_redirect(stream: &str) -> ProcessError {
    ProcessError::InvalidInput(format!("{stream} cannot be redirected to stdout"))
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("command", &self.display())
            .field("shell", &self.shell)
            .field("stdin", &self.stdin)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .field("close_fds", &self.config.close_fds)
            .field("pre_exec_hooks", &self.pre_exec.len())
            .finish()
    }
}
