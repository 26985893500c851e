use std::{
    env,
    ffi::OsString,
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    process::{self, ExitStatus},
    sync::{Condvar, Mutex, PoisonError},
    thread,
};

use log::{debug, error, info};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::{process::Command, runtime, task::JoinSet};

use crate::config::Rendezvous;
use crate::error::{ParallelErr, Result};

/// Rank of a spawned worker process.
pub const ENV_RANK: &str = "RANK";
/// Rank of a spawned worker process on its host.
pub const ENV_LOCAL_RANK: &str = "LOCAL_RANK";
/// Amount of participants in the run.
pub const ENV_WORLD_SIZE: &str = "WORLD_SIZE";
/// Where a spawned worker writes its result; its presence marks a worker process.
pub const ENV_RESULT_PATH: &str = "ORCHESTRA_RESULT_PATH";

/// Runs one worker per rank and gathers their results in rank order.
pub trait Spawner {
    /// Runs `worker(rank)` for every rank in `0..world_size`.
    ///
    /// # Errors
    /// Fails if any worker fails; a single failure fails the whole launch.
    fn spawn<T, F>(&self, rendezvous: &Rendezvous, world_size: usize, worker: F) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: Fn(usize) -> Result<T> + Sync;
}

/// Runs every rank as a thread of the calling process.
///
/// Ranks share the process' descriptors, so output suppression silences all
/// of them at once (see `SuppressGuard`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

impl Spawner for ThreadSpawner {
    fn spawn<T, F>(&self, _rendezvous: &Rendezvous, world_size: usize, worker: F) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        let worker = &worker;
        let gate = &StartGate::default();

        let outcomes = thread::scope(|s| -> Result<Vec<Result<T>>> {
            let mut handles = Vec::with_capacity(world_size);
            for rank in 0..world_size {
                let spawned = thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(s, move || match gate.wait() {
                        true => worker(rank),
                        false => Err(ParallelErr::WorkerFailed {
                            rank,
                            msg: "launch aborted before the worker started".into(),
                        }),
                    });

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        // The ranks already spawned must not reach a collective call.
                        gate.open(false);
                        return Err(e.into());
                    }
                }
            }
            gate.open(true);

            Ok(handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .unwrap_or(Err(ParallelErr::WorkerPanicked { rank }))
                })
                .collect())
        })?;

        outcomes.into_iter().collect()
    }
}

/// Holds spawned ranks back until every rank exists, or releases them without running.
#[derive(Default)]
struct StartGate {
    decision: Mutex<Option<bool>>,
    opened: Condvar,
}

impl StartGate {
    fn open(&self, go: bool) {
        *self.decision.lock().unwrap_or_else(PoisonError::into_inner) = Some(go);
        self.opened.notify_all();
    }

    /// Blocks until the gate opens and returns whether the rank may run.
    fn wait(&self) -> bool {
        let decision = self.decision.lock().unwrap_or_else(PoisonError::into_inner);
        let decision = self
            .opened
            .wait_while(decision, |decision| decision.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        decision.unwrap_or(false)
    }
}

/// Runs every rank as a child process re-executing a program, by default the current one.
///
/// The children must reach the same `launch` call as the parent: there the
/// spawner recognizes them through their environment, runs the worker for
/// their rank, reports the result and exits the process.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    /// Re-executes the current binary with its current arguments.
    pub fn current() -> Result<Self> {
        Ok(Self {
            program: env::current_exe()?,
            args: env::args_os().skip(1).collect(),
        })
    }

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Starts every child and waits for all of them, killing the rest on the first failure.
    fn run_children(&self, rendezvous: &Rendezvous, world_size: usize, dir: &Path) -> Result<()> {
        let runtime = runtime::Builder::new_current_thread().enable_all().build()?;

        runtime.block_on(async {
            let mut children = JoinSet::new();

            for rank in 0..world_size {
                let mut child = Command::new(&self.program)
                    .args(&self.args)
                    .envs(rendezvous.env_vars())
                    .env(ENV_RANK, rank.to_string())
                    .env(ENV_LOCAL_RANK, rank.to_string())
                    .env(ENV_WORLD_SIZE, world_size.to_string())
                    .env(ENV_RESULT_PATH, report_path(dir, rank))
                    .kill_on_drop(true)
                    .spawn()?;

                debug!(rank = rank, pid = child.id().unwrap_or_default(); "spawned worker process");
                children.spawn(async move { (rank, child.wait().await) });
            }

            while let Some(joined) = children.join_next().await {
                let (rank, status) = joined.map_err(io::Error::other)?;
                let status = status?;

                if !status.success() {
                    children.abort_all();
                    return Err(ParallelErr::WorkerFailed {
                        rank,
                        msg: failure_message(dir, rank, status),
                    });
                }

                debug!(rank = rank; "worker process exited cleanly");
            }

            Ok::<(), ParallelErr>(())
        })
    }
}

impl Spawner for ProcessSpawner {
    fn spawn<T, F>(&self, rendezvous: &Rendezvous, world_size: usize, worker: F) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        if let Some(role) = ChildRole::from_env()? {
            run_child(role, worker);
        }

        let dir = tempfile::Builder::new()
            .prefix("orchestra-launch-")
            .tempdir()?;

        info!(
            world_size = world_size;
            "spawning worker processes from {}",
            self.program.display()
        );
        self.run_children(rendezvous, world_size, dir.path())?;

        (0..world_size)
            .map(|rank| match read_report(&report_path(dir.path(), rank))? {
                Report::Done(value) => Ok(value),
                Report::Failed(msg) => Err(ParallelErr::WorkerFailed { rank, msg }),
            })
            .collect()
    }
}

/// What a worker process hands back to its parent.
#[derive(Debug, Serialize, Deserialize)]
enum Report<T> {
    Done(T),
    Failed(String),
}

/// Identity of the current process when it was spawned as a worker.
struct ChildRole {
    rank: usize,
    result_path: PathBuf,
}

impl ChildRole {
    fn from_env() -> Result<Option<Self>> {
        let Some(result_path) = env::var_os(ENV_RESULT_PATH) else {
            return Ok(None);
        };

        let rank = env::var(ENV_RANK)
            .ok()
            .and_then(|rank| rank.parse().ok())
            .ok_or_else(|| {
                ParallelErr::InvalidConfig(format!("{ENV_RESULT_PATH} is set but {ENV_RANK} is not"))
            })?;

        Ok(Some(Self {
            rank,
            result_path: result_path.into(),
        }))
    }
}

fn run_child<T, F>(role: ChildRole, worker: F) -> !
where
    T: Serialize,
    F: Fn(usize) -> Result<T>,
{
    let rank = role.rank;

    let (report, code) = match worker(rank) {
        Ok(value) => (Report::Done(value), 0),
        Err(e) => {
            error!(rank = rank; "worker failed: {e}");
            (Report::Failed(e.to_string()), 1)
        }
    };

    let code = match write_report(&role.result_path, &report) {
        Ok(()) => code,
        Err(e) => {
            error!(rank = rank; "failed to report result: {e}");
            1
        }
    };

    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    process::exit(code)
}

fn report_path(dir: &Path, rank: usize) -> PathBuf {
    dir.join(format!("rank-{rank}.json"))
}

fn write_report<T: Serialize>(path: &Path, report: &Report<T>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, report)?;
    writer.flush()?;
    Ok(())
}

fn read_report<T: DeserializeOwned>(path: &Path) -> Result<Report<T>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn failure_message(dir: &Path, rank: usize, status: ExitStatus) -> String {
    match read_report::<serde_json::Value>(&report_path(dir, rank)) {
        Ok(Report::Failed(msg)) => msg,
        _ => format!("exited with {status}"),
    }
}
