/// Cooperative worker model behind the thread builtins and the
/// THREAD_SPAWN / THREAD_JOIN opcodes.
///
/// Every spawned task runs on its own OS thread with its own VM state,
/// sharing only the chunk, the procedure table and the globals map (single
/// lock). Arguments are deep-copied at spawn, so no caller-held Value ever
/// changes ownership. Results are published under a lock and taken at most
/// once. Cancellation sets the worker's abort flag; the worker observes it
/// at its next instruction boundary (or poll point inside a builtin) and
/// finishes with a cancelled status.
///
/// Pool submission is FIFO through one channel; submitting never blocks the
/// caller. Spawned workers are detached peers until joined.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::builtins;
use crate::errors::RuntimeError;
use crate::value::Value;
use crate::vm::Vm;

const POOL_WORKERS: usize = 4;

// ---------------------------------------------------------------------------
// Handle table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Queued,
    Running,
    Done,
    Cancelled,
    Failed,
}

impl ThreadStatus {
    pub fn name(self) -> &'static str {
        match self {
            ThreadStatus::Queued => "queued",
            ThreadStatus::Running => "running",
            ThreadStatus::Done => "done",
            ThreadStatus::Cancelled => "cancelled",
            ThreadStatus::Failed => "error",
        }
    }
}

struct Entry {
    name: String,
    abort: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    status: Mutex<ThreadStatus>,
    /// Published once by the worker, taken at most once by the reader.
    result: Mutex<Option<Result<Value, String>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

static HANDLES: Lazy<Mutex<HashMap<i64, Arc<Entry>>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_HANDLE: AtomicI64 = AtomicI64::new(1);

fn new_entry(name: &str) -> (i64, Arc<Entry>) {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::SeqCst);
    let entry = Arc::new(Entry {
        name: name.to_string(),
        abort: Arc::new(AtomicBool::new(false)),
        paused: Arc::new(AtomicBool::new(false)),
        status: Mutex::new(ThreadStatus::Queued),
        result: Mutex::new(None),
        join: Mutex::new(None),
    });
    HANDLES.lock().insert(handle, Arc::clone(&entry));
    (handle, entry)
}

fn entry_for(handle: i64) -> Result<Arc<Entry>, RuntimeError> {
    HANDLES.lock().get(&handle).cloned().ok_or_else(|| RuntimeError::BadArgument {
        name: "thread".into(),
        message: format!("unknown thread handle {}", handle),
        line: 0,
    })
}

fn publish(entry: &Entry, outcome: Result<Value, RuntimeError>) {
    let mut status = entry.status.lock();
    let mut result = entry.result.lock();
    match outcome {
        Ok(v) => {
            *status = ThreadStatus::Done;
            *result = Some(Ok(v));
        }
        Err(err) if err.is_abort() => {
            *status = ThreadStatus::Cancelled;
            *result = Some(Ok(Value::string("cancelled")));
        }
        Err(err) => {
            *status = ThreadStatus::Failed;
            *result = Some(Err(err.to_string()));
        }
    }
}

fn run_builtin_task(mut vm: Vm, entry: Arc<Entry>, builtin: String, mut args: Vec<Value>) {
    *entry.status.lock() = ThreadStatus::Running;
    let outcome = match builtins::lookup(&builtin) {
        Some(b) => (b.handler)(&mut vm, &mut args),
        None => Err(RuntimeError::UnknownBuiltin {
            name: builtin,
            arity: args.len() as u8,
            line: 0,
        }),
    };
    publish(&entry, outcome);
}

fn worker_vm(parent: &Vm, entry: &Entry) -> Vm {
    let mut vm = Vm::worker_of(parent);
    vm.abort_requested = Arc::clone(&entry.abort);
    vm.paused = Arc::clone(&entry.paused);
    vm
}

// ---------------------------------------------------------------------------
// Spawn / pool / join
// ---------------------------------------------------------------------------

fn check_spawnable(builtin: &str, argc: usize) -> Result<(), RuntimeError> {
    match builtins::lookup(builtin) {
        Some(b) if b.thread_safe => Ok(()),
        Some(_) => Err(RuntimeError::BadArgument {
            name: "thread_spawn".into(),
            message: format!("builtin '{}' is not allow-listed for workers", builtin),
            line: 0,
        }),
        None => Err(RuntimeError::UnknownBuiltin {
            name: builtin.to_string(),
            arity: argc as u8,
            line: 0,
        }),
    }
}

/// Detached worker running an allow-listed builtin. Returns the handle.
pub fn spawn_named(
    parent: &Vm,
    builtin: &str,
    thread_name: &str,
    args: Vec<Value>,
) -> Result<i64, RuntimeError> {
    check_spawnable(builtin, args.len())?;
    let (handle, entry) = new_entry(thread_name);
    let vm = worker_vm(parent, &entry);
    let task_entry = Arc::clone(&entry);
    let builtin = builtin.to_lowercase();
    let joiner = std::thread::Builder::new()
        .name(format!("pscal-{}", thread_name))
        .spawn(move || run_builtin_task(vm, task_entry, builtin, args))
        .map_err(|e| RuntimeError::Io { message: e.to_string(), line: 0 })?;
    *entry.join.lock() = Some(joiner);
    Ok(handle)
}

/// Worker running a procedure body at a bytecode address on a fresh VM that
/// shares the caller's chunk and globals.
pub fn spawn_bytecode(parent: &Vm, addr: u16) -> Result<i64, RuntimeError> {
    let (handle, entry) = new_entry(&format!("@{}", addr));
    let mut vm = worker_vm(parent, &entry);
    let task_entry = Arc::clone(&entry);
    let joiner = std::thread::Builder::new()
        .name(format!("pscal-@{}", addr))
        .spawn(move || {
            *task_entry.status.lock() = ThreadStatus::Running;
            let outcome = vm.run_procedure(addr);
            publish(&task_entry, outcome);
        })
        .map_err(|e| RuntimeError::Io { message: e.to_string(), line: 0 })?;
    *entry.join.lock() = Some(joiner);
    Ok(handle)
}

struct PoolJob {
    entry: Arc<Entry>,
    vm: Vm,
    builtin: String,
    args: Vec<Value>,
}

static POOL: Lazy<Sender<PoolJob>> = Lazy::new(|| {
    let (tx, rx) = unbounded::<PoolJob>();
    for i in 0..POOL_WORKERS {
        let rx = rx.clone();
        let _ = std::thread::Builder::new()
            .name(format!("pscal-pool-{}", i))
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    run_builtin_task(job.vm, job.entry, job.builtin, job.args);
                }
            });
    }
    tx
});

/// FIFO submission; never blocks the caller.
pub fn pool_submit(parent: &Vm, builtin: &str, args: Vec<Value>) -> Result<i64, RuntimeError> {
    check_spawnable(builtin, args.len())?;
    let (handle, entry) = new_entry(builtin);
    let vm = worker_vm(parent, &entry);
    POOL.send(PoolJob {
        entry,
        vm,
        builtin: builtin.to_lowercase(),
        args,
    })
    .map_err(|_| RuntimeError::Io { message: "thread pool is shut down".into(), line: 0 })?;
    Ok(handle)
}

/// Wait for a worker and take its published result. A second join on the
/// same handle returns nil because delivery is at-most-once.
pub fn join(handle: i64) -> Result<Value, RuntimeError> {
    let entry = entry_for(handle)?;
    let joiner = entry.join.lock().take();
    if let Some(j) = joiner {
        let _ = j.join();
    } else {
        // Pool workers have no join handle; wait on the published result.
        loop {
            if entry.result.lock().is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }
    let taken = entry.result.lock().take();
    match taken {
        Some(Ok(v)) => Ok(v),
        Some(Err(message)) => Ok(Value::string(format!("error: {}", message))),
        None => Ok(Value::Nil),
    }
}

pub fn cancel(handle: i64) -> Result<bool, RuntimeError> {
    let entry = entry_for(handle)?;
    entry.abort.store(true, Ordering::SeqCst);
    // A paused worker must wake up to observe the abort.
    entry.paused.store(false, Ordering::SeqCst);
    Ok(true)
}

pub fn pause(handle: i64) -> Result<bool, RuntimeError> {
    let entry = entry_for(handle)?;
    entry.paused.store(true, Ordering::SeqCst);
    Ok(true)
}

pub fn resume(handle: i64) -> Result<bool, RuntimeError> {
    let entry = entry_for(handle)?;
    entry.paused.store(false, Ordering::SeqCst);
    Ok(true)
}

/// Status string; optionally drops the handle from the table.
pub fn get_status(handle: i64, drop_handle: bool) -> Result<String, RuntimeError> {
    let entry = entry_for(handle)?;
    let status = entry.status.lock().name().to_string();
    if drop_handle {
        HANDLES.lock().remove(&handle);
    }
    Ok(status)
}

pub fn stats() -> String {
    let handles = HANDLES.lock();
    let mut running = 0;
    let mut done = 0;
    let mut cancelled = 0;
    let mut failed = 0;
    let mut queued = 0;
    for entry in handles.values() {
        match *entry.status.lock() {
            ThreadStatus::Queued => queued += 1,
            ThreadStatus::Running => running += 1,
            ThreadStatus::Done => done += 1,
            ThreadStatus::Cancelled => cancelled += 1,
            ThreadStatus::Failed => failed += 1,
        }
    }
    format!(
        "threads: {} total, {} queued, {} running, {} done, {} cancelled, {} failed",
        handles.len(),
        queued,
        running,
        done,
        cancelled,
        failed
    )
}

pub fn thread_name(handle: i64) -> Option<String> {
    HANDLES.lock().get(&handle).map(|e| e.name.clone())
}
