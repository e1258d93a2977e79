use crate::error::ModemError;
use crate::modem::session::AtResponse;
use crate::modem::transport::SerialTransport;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

type Task = Box<dyn FnOnce(&mut SerialTransport) + Send>;

enum Job {
    Run { label: String, task: Task },
    Shutdown,
}

/// Cloneable submission side of the serial execution queue. Every user of
/// the modem (RPC handlers, the recovery controller, startup) goes through
/// one of these; jobs run one at a time in submission order.
#[derive(Clone)]
pub struct ExecutorHandle {
    tx: Sender<Job>,
    queue_timeout: Duration,
}

/// A submitted job whose reply has not been collected yet.
pub struct Pending<T = AtResponse> {
    label: String,
    rx: Receiver<Result<T, ModemError>>,
    wait_limit: Duration,
}

impl<T> Pending<T> {
    pub fn wait(self) -> Result<T, ModemError> {
        match self.rx.recv_timeout(self.wait_limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ModemError::QueueTimeout {
                command: self.label,
                waited: self.wait_limit,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ModemError::ExecutorClosed),
        }
    }
}

impl ExecutorHandle {
    // Queue one AT command without waiting for it.
    pub fn submit(&self, command: &str, timeout: Duration) -> Pending {
        let owned = command.to_string();
        self.submit_task(command, timeout, move |transport| {
            transport.execute(&owned, timeout)
        })
    }

    pub fn execute(&self, command: &str, timeout: Duration) -> Result<AtResponse, ModemError> {
        self.submit(command, timeout).wait()
    }

    // Run a multi-step operation with exclusive use of the transport. Nothing
    // else reaches the wire until `task` returns.
    pub fn exclusive<T, F>(&self, label: &str, budget: Duration, task: F) -> Result<T, ModemError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SerialTransport) -> Result<T, ModemError> + Send + 'static,
    {
        self.submit_task(label, budget, task).wait()
    }

    // Jobs already queued still run; later submissions fail with `ExecutorClosed`.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Job::Shutdown);
    }

    fn submit_task<T, F>(&self, label: &str, budget: Duration, task: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SerialTransport) -> Result<T, ModemError> + Send + 'static,
    {
        let (reply, rx) = mpsc::channel();
        let task: Task = Box::new(move |transport| {
            // The caller may have given up waiting; that is fine.
            let _ = reply.send(task(transport));
        });
        // On a closed queue the job (and its reply sender) is dropped, so `wait` reports ExecutorClosed.
        let _ = self.tx.send(Job::Run {
            label: label.to_string(),
            task,
        });
        Pending {
            label: label.to_string(),
            rx,
            wait_limit: self.queue_timeout + budget,
        }
    }
}

// Move the transport onto its own worker thread and return the queue handle.
pub fn spawn_executor(
    transport: SerialTransport,
    queue_timeout: Duration,
) -> (ExecutorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<Job>();
    let handle = thread::spawn(move || executor_loop(transport, rx));
    (ExecutorHandle { tx, queue_timeout }, handle)
}

fn executor_loop(mut transport: SerialTransport, rx: Receiver<Job>) {
    info!("serial executor started");
    while let Ok(job) = rx.recv() {
        match job {
            Job::Run { label, task } => {
                let started = Instant::now();
                task(&mut transport);
                debug!(
                    label,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job finished"
                );
            }
            Job::Shutdown => break,
        }
    }
    let path = transport.current_path().map(str::to_string);
    transport.release();
    info!(path = ?path, "serial executor stopped");
}
