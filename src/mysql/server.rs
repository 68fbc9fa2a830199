use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use super::connection::{ConnState, Connection};
use super::state_machine::{EventLoop, StateMachine};

/// Non-blocking `Read`/`Write` over a tokio socket. Never waits: an unready
/// socket reports `WouldBlock`.
pub struct TokioStream(TcpStream);

impl TokioStream {
    pub fn new(stream: TcpStream) -> Self {
        Self(stream)
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.0
    }
}

impl Read for TokioStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl Write for TokioStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Wait {
    Read,
    Write,
    Planner(Arc<Notify>),
}

/// Records what the connection armed on its last `run_machine` call.
#[derive(Default)]
struct TaskInterest {
    wait: Option<Wait>,
    deregistered: bool,
}

impl EventLoop for TaskInterest {
    fn arm_for_read(&mut self, _connection_id: u32) {
        self.wait = Some(Wait::Read);
    }

    fn arm_for_write(&mut self, _connection_id: u32) {
        self.wait = Some(Wait::Write);
    }

    fn arm_for_planner(&mut self, _connection_id: u32, notify: Arc<Notify>) {
        self.wait = Some(Wait::Planner(notify));
    }

    fn deregister(&mut self, _connection_id: u32) {
        self.wait = None;
        self.deregistered = true;
    }
}

enum Wake {
    Ready(io::Result<()>),
    Shutdown,
    Idle,
}

/// Triggers a graceful stop of a running [`MysqlServer`].
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

pub struct MysqlServer {
    listener: TcpListener,
    machine: Arc<StateMachine>,
    connection_id_counter: Arc<AtomicU32>,
    idle_timeout: Option<Duration>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl MysqlServer {
    pub async fn bind(addr: &str, machine: Arc<StateMachine>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (tx, _) = watch::channel(false);

        Ok(Self {
            listener,
            machine,
            connection_id_counter: Arc::new(AtomicU32::new(1)),
            idle_timeout: None,
            shutdown: Arc::new(tx),
        })
    }

    /// Connections idle longer than `timeout` between commands are closed.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    /// Accepts connections until shutdown is requested, then waits for
    /// every connection task to finish.
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!("MySQL server listening on {}", addr);

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut tasks = JoinSet::new();

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let connection_id = self.connection_id_counter.fetch_add(1, Ordering::SeqCst);
                        info!(connection_id, %peer, "accepted connection");

                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(connection_id, error = %e, "set_nodelay failed");
                        }

                        let conn = Connection::new(TokioStream::new(stream), connection_id);
                        tasks.spawn(drive_connection(
                            self.machine.clone(),
                            conn,
                            self.shutdown.subscribe(),
                            self.idle_timeout,
                        ));
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                _ = shutdown_rx.changed() => {}
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("connection task failed: {}", e);
                    }
                }
            }
        }

        info!(active = tasks.len(), "MySQL server stopping, draining connections");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("connection task failed: {}", e);
            }
        }
        info!("MySQL server stopped");
        Ok(())
    }
}

/// Runs one connection to completion: step the machine, then wait for
/// exactly the readiness it armed.
async fn drive_connection(
    machine: Arc<StateMachine>,
    mut conn: Connection<TokioStream>,
    mut shutdown: watch::Receiver<bool>,
    idle_timeout: Option<Duration>,
) {
    let mut interest = TaskInterest::default();
    let mut stopping = false;

    loop {
        let shutting_down = stopping || *shutdown.borrow_and_update();
        let state = machine.run_machine(&mut conn, &mut interest, shutting_down);
        if state == ConnState::Closing || interest.deregistered {
            break;
        }

        let Some(wait) = interest.wait.take() else {
            // A cycle finished with more input possibly buffered.
            tokio::task::yield_now().await;
            continue;
        };

        let idle_limit = match (&wait, state) {
            (Wait::Read, ConnState::PacketWait | ConnState::AuthPending) => idle_timeout,
            _ => None,
        };

        let wake = {
            let socket = conn.stream().get_ref();
            let ready = async {
                match wait {
                    Wait::Read => socket.readable().await,
                    Wait::Write => socket.writable().await,
                    Wait::Planner(notify) => {
                        notify.notified().await;
                        Ok(())
                    }
                }
            };
            let idle = async {
                match idle_limit {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                ready = ready => Wake::Ready(ready),
                _ = shutdown.changed(), if !shutting_down => Wake::Shutdown,
                _ = idle => Wake::Idle,
            }
        };

        match wake {
            Wake::Ready(Ok(())) => {}
            Wake::Ready(Err(e)) => {
                warn!(connection_id = conn.id(), error = %e, "socket readiness failed");
                machine.client_free(&mut conn, &mut interest);
                break;
            }
            Wake::Shutdown => stopping = true,
            Wake::Idle => {
                info!(connection_id = conn.id(), "closing idle connection");
                machine.client_free(&mut conn, &mut interest);
                break;
            }
        }
    }

    debug!(connection_id = conn.id(), "connection task finished");
}
