//! Process supervisor for one session's synth.

use super::{
    ClientName, ClientNameSlot, OscControl, ReadinessMatcher, SupervisorState, Synth,
    SynthCatalog, SynthFactory, SynthLaunchConfig, SynthSettings,
};
use crate::error::SessionError;
use crate::ports::PortRouter;
use crate::session::SessionId;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::UdpSocket;
use tokio::process::Child;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Node id used for the playing synth.
const PLAY_NODE_ID: i32 = 1;

/// How long a process gets to honour `/quit` before it is killed.
const QUIT_GRACE: Duration = Duration::from_millis(500);

type SharedLog = Arc<Mutex<File>>;

/// Resources owned while a process is (or was) running.
#[derive(Default)]
struct Running {
    control_port: Option<u16>,
    child: Option<Child>,
    log: Option<SharedLog>,
    readers: Vec<JoinHandle<()>>,
    client_name: Option<String>,
}

pub struct SynthSupervisor {
    session_id: SessionId,
    settings: Arc<SynthSettings>,
    router: Arc<PortRouter>,
    matcher: Arc<dyn ReadinessMatcher>,
    catalog: SynthCatalog,
    client_name: ClientNameSlot,
    state: watch::Sender<SupervisorState>,
    control_port: watch::Sender<Option<u16>>,
    current_synth: watch::Sender<Option<String>>,
    running: Mutex<Running>,
}

impl SynthSupervisor {
    pub fn new(
        session_id: SessionId,
        settings: Arc<SynthSettings>,
        router: Arc<PortRouter>,
        matcher: Arc<dyn ReadinessMatcher>,
    ) -> Self {
        let catalog = SynthCatalog::new(&settings.synthdef_dir, &settings.synth_source_dir);
        Self {
            session_id,
            settings,
            router,
            matcher,
            catalog,
            client_name: ClientNameSlot::new(),
            state: watch::channel(SupervisorState::NotStarted).0,
            control_port: watch::channel(None).0,
            current_synth: watch::channel(None).0,
            running: Mutex::new(Running::default()),
        }
    }

    fn set_state(&self, state: SupervisorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("[{}] synth {} -> {}", self.session_id, previous, state);
        }
    }

    /// Grab a free UDP port by binding and releasing it.
    async fn allocate_control_port(&self) -> Result<u16, SessionError> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| SessionError::SpawnFailed {
                program: self.settings.synth.binary.clone(),
                reason: format!("no free control port: {}", e),
            })?;
        let port = socket
            .local_addr()
            .map_err(|e| SessionError::SpawnFailed {
                program: self.settings.synth.binary.clone(),
                reason: format!("no free control port: {}", e),
            })?
            .port();
        Ok(port)
    }

    async fn spawn(
        &self,
        launch: &SynthLaunchConfig,
        running: &mut Running,
    ) -> Result<mpsc::UnboundedReceiver<String>, SessionError> {
        let spawn_failed = |reason: String| SessionError::SpawnFailed {
            program: launch.program().to_string(),
            reason,
        };

        if let Some(dir) = launch.log_path().parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| spawn_failed(format!("log dir {}: {}", dir.display(), e)))?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(launch.log_path())
            .await
            .map_err(|e| spawn_failed(format!("log file {}: {}", launch.log_path().display(), e)))?;
        let log = Arc::new(Mutex::new(log));

        let mut child = launch
            .command()
            .spawn()
            .map_err(|e| spawn_failed(e.to_string()))?;

        info!(
            "🎵 [{}] spawned {} (pid {:?}) on control port {}",
            self.session_id,
            launch.program(),
            child.id(),
            launch.control_port()
        );

        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            running
                .readers
                .push(pump_output(stdout, log.clone(), lines_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            running
                .readers
                .push(pump_output(stderr, log.clone(), lines_tx));
        }

        running.child = Some(child);
        running.log = Some(log);
        Ok(lines_rx)
    }

    /// Ready means the client name was announced and `/status` was answered.
    async fn await_ready(
        &self,
        mut lines: mpsc::UnboundedReceiver<String>,
        control: OscControl,
    ) -> Result<String, SessionError> {
        let status_interval = self.settings.status_interval();
        let mut ticker = interval(status_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let wait = async {
            let mut name: Option<String> = None;
            loop {
                tokio::select! {
                    line = lines.recv(), if name.is_none() => match line {
                        Some(line) => {
                            if let Some(found) = self.matcher.client_name(&line) {
                                info!("[{}] synth client name is {}", self.session_id, found);
                                self.client_name.resolve(found.clone());
                                name = Some(found);
                            }
                        }
                        None => {
                            warn!("[{}] synth output closed before readiness", self.session_id);
                            return Err(SessionError::SpawnFailed {
                                program: self.settings.synth.binary.clone(),
                                reason: "process exited before announcing its client name".to_string(),
                            });
                        }
                    },
                    _ = ticker.tick() => {
                        if let Some(name) = &name {
                            match control.status(status_interval).await {
                                Ok(()) => return Ok(name.clone()),
                                Err(e) => debug!("[{}] status not answered yet: {}", self.session_id, e),
                            }
                        }
                    }
                }
            }
        };

        timeout(self.settings.readiness_timeout(), wait)
            .await
            .map_err(|_| SessionError::ReadinessTimeout(self.settings.readiness_timeout()))?
    }

    async fn launch(&self, running: &mut Running) -> Result<(), SessionError> {
        let id = self.session_id.as_str();

        let port = self.allocate_control_port().await?;
        running.control_port = Some(port);
        self.control_port.send_replace(Some(port));
        self.set_state(SupervisorState::PortAllocated);

        self.set_state(SupervisorState::WaitingForUpstreamPorts);
        self.router.wait_for_upstream_ports(id).await?;

        let launch = SynthLaunchConfig::new(&self.settings, id, port)?;
        let lines = self.spawn(&launch, running).await?;
        self.set_state(SupervisorState::ProcessSpawned);

        self.set_state(SupervisorState::WaitingForReadySignal);
        let client = self.await_ready(lines, OscControl::new(port)).await?;
        running.client_name = Some(client.clone());

        self.set_state(SupervisorState::WaitingForOwnPorts);
        self.router.wait_for_client_ports(&client).await?;
        self.router
            .connect_synth_outputs(id, &client, launch.channels())
            .await?;
        self.set_state(SupervisorState::PortsConnected);

        self.set_state(SupervisorState::Running);
        info!("🎵 [{}] synth running as {}", id, client);
        Ok(())
    }

    /// Tear down whatever `running` holds. Every step runs even if an
    /// earlier one failed.
    async fn release(&self, running: &mut Running) -> Vec<String> {
        let id = self.session_id.as_str();
        let mut failures = Vec::new();

        // Ports go first so the quitting process can't race the disconnect.
        match self
            .router
            .disconnect_session_ports(id, running.client_name.as_deref())
            .await
        {
            Ok(n) => debug!("[{}] disconnected {} port pair(s)", id, n),
            Err(e) => {
                warn!("[{}] port disconnect during stop: {}", id, e);
                failures.push(e.to_string());
            }
        }

        if let Some(port) = running.control_port.take() {
            match OscControl::new(port).quit().await {
                Ok(()) => debug!("[{}] sent /quit", id),
                Err(e) => {
                    warn!("[{}] failed to send /quit: {}", id, e);
                    failures.push(e.to_string());
                }
            }
        }

        for reader in running.readers.drain(..) {
            reader.abort();
        }
        if let Some(log) = running.log.take() {
            if let Err(e) = log.lock().await.flush().await {
                warn!("[{}] failed to flush synth log: {}", id, e);
                failures.push(format!("log flush: {}", e));
            }
        }

        if let Some(mut child) = running.child.take() {
            match timeout(QUIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!("[{}] synth exited: {}", id, status),
                _ => {
                    if let Err(e) = child.kill().await {
                        warn!("[{}] failed to kill synth: {}", id, e);
                        failures.push(format!("kill: {}", e));
                    } else {
                        debug!("[{}] synth killed", id);
                    }
                }
            }
        }

        running.client_name = None;
        self.client_name.reset();
        self.control_port.send_replace(None);
        self.current_synth.send_replace(None);
        failures
    }
}

/// Copy one output stream into the log file and the readiness channel.
fn pump_output<R>(
    stream: R,
    log: SharedLog,
    lines_tx: mpsc::UnboundedSender<String>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            {
                let mut file = log.lock().await;
                if file.write_all(line.as_bytes()).await.is_err()
                    || file.write_all(b"\n").await.is_err()
                {
                    break;
                }
            }
            // Nobody listens once the synth is ready.
            let _ = lines_tx.send(line);
        }
    })
}

#[async_trait]
impl Synth for SynthSupervisor {
    async fn start(&self) -> Result<(), SessionError> {
        let mut running = self.running.lock().await;

        if *self.state.borrow() == SupervisorState::Running {
            debug!("[{}] synth already running", self.session_id);
            return Ok(());
        }
        if !self.state.borrow().is_idle() {
            let leftovers = self.release(&mut running).await;
            if !leftovers.is_empty() {
                debug!("[{}] cleanup before restart: {:?}", self.session_id, leftovers);
            }
        }

        self.client_name.reset();
        let result = self.launch(&mut running).await;
        if let Err(e) = &result {
            warn!("[{}] synth start failed in {}: {}", self.session_id, *self.state.borrow(), e);
        }
        result
    }

    async fn stop(&self) -> Result<(), SessionError> {
        let mut running = self.running.lock().await;

        if self.state.borrow().is_idle() {
            debug!("[{}] synth stop: nothing running", self.session_id);
            return Ok(());
        }

        self.set_state(SupervisorState::Stopping);
        let failures = self.release(&mut running).await;
        self.set_state(SupervisorState::Stopped);
        info!("[{}] synth stopped", self.session_id);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SessionError::CleanupError(failures.join("; ")))
        }
    }

    fn control_port(&self) -> Option<u16> {
        *self.control_port.borrow()
    }

    async fn send_play_message(&self) -> Result<String, SessionError> {
        let port = self
            .control_port()
            .ok_or_else(|| SessionError::ControlFailed("synth has no control port".to_string()))?;
        let catalog = self.catalog.clone();
        let synthdef = tokio::task::spawn_blocking(move || catalog.pick_random())
            .await
            .map_err(|e| SessionError::ControlFailed(format!("synthdef scan: {}", e)))??;

        OscControl::new(port).new_synth(&synthdef, PLAY_NODE_ID).await?;
        self.current_synth.send_replace(Some(synthdef.clone()));

        info!("🎵 [{}] playing {}", self.session_id, synthdef);
        Ok(synthdef)
    }

    fn client_name(&self) -> ClientName {
        self.client_name.subscribe()
    }

    fn current_synth(&self) -> Option<String> {
        self.current_synth.borrow().clone()
    }

    fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }
}

/// Builds a `SynthSupervisor` per session from shared settings.
pub struct SupervisorFactory {
    settings: Arc<SynthSettings>,
    router: Arc<PortRouter>,
    matcher: Arc<dyn ReadinessMatcher>,
}

impl SupervisorFactory {
    pub fn new(
        settings: Arc<SynthSettings>,
        router: Arc<PortRouter>,
        matcher: Arc<dyn ReadinessMatcher>,
    ) -> Self {
        Self {
            settings,
            router,
            matcher,
        }
    }
}

impl SynthFactory for SupervisorFactory {
    fn build(&self, session_id: &SessionId) -> Arc<dyn Synth> {
        Arc::new(SynthSupervisor::new(
            session_id.clone(),
            self.settings.clone(),
            self.router.clone(),
            self.matcher.clone(),
        ))
    }
}
