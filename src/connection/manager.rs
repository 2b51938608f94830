//! Connection manager with persistent connections and automatic reconnection

use super::watchdog;
use crate::events::PacketDispatcher;
use crate::transport::{Dialer, TcpDialer, TransportStream};
use crate::util::WaitableLatch;
use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use rover_shared::{
    codec, timing, ClientOptions, Command, ConnectionState, FrameDecoder, LinkEvent,
    LinkStateMachine, ManualDrivePacket, Packet, TransitionResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Rover controller host
    pub host: String,
    /// Rover controller port (shared by both sockets)
    pub port: u16,
    /// Telemetry subscriptions sent in the handshake
    pub options: ClientOptions,
    /// Connection timeout, per socket
    pub connect_timeout: Duration,
    /// Delay between connection attempts
    pub reconnect_backoff: Duration,
    /// Drop the link if nothing is received for this long
    pub watchdog_timeout: Duration,
    /// Number of receive gaps used for quality statistics
    pub quality_window: usize,
    /// How long dispose waits for each background task before aborting it
    pub dispose_timeout: Duration,
    /// Outbound command queue depth per session
    pub command_queue: usize,
}

impl ConnectionConfig {
    /// Default configuration bound to `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// `host:port` string used for dialling
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            options: ClientOptions::LISTEN_DRIVETRAIN | ClientOptions::LISTEN_WHISKERS,
            connect_timeout: Duration::from_millis(timing::CONNECT_TIMEOUT_MS),
            reconnect_backoff: Duration::from_millis(timing::RECONNECT_BACKOFF_MS),
            watchdog_timeout: Duration::from_millis(timing::WATCHDOG_TIMEOUT_MS),
            quality_window: timing::QUALITY_WINDOW,
            dispose_timeout: Duration::from_millis(timing::DISPOSE_TIMEOUT_MS),
            command_queue: 64,
        }
    }
}

/// Handle to the live session, published by the connect loop
struct LinkHandle {
    commands: mpsc::Sender<Command>,
    close: Arc<Notify>,
    opened_at: Instant,
}

/// State shared between the manager, the connect loop and the watchdog
pub(crate) struct Shared {
    pub(crate) config: ConnectionConfig,
    dialer: Arc<dyn Dialer>,
    pub(crate) dispatcher: Arc<PacketDispatcher>,
    running: watch::Sender<bool>,
    disposed: AtomicBool,
    state: watch::Sender<ConnectionState>,
    start_latch: WaitableLatch,
    pub(crate) receive_latch: WaitableLatch,
    options: Mutex<ClientOptions>,
    link: Mutex<Option<LinkHandle>>,
}

impl Shared {
    pub(crate) fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn stop(&self) {
        self.running.send_replace(false);
    }

    /// Force-close the active link
    pub(crate) fn close_link(&self) -> Result<()> {
        let link = self.link.lock();
        let link = link.as_ref().ok_or_else(|| anyhow!("No active link to close"))?;
        link.close.notify_one();
        Ok(())
    }

    /// When the active link was established, if there is one
    pub(crate) fn link_opened_at(&self) -> Option<Instant> {
        self.link.lock().as_ref().map(|link| link.opened_at)
    }

    /// Queue a command on the live session
    fn send(&self, command: Command) -> Result<()> {
        let link = self.link.lock();
        let link = link.as_ref().ok_or_else(|| anyhow!("Not connected"))?;
        link.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => anyhow!("Command queue full"),
            TrySendError::Closed(_) => anyhow!("Not connected"),
        })
    }

    fn transition(&self, fsm: &mut LinkStateMachine, event: LinkEvent) {
        match fsm.process_event(event) {
            TransitionResult::Success(next) => {
                self.state.send_if_modified(|current| {
                    if *current == next {
                        return false;
                    }
                    debug!("Link state: {} -> {}", current, next);
                    *current = next;
                    true
                });
            }
            TransitionResult::Invalid { from, event } => {
                warn!("Ignoring invalid link transition {:?} from {}", event, from);
            }
        }
    }
}

struct Tasks {
    connect: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

/// Manages the primary and drive sockets to one rover
///
/// Lifecycle: [`start`](Self::start) arms the manager, [`stop`](Self::stop)
/// parks it (resumable), [`dispose`](Self::dispose) shuts it down for good.
/// Connection failures are never surfaced as errors; they show up as status
/// events on the [`PacketDispatcher`] and are retried automatically.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    tasks: Mutex<Option<Tasks>>,
}

impl ConnectionManager {
    /// Create a TCP connection manager for `host:port` with default settings
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_config(ConnectionConfig::new(host, port))
    }

    /// Create a TCP connection manager
    pub fn with_config(config: ConnectionConfig) -> Self {
        Self::with_dialer(config, Arc::new(TcpDialer::new()))
    }

    /// Create a connection manager using a custom transport
    pub fn with_dialer(config: ConnectionConfig, dialer: Arc<dyn Dialer>) -> Self {
        let (running, _) = watch::channel(false);
        let (state, _) = watch::channel(ConnectionState::Idle);
        let options = config.options;

        let shared = Arc::new(Shared {
            config,
            dialer,
            dispatcher: Arc::new(PacketDispatcher::new()),
            running,
            disposed: AtomicBool::new(false),
            state,
            start_latch: WaitableLatch::new(false),
            receive_latch: WaitableLatch::new(false),
            options: Mutex::new(options),
            link: Mutex::new(None),
        });

        Self {
            shared,
            tasks: Mutex::new(None),
        }
    }

    /// Arm the manager, spawning the background tasks on first use
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if self.shared.is_disposed() {
            warn!("Ignoring start on a disposed connection manager");
            return;
        }

        self.shared.running.send_replace(true);
        self.shared.start_latch.set();

        let mut tasks = self.tasks.lock();
        if tasks.is_none() {
            info!(
                "Starting connection tasks for {} via {}",
                self.shared.config.address(),
                self.shared.dialer.name()
            );
            *tasks = Some(Tasks {
                connect: tokio::spawn(connection_loop(self.shared.clone())),
                watchdog: tokio::spawn(watchdog::run(self.shared.clone())),
            });
        }
    }

    /// Park the manager after the current attempt; resumable with `start`
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Shut down for good, waiting (bounded) for the background tasks
    pub async fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop();
        self.shared.start_latch.set();
        self.shared.receive_latch.set();
        if let Err(e) = self.shared.close_link() {
            debug!("Dispose: {}", e);
        }

        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            let limit = self.shared.config.dispose_timeout;
            join_or_abort("connect loop", tasks.connect, limit).await;
            join_or_abort("watchdog", tasks.watchdog, limit).await;
        }

        info!("Connection manager disposed");
    }

    /// Queue a drive command on the drive socket
    pub fn send_drive(&self, left: f64, right: f64) -> Result<()> {
        self.shared
            .send(Command::Drive(ManualDrivePacket::new(left, right)))
    }

    /// Ask the rover for a health report
    pub fn request_health(&self) -> Result<()> {
        self.shared.send(Command::GetHealth)
    }

    /// Ask the rover for its geometry
    pub fn request_characteristics(&self) -> Result<()> {
        self.shared.send(Command::GetCharacteristics)
    }

    /// Change telemetry subscriptions, now if connected and on every later handshake
    pub fn set_options(&self, options: ClientOptions) -> Result<()> {
        *self.shared.options.lock() = options;
        if self.is_connected() {
            self.shared.send(Command::SetOptions(options))?;
        }
        Ok(())
    }

    pub fn options(&self) -> ClientOptions {
        *self.shared.options.lock()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Watch channel following every state transition
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Event fan-out for packets and connection updates
    pub fn dispatcher(&self) -> &Arc<PacketDispatcher> {
        &self.shared.dispatcher
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.get_mut().take() {
            self.shared.disposed.store(true, Ordering::SeqCst);
            self.shared.stop();
            self.shared.start_latch.set();
            self.shared.receive_latch.set();
            tasks.connect.abort();
            tasks.watchdog.abort();
        }
    }
}

async fn join_or_abort(name: &str, mut handle: JoinHandle<()>, limit: Duration) {
    match timeout(limit, &mut handle).await {
        Ok(Ok(())) => debug!("{} finished", name),
        Ok(Err(e)) => error!("{} task failed: {}", name, e),
        Err(_) => {
            warn!("{} did not stop within {:?}, cancelling", name, limit);
            handle.abort();
        }
    }
}

/// Main connection loop with reconnection logic
async fn connection_loop(shared: Arc<Shared>) {
    let mut fsm = LinkStateMachine::new();
    let addr = shared.config.address();

    while !shared.is_disposed() {
        shared.start_latch.wait().await;
        if shared.is_disposed() {
            break;
        }
        shared.start_latch.reset();

        while shared.is_running() && !shared.is_disposed() {
            shared.transition(&mut fsm, LinkEvent::Dial);
            info!("Trying to connect to {}", addr);

            match open_link(&shared, &addr).await {
                Ok((primary, drive)) => {
                    let (commands_tx, commands_rx) = mpsc::channel(shared.config.command_queue);
                    let close = Arc::new(Notify::new());
                    *shared.link.lock() = Some(LinkHandle {
                        commands: commands_tx,
                        close: close.clone(),
                        opened_at: Instant::now(),
                    });

                    shared.transition(&mut fsm, LinkEvent::Established);
                    info!("Connected to {}", addr);
                    shared.dispatcher.dispatch_status(true);

                    let result = run_session(&shared, primary, drive, commands_rx, &close).await;

                    shared.transition(&mut fsm, LinkEvent::Lost);
                    *shared.link.lock() = None;
                    shared.dispatcher.dispatch_status(false);

                    match result {
                        Ok(()) => info!("Disconnected from {}", addr),
                        Err(e) => warn!("Lost connection with {}: {:#}", addr, e),
                    }
                }
                Err(e) => {
                    warn!("Connection attempt failed: {:#}", e);
                    shared.transition(&mut fsm, LinkEvent::AttemptFailed);
                    shared.dispatcher.dispatch_status(false);
                }
            }

            if shared.is_running() && !shared.is_disposed() {
                tokio::time::sleep(shared.config.reconnect_backoff).await;
            }
        }

        shared.transition(&mut fsm, LinkEvent::Park);
        debug!("Connect loop parked");
    }

    shared.transition(&mut fsm, LinkEvent::Park);
    info!("Connect loop exiting");
}

/// Dial one socket within the connect timeout
async fn dial(shared: &Shared, addr: &str, role: &str) -> Result<Box<dyn TransportStream>> {
    let limit = shared.config.connect_timeout;
    match timeout(limit, shared.dialer.dial(addr)).await {
        Ok(result) => result.with_context(|| format!("{} socket", role)),
        Err(_) => Err(anyhow!("{} socket timed out after {:?}", role, limit)),
    }
}

/// Open the primary and drive sockets
async fn open_link(
    shared: &Shared,
    addr: &str,
) -> Result<(Box<dyn TransportStream>, Box<dyn TransportStream>)> {
    let mut primary = dial(shared, addr, "primary").await?;
    match dial(shared, addr, "drive").await {
        Ok(drive) => Ok((primary, drive)),
        Err(e) => {
            if let Err(close_err) = TransportStream::shutdown(&mut *primary).await {
                debug!("Failed to close primary socket: {}", close_err);
            }
            Err(e)
        }
    }
}

async fn write_command<W>(writer: &mut W, command: &Command) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&codec::encode_command(command)).await?;
    writer.flush().await?;
    Ok(())
}

/// Run an established session until it fails, is closed, or the manager stops
async fn run_session(
    shared: &Shared,
    primary: Box<dyn TransportStream>,
    mut drive: Box<dyn TransportStream>,
    mut commands: mpsc::Receiver<Command>,
    close: &Notify,
) -> Result<()> {
    let (mut reader, mut writer) = tokio::io::split(primary);

    let result = session_loop(
        shared,
        &mut reader,
        &mut writer,
        &mut drive,
        &mut commands,
        close,
    )
    .await;

    let mut primary = reader.unsplit(writer);
    for (role, stream) in [("primary", &mut primary), ("drive", &mut drive)] {
        if let Err(e) = TransportStream::shutdown(&mut **stream).await {
            debug!("Failed to close {} socket: {}", role, e);
        }
    }

    result
}

async fn session_loop<R, W>(
    shared: &Shared,
    reader: &mut R,
    writer: &mut W,
    drive: &mut Box<dyn TransportStream>,
    commands: &mut mpsc::Receiver<Command>,
    close: &Notify,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Handshake
    let options = *shared.options.lock();
    write_command(writer, &Command::GetCharacteristics)
        .await
        .context("Handshake failed")?;
    write_command(writer, &Command::SetOptions(options))
        .await
        .context("Handshake failed")?;

    let mut decoder = FrameDecoder::<Packet>::new();
    let mut read_buf = vec![0u8; 4096];
    let mut running = shared.running.subscribe();

    loop {
        if !*running.borrow_and_update() {
            return Ok(());
        }

        tokio::select! {
            result = reader.read(&mut read_buf) => {
                let n = result.context("Read error")?;
                if n == 0 {
                    bail!("Rover closed connection");
                }

                shared.receive_latch.set();
                decoder.extend(&read_buf[..n]);

                while let Some(decoded) = decoder.decode_next() {
                    match decoded {
                        Ok(packet) => {
                            debug!("Received {} packet", packet.tag());
                            shared.dispatcher.dispatch_packet(&packet);
                        }
                        Err(e) => warn!("Dropped line: {}", e),
                    }
                }
            }

            Some(command) = commands.recv() => {
                if command.uses_drive_socket() {
                    write_command(&mut **drive, &command)
                        .await
                        .context("Drive socket write failed")?;
                } else {
                    write_command(writer, &command)
                        .await
                        .context("Write failed")?;
                }
            }

            _ = close.notified() => {
                bail!("Link force-closed");
            }

            changed = running.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{PendingDialer, ScriptedDialer};
    use crate::events::ConnectionUpdate;
    use rover_shared::HealthPacket;
    use tokio::io::DuplexStream;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(1),
            dispose_timeout: Duration::from_secs(2),
            ..ConnectionConfig::new("rover.test", 8080)
        }
    }

    fn collect_updates(
        manager: &ConnectionManager,
    ) -> mpsc::UnboundedReceiver<ConnectionUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        manager.dispatcher().add_connection_listener(move |update| {
            let _ = tx.send(*update);
        });
        rx
    }

    async fn next_status(rx: &mut mpsc::UnboundedReceiver<ConnectionUpdate>) -> bool {
        loop {
            let update = timeout(Duration::from_secs(3), rx.recv())
                .await
                .expect("timed out waiting for status")
                .expect("update channel closed");
            if let ConnectionUpdate::Status { connected } = update {
                return connected;
            }
        }
    }

    async fn wait_for_state(manager: &ConnectionManager, target: ConnectionState) {
        let mut rx = manager.subscribe_state();
        timeout(Duration::from_secs(3), rx.wait_for(|state| *state == target))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    async fn next_peer(rx: &mut mpsc::UnboundedReceiver<DuplexStream>) -> DuplexStream {
        timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("timed out waiting for dial")
            .expect("dialer dropped")
    }

    #[test]
    fn test_config_address() {
        let config = ConnectionConfig::new("10.0.0.7", 4242);
        assert_eq!(config.address(), "10.0.0.7:4242");
        assert_eq!(config.reconnect_backoff, Duration::from_millis(100));
        assert_eq!(config.options.bits(), 3);
    }

    #[tokio::test]
    async fn test_retries_until_connected() {
        let (dialer, _peers) = ScriptedDialer::new([false, false]);
        let dialer = Arc::new(dialer);
        let manager = ConnectionManager::with_dialer(test_config(), dialer.clone());
        let mut updates = collect_updates(&manager);

        manager.start();

        let mut statuses = Vec::new();
        loop {
            let connected = next_status(&mut updates).await;
            statuses.push(connected);
            if connected {
                break;
            }
        }
        assert_eq!(statuses, vec![false, false, true]);

        // Two failed primary dials, then primary + drive
        let times = dialer.dial_times();
        assert_eq!(times.len(), 4);
        assert!(times[1] - times[0] >= Duration::from_millis(100));
        assert!(times[2] - times[1] >= Duration::from_millis(100));
        assert!(manager.is_connected());

        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_handshake_and_packet_delivery() {
        let (dialer, mut peers) = ScriptedDialer::always_succeeds();
        let manager = ConnectionManager::with_dialer(test_config(), Arc::new(dialer));

        let (packet_tx, mut packet_rx) = mpsc::unbounded_channel();
        manager.dispatcher().add_packet_listener(move |packet| {
            let _ = packet_tx.send(packet.clone());
        });

        manager.start();
        let mut primary = next_peer(&mut peers).await;
        let _drive = next_peer(&mut peers).await;

        let mut handshake = [0u8; 20];
        primary.read_exact(&mut handshake).await.expect("handshake");
        assert_eq!(&handshake, b"GETCHARS:\nSETOPTS:3\n");

        primary
            .write_all(b"HEALTH:42.5|1024|4096\nDRIVE:1.0|2.0\nWHI")
            .await
            .expect("write");
        primary.write_all(b"SKR:1|2|3|4|5|6\n").await.expect("write");

        let first = timeout(Duration::from_secs(3), packet_rx.recv())
            .await
            .expect("timed out")
            .expect("closed");
        assert_eq!(
            first,
            Packet::Health(HealthPacket {
                temp: 42.5,
                memory_used: 1024,
                memory_total: 4096,
            })
        );

        // The malformed DRIVE line is skipped
        let second = timeout(Duration::from_secs(3), packet_rx.recv())
            .await
            .expect("timed out")
            .expect("closed");
        assert!(matches!(second, Packet::Whiskers(w) if w.sensors == [1, 2, 3, 4, 5, 6]));
        assert!(manager.is_connected());

        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_commands_are_routed_to_their_socket() {
        let (dialer, mut peers) = ScriptedDialer::always_succeeds();
        let manager = ConnectionManager::with_dialer(test_config(), Arc::new(dialer));

        assert!(manager.send_drive(0.5, 0.5).is_err(), "nothing queued while idle");

        manager.start();
        let mut primary = next_peer(&mut peers).await;
        let mut drive = next_peer(&mut peers).await;
        wait_for_state(&manager, ConnectionState::Connected).await;

        manager.send_drive(0.567, -0.004).expect("send drive");
        manager.request_health().expect("request health");

        let mut line = [0u8; 18];
        drive.read_exact(&mut line).await.expect("drive line");
        assert_eq!(&line, b"MDRIVE:0.56|-0.01\n");

        let mut control = [0u8; 31];
        primary.read_exact(&mut control).await.expect("control lines");
        assert_eq!(&control, b"GETCHARS:\nSETOPTS:3\nGETHEALTH:\n");

        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_peer_close_triggers_reconnect() {
        let (dialer, mut peers) = ScriptedDialer::always_succeeds();
        let dialer = Arc::new(dialer);
        let manager = ConnectionManager::with_dialer(test_config(), dialer.clone());
        let mut updates = collect_updates(&manager);

        manager.start();
        assert!(next_status(&mut updates).await);

        let primary = next_peer(&mut peers).await;
        drop(primary);

        assert!(!next_status(&mut updates).await);
        assert!(next_status(&mut updates).await);
        assert_eq!(dialer.dial_count(), 4);

        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_stop_parks_and_start_resumes() {
        let (dialer, _peers) = ScriptedDialer::always_succeeds();
        let dialer = Arc::new(dialer);
        let manager = ConnectionManager::with_dialer(test_config(), dialer.clone());
        let mut updates = collect_updates(&manager);

        manager.start();
        manager.start();
        assert!(next_status(&mut updates).await);

        // A second start must not spawn a second connect loop
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dialer.dial_count(), 2);

        manager.stop();
        assert!(!next_status(&mut updates).await);
        wait_for_state(&manager, ConnectionState::Idle).await;
        assert!(!manager.is_running());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dialer.dial_count(), 2, "parked manager must not dial");

        manager.start();
        assert!(next_status(&mut updates).await);
        assert_eq!(dialer.dial_count(), 4);

        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_is_prompt_and_final() {
        let (dialer, _peers) = ScriptedDialer::always_succeeds();
        let dialer = Arc::new(dialer);
        let manager = ConnectionManager::with_dialer(test_config(), dialer.clone());

        manager.start();
        wait_for_state(&manager, ConnectionState::Connected).await;

        let started = Instant::now();
        manager.dispose().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(manager.is_disposed());
        assert_eq!(manager.state(), ConnectionState::Idle);

        manager.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dialer.dial_count(), 2);
        assert!(manager.send_drive(0.0, 0.0).is_err());
    }

    #[tokio::test]
    async fn test_dispose_cancels_a_stuck_connect_loop() {
        let dialer = Arc::new(PendingDialer::default());
        let config = ConnectionConfig {
            connect_timeout: Duration::from_secs(60),
            dispose_timeout: Duration::from_millis(200),
            ..ConnectionConfig::new("rover.test", 8080)
        };
        let manager = ConnectionManager::with_dialer(config, dialer.clone());

        manager.start();
        timeout(Duration::from_secs(2), async {
            while dialer.dial_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connect loop never dialled");
        assert_eq!(manager.state(), ConnectionState::Connecting);

        // The dial ignores the latches, so the connect loop only ends by abort
        let started = Instant::now();
        timeout(Duration::from_secs(2), manager.dispose())
            .await
            .expect("dispose should be bounded");
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(200), "took {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
        assert!(manager.is_disposed());
        assert_eq!(dialer.dial_count(), 1);
    }

    #[tokio::test]
    async fn test_dispose_without_start() {
        let manager = ConnectionManager::new("127.0.0.1", 9);
        timeout(Duration::from_secs(1), manager.dispose())
            .await
            .expect("dispose should not block");
        assert!(manager.is_disposed());
    }

    #[tokio::test]
    async fn test_set_options_is_used_by_next_handshake() {
        let (dialer, mut peers) = ScriptedDialer::always_succeeds();
        let manager = ConnectionManager::with_dialer(test_config(), Arc::new(dialer));

        manager
            .set_options(ClientOptions::LISTEN_WHISKERS)
            .expect("set options while idle");
        assert_eq!(manager.options(), ClientOptions::LISTEN_WHISKERS);

        manager.start();
        let mut primary = next_peer(&mut peers).await;

        let mut handshake = [0u8; 20];
        primary.read_exact(&mut handshake).await.expect("handshake");
        assert_eq!(&handshake, b"GETCHARS:\nSETOPTS:2\n");

        manager.dispose().await;
    }
}
