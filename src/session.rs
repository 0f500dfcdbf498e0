//! Session state machine.
//!
//! A session is split into a cheap, cloneable [`ImapSession`] handle and a
//! driver task that owns the transport. The driver is the single writer:
//! every state transition, outbound frame, and request mutation happens on
//! it, and submissions from other tasks are queued over to it. At most one
//! command is in flight; the pending slot holds it from submission until
//! its tagged completion, with IDLE staying pending until it is terminated
//! with `DONE`.
//!
//! Inbound bytes flow `transport → (inflate) → framer → classification`.
//! The DEFLATE stage is spliced in when a COMPRESS command completes OK,
//! before any byte that followed the completion line is framed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::capability::Capability;
use crate::codec::ResponseFramer;
use crate::compress::DeflateState;
use crate::core::{Tag, TagGenerator};
use crate::error::{FailureType, ImapClientError};
use crate::future::{self, Completer, ImapFuture};
use crate::request::{CommandType, ImapRequest, SimpleCommand};
use crate::response::{CommandResponse, ContinuationRequest, ServerResponse, TaggedResponse};

/// Logging posture of a session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DebugMode {
    /// No per-frame logging.
    #[default]
    None,
    /// Log frames at debug level; sensitive frames are replaced by their
    /// redaction-safe labels.
    DebugWithRedaction,
}

/// Per-session configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Embedded in every error and log line for correlation.
    pub session_id: u64,
    pub debug_mode: DebugMode,
    /// Fail the pending command when no bytes arrive for this long.
    /// `None` disables the timer. IDLE is exempt from it.
    pub read_idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: 0,
            debug_mode: DebugMode::None,
            read_idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// The logger handed to requests during continuation handling. Sensitive
/// payloads must never reach it; commands log their redaction-safe
/// [`debug_line`](crate::request::ImapRequest::debug_line) instead.
#[derive(Clone, Debug)]
pub struct SessionLogger {
    session_id: u64,
    mode: DebugMode,
}

impl SessionLogger {
    pub fn new(session_id: u64, mode: DebugMode) -> Self {
        Self { session_id, mode }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn is_debug_enabled(&self) -> bool {
        self.mode == DebugMode::DebugWithRedaction
    }

    pub fn debug(&self, message: &str) {
        if self.is_debug_enabled() {
            debug!(session_id = self.session_id, "{message}");
        }
    }
}

enum Directive {
    Submit {
        request: Box<dyn ImapRequest>,
        completer: Completer<CommandResponse>,
    },
    Terminate,
}

/// Handle to a live session. Cloning is cheap; all clones feed the same
/// driver task.
#[derive(Clone, Debug)]
pub struct ImapSession {
    directives: mpsc::UnboundedSender<Directive>,
    busy: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    capabilities: Arc<RwLock<Option<Arc<Capability>>>>,
    session_id: u64,
}

impl ImapSession {
    /// Submits a command for execution.
    ///
    /// Fails immediately with [`FailureType::CommandInProgress`] while
    /// another command is pending (including an unterminated IDLE and the
    /// automatic capability refresh), and with
    /// [`FailureType::ConnectionInactive`] once the session is terminal.
    pub fn submit<R>(&self, request: R) -> Result<ImapFuture<CommandResponse>, ImapClientError>
    where
        R: ImapRequest + 'static,
    {
        self.submit_boxed(Box::new(request))
    }

    pub fn submit_boxed(
        &self,
        request: Box<dyn ImapRequest>,
    ) -> Result<ImapFuture<CommandResponse>, ImapClientError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(self.error(FailureType::ConnectionInactive));
        }
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(self.error(FailureType::CommandInProgress));
        }

        let (completer, future) = future::channel(self.session_id);
        if self
            .directives
            .send(Directive::Submit { request, completer })
            .is_err()
        {
            self.busy.store(false, Ordering::Release);
            return Err(self.error(FailureType::ConnectionInactive));
        }

        Ok(future)
    }

    /// Asks the pending command to finish (`DONE` for IDLE). The pending
    /// future still resolves through the tagged completion. A no-op when
    /// nothing is pending or the command cannot be terminated.
    pub fn terminate_pending(&self) -> Result<(), ImapClientError> {
        self.directives
            .send(Directive::Terminate)
            .map_err(|_| self.error(FailureType::ConnectionInactive))
    }

    /// Latest capability snapshot observed by the session, if any.
    pub fn capabilities(&self) -> Option<Arc<Capability>> {
        self.capabilities.read().ok().and_then(|caps| caps.clone())
    }

    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    fn error(&self, kind: FailureType) -> ImapClientError {
        ImapClientError::new(kind, self.session_id)
    }

    /// Promotes a greeted transport into a running session.
    pub(crate) fn spawn<T>(
        io: T,
        config: SessionConfig,
        initial_bytes: BytesMut,
        initial_capabilities: Option<Capability>,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (directives_tx, directives_rx) = mpsc::unbounded_channel();
        let busy = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let capabilities = Arc::new(RwLock::new(initial_capabilities.map(Arc::new)));
        let session_id = config.session_id;

        let driver = SessionDriver {
            io,
            logger: SessionLogger::new(session_id, config.debug_mode),
            config,
            tags: TagGenerator::new(),
            framer: ResponseFramer::new(),
            read_buf: BytesMut::with_capacity(4096),
            frame_buf: initial_bytes,
            deflate: None,
            pending: None,
            refresh_capabilities: false,
            capabilities: Arc::clone(&capabilities),
            directives: directives_rx,
            busy: Arc::clone(&busy),
            alive: Arc::clone(&alive),
            last_activity: Instant::now(),
        };
        tokio::spawn(driver.run());

        Self {
            directives: directives_tx,
            busy,
            alive,
            capabilities,
            session_id,
        }
    }
}

struct PendingEntry {
    tag: Tag,
    request: Box<dyn ImapRequest>,
    /// `None` for the session's own capability refresh.
    completer: Option<Completer<CommandResponse>>,
    untagged: Vec<crate::response::UntaggedResponse>,
    sensitive_at_emit: bool,
    started: Instant,
}

enum Flow {
    Continue,
    Logout,
}

enum Wake {
    Directive(Option<Directive>),
    Read(std::io::Result<usize>),
    ReadIdle,
}

async fn read_idle_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct SessionDriver<T> {
    io: T,
    config: SessionConfig,
    logger: SessionLogger,
    tags: TagGenerator,
    framer: ResponseFramer,
    /// Bytes straight off the transport, still compressed once DEFLATE is
    /// active.
    read_buf: BytesMut,
    /// Bytes the framer consumes.
    frame_buf: BytesMut,
    deflate: Option<DeflateState>,
    pending: Option<PendingEntry>,
    refresh_capabilities: bool,
    capabilities: Arc<RwLock<Option<Arc<Capability>>>>,
    directives: mpsc::UnboundedReceiver<Directive>,
    busy: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    last_activity: Instant,
}

impl<T> SessionDriver<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) {
        let outcome = self.drive().await;
        self.shutdown(outcome.err()).await;
    }

    async fn drive(&mut self) -> Result<(), ImapClientError> {
        loop {
            while let Some(response) = self
                .framer
                .decode(&mut self.frame_buf)
                .map_err(|cause| self.error_caused(FailureType::ProtocolViolation, cause))?
            {
                match self.handle_response(response).await? {
                    Flow::Continue => {}
                    Flow::Logout => return Ok(()),
                }
            }

            let deadline = self.read_deadline();
            let wake = {
                let directives = &mut self.directives;
                let io = &mut self.io;
                let read_buf = &mut self.read_buf;
                tokio::select! {
                    directive = directives.recv() => Wake::Directive(directive),
                    read = io.read_buf(read_buf) => Wake::Read(read),
                    _ = read_idle_sleep(deadline) => Wake::ReadIdle,
                }
            };

            match wake {
                Wake::Directive(Some(directive)) => self.handle_directive(directive).await?,
                // Every handle is gone; nothing can be submitted anymore.
                Wake::Directive(None) => return Ok(()),
                Wake::Read(Ok(0)) => {
                    return Err(self.error(FailureType::ConnectionInactive));
                }
                Wake::Read(Ok(_)) => self.ingest()?,
                Wake::Read(Err(cause)) => {
                    return Err(self.error_caused(FailureType::ConnectionFailedException, cause));
                }
                Wake::ReadIdle => {
                    return Err(self.error(FailureType::ConnectionFailedExceedIdleMax));
                }
            }
        }
    }

    /// Moves transport bytes into the framer's buffer, inflating when a
    /// DEFLATE stage is active.
    fn ingest(&mut self) -> Result<(), ImapClientError> {
        self.last_activity = Instant::now();
        let raw = self.read_buf.split();
        match &mut self.deflate {
            Some(state) => state
                .decompress_into(&raw, &mut self.frame_buf)
                .map_err(|cause| {
                    ImapClientError::with_cause(
                        FailureType::ProtocolViolation,
                        self.config.session_id,
                        cause,
                    )
                }),
            None => {
                self.frame_buf.extend_from_slice(&raw);
                Ok(())
            }
        }
    }

    fn read_deadline(&self) -> Option<Instant> {
        let pending = self.pending.as_ref()?;
        if pending.request.command_type() == CommandType::Idle {
            return None;
        }
        let timeout = self.config.read_idle_timeout?;
        Some(self.last_activity + timeout)
    }

    async fn handle_directive(&mut self, directive: Directive) -> Result<(), ImapClientError> {
        match directive {
            Directive::Submit {
                mut request,
                completer,
            } => {
                if self.pending.is_some() {
                    // Lost the race against the busy flag; the slot stays
                    // claimed by the in-flight command.
                    request.cleanup();
                    completer.done(Err(self.error(FailureType::CommandInProgress)));
                    return Ok(());
                }
                self.start_command(request, Some(completer)).await
            }
            Directive::Terminate => {
                let terminate = match &self.pending {
                    Some(pending) => pending.request.terminate_line(),
                    None => return Ok(()),
                };
                match terminate {
                    Ok(line) => {
                        self.log_frame(None, &line, false, "");
                        self.write_frame(&line).await
                    }
                    Err(_) => {
                        self.logger
                            .debug("terminate requested for a command without a terminate protocol");
                        Ok(())
                    }
                }
            }
        }
    }

    async fn start_command(
        &mut self,
        mut request: Box<dyn ImapRequest>,
        completer: Option<Completer<CommandResponse>>,
    ) -> Result<(), ImapClientError> {
        let tag = self.tags.next_tag();
        let line = match request.command_line() {
            Ok(line) => line,
            Err(error) => {
                request.cleanup();
                if let Some(completer) = completer {
                    completer.done(Err(error));
                }
                self.busy.store(false, Ordering::Release);
                return Ok(());
            }
        };

        let sensitive = request.is_sensitive();
        self.log_frame(Some(&tag), &line, sensitive, &request.debug_line());

        let mut frame = Vec::with_capacity(tag.as_str().len() + 1 + line.len());
        frame.extend_from_slice(tag.as_str().as_bytes());
        frame.push(b' ');
        frame.extend_from_slice(&line);

        self.pending = Some(PendingEntry {
            tag,
            request,
            completer,
            untagged: Vec::new(),
            sensitive_at_emit: sensitive,
            started: Instant::now(),
        });
        self.last_activity = Instant::now();

        self.write_frame(&frame).await
    }

    async fn handle_response(&mut self, response: ServerResponse) -> Result<Flow, ImapClientError> {
        match response {
            ServerResponse::Continuation(continuation) => {
                self.handle_continuation(continuation).await?;
                Ok(Flow::Continue)
            }
            ServerResponse::Untagged(untagged) => {
                let pending_type = self
                    .pending
                    .as_ref()
                    .map(|pending| pending.request.command_type());

                if untagged.is_status("BYE") && pending_type != Some(CommandType::Logout) {
                    return Err(self.error(FailureType::ServerResponseByeUnexpected));
                }

                match &mut self.pending {
                    Some(pending) => match pending.request.streaming_queue() {
                        // Receiver gone means the consumer stopped caring;
                        // the command still completes normally.
                        Some(queue) => drop(queue.send(untagged)),
                        None => pending.untagged.push(untagged),
                    },
                    None => {
                        if self.logger.is_debug_enabled() {
                            self.logger.debug(&format!(
                                "unsolicited untagged response: {}",
                                untagged.keyword
                            ));
                        }
                    }
                }
                Ok(Flow::Continue)
            }
            ServerResponse::Tagged(tagged) => self.handle_completion(tagged).await,
        }
    }

    async fn handle_continuation(
        &mut self,
        continuation: ContinuationRequest,
    ) -> Result<(), ImapClientError> {
        let logger = self.logger.clone();
        let (line, sensitive, debug) = {
            let Some(pending) = self.pending.as_mut() else {
                return Err(ImapClientError::new(
                    FailureType::ProtocolViolation,
                    self.config.session_id,
                ));
            };

            let line = pending
                .request
                .next_line_after_continuation(&continuation, &logger)?;
            // Sensitivity may have flipped while serializing this round.
            pending.sensitive_at_emit = pending.request.is_sensitive();
            (
                line,
                pending.request.is_sensitive(),
                pending.request.debug_line(),
            )
        };

        if line.is_empty() {
            // The command entered a passive phase (IDLE after `+ idling`).
            return Ok(());
        }

        self.log_frame(None, &line, sensitive, &debug);
        self.write_frame(&line).await
    }

    async fn handle_completion(&mut self, tagged: TaggedResponse) -> Result<Flow, ImapClientError> {
        let Some(mut pending) = self.pending.take() else {
            return Err(self.error(FailureType::ProtocolViolation));
        };

        if tagged.tag != pending.tag.as_str() {
            pending.request.cleanup();
            if let Some(completer) = pending.completer.take() {
                completer.done(Err(self.error(FailureType::ProtocolViolation)));
            }
            return Err(self.error(FailureType::ProtocolViolation));
        }

        let command_type = pending.request.command_type();
        let response = CommandResponse {
            tag: tagged.tag,
            status: tagged.status,
            code: tagged.code,
            text: tagged.text,
            untagged: std::mem::take(&mut pending.untagged),
        };

        if self.logger.is_debug_enabled() {
            self.logger.debug(&format!(
                "{} {:?} completed as {:?} after {}ms{}",
                response.tag,
                command_type,
                response.status,
                pending.started.elapsed().as_millis(),
                if pending.sensitive_at_emit {
                    " (redacted)"
                } else {
                    ""
                },
            ));
        }

        if response.is_ok() {
            self.note_completion(command_type, &response)?;
        }

        pending.request.cleanup();
        if let Some(completer) = pending.completer.take() {
            completer.done(Ok(response));
        }

        if command_type == CommandType::Logout {
            return Ok(Flow::Logout);
        }

        if self.refresh_capabilities {
            // The advertised capabilities are stale; reissue CAPABILITY
            // before accepting the next external submission.
            self.refresh_capabilities = false;
            self.start_command(Box::new(SimpleCommand::capability()), None)
                .await?;
        } else {
            self.busy.store(false, Ordering::Release);
        }

        Ok(Flow::Continue)
    }

    /// Post-completion bookkeeping for commands the session itself cares
    /// about: capability lifecycle and the COMPRESS pipeline splice.
    fn note_completion(
        &mut self,
        command_type: CommandType,
        response: &CommandResponse,
    ) -> Result<(), ImapClientError> {
        match command_type {
            CommandType::Login | CommandType::Authenticate => {
                match Capability::from_response(response) {
                    // An `OK [CAPABILITY …]` code supersedes the refresh.
                    Some(capability) => self.store_capabilities(capability),
                    None => {
                        self.clear_capabilities();
                        self.refresh_capabilities = true;
                    }
                }
            }
            CommandType::Capability => {
                if let Some(capability) = Capability::from_response(response) {
                    self.store_capabilities(capability);
                }
            }
            CommandType::Compress => self.enable_deflate()?,
            _ => {}
        }
        Ok(())
    }

    /// Splices the DEFLATE stages into the byte path. Bytes that followed
    /// the completion line are already sitting in the framer buffer in
    /// compressed form; they are pulled back and inflated before framing
    /// resumes, so no byte is ever framed ahead of the decompressor.
    fn enable_deflate(&mut self) -> Result<(), ImapClientError> {
        if self.deflate.is_some() {
            return Ok(());
        }
        let mut state = DeflateState::new();
        let compressed_tail = self.frame_buf.split();
        if !compressed_tail.is_empty() {
            state
                .decompress_into(&compressed_tail, &mut self.frame_buf)
                .map_err(|cause| {
                    self.error_caused(FailureType::ProtocolViolation, cause)
                })?;
        }
        self.deflate = Some(state);
        self.logger.debug("DEFLATE compression active");
        Ok(())
    }

    fn store_capabilities(&self, capability: Capability) {
        if let Ok(mut slot) = self.capabilities.write() {
            *slot = Some(Arc::new(capability));
        }
    }

    fn clear_capabilities(&self) {
        if let Ok(mut slot) = self.capabilities.write() {
            *slot = None;
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ImapClientError> {
        let session_id = self.config.session_id;
        match &mut self.deflate {
            Some(state) => {
                let compressed = state.compress_frame(frame).map_err(|cause| {
                    ImapClientError::with_cause(
                        FailureType::ConnectionFailedException,
                        session_id,
                        cause,
                    )
                })?;
                self.io.write_all(&compressed).await
            }
            None => self.io.write_all(frame).await,
        }
        .map_err(|cause| {
            ImapClientError::with_cause(FailureType::ConnectionFailedException, session_id, cause)
        })?;

        self.io.flush().await.map_err(|cause| {
            ImapClientError::with_cause(FailureType::ConnectionFailedException, session_id, cause)
        })
    }

    fn log_frame(&self, tag: Option<&Tag>, frame: &[u8], sensitive: bool, debug_line: &str) {
        if !self.logger.is_debug_enabled() {
            return;
        }
        let body = if sensitive {
            debug_line.to_owned()
        } else {
            String::from_utf8_lossy(frame).trim_end().to_owned()
        };
        match tag {
            Some(tag) => self.logger.debug(&format!("{tag} {body}")),
            None => self.logger.debug(&body),
        }
    }

    async fn shutdown(&mut self, failure: Option<ImapClientError>) {
        self.alive.store(false, Ordering::Release);

        if let Some(mut pending) = self.pending.take() {
            pending.request.cleanup();
            let error =
                failure.unwrap_or_else(|| self.error(FailureType::ConnectionInactive));
            if let Some(completer) = pending.completer.take() {
                completer.done(Err(error));
            }
        } else if let Some(error) = failure {
            warn!(
                session_id = self.config.session_id,
                "session terminated: {error}"
            );
        }

        self.directives.close();
        while let Ok(directive) = self.directives.try_recv() {
            if let Directive::Submit {
                mut request,
                completer,
            } = directive
            {
                request.cleanup();
                completer.done(Err(self.error(FailureType::ConnectionInactive)));
            }
        }

        self.busy.store(false, Ordering::Release);
        let _ = self.io.shutdown().await;
    }

    fn error(&self, kind: FailureType) -> ImapClientError {
        ImapClientError::new(kind, self.config.session_id)
    }

    fn error_caused(
        &self,
        kind: FailureType,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> ImapClientError {
        ImapClientError::with_cause(kind, self.config.session_id, cause)
    }
}
