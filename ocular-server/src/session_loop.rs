// Session loop: route inbound messages and collect finished batches

use crate::debug_sink::DebugSink;
use crate::error::SessionError;
use crate::protocol::{Inbound, Outbound, ResultFraming};
use crate::session::Session;
use futures_util::{Stream, StreamExt};
use ocular_eye::DetectionAdapter;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared handles every session needs
#[derive(Clone)]
pub struct SessionContext {
    pub adapter: DetectionAdapter,
    pub debug_sink: Option<DebugSink>,
    pub framing: ResultFraming,
}

/// Drive one session until the client leaves or a fatal error occurs.
///
/// Inbound messages are handled strictly in arrival order. Returning drops
/// the session, which aborts any batch still in flight without output.
pub async fn run_session<S>(
    id: &str,
    mut inbound: S,
    outbound: mpsc::UnboundedSender<Outbound>,
    ctx: SessionContext,
) -> Result<(), SessionError>
where
    S: Stream<Item = Result<Inbound, SessionError>> + Unpin,
{
    let mut session = Session::new(
        id,
        ctx.adapter,
        ctx.debug_sink,
        outbound.clone(),
        ctx.framing,
    );

    loop {
        tokio::select! {
            Some(outcome) = session.join_next(), if session.in_flight() > 0 => {
                if let Err(e) = outcome {
                    if e.is_fatal() {
                        error!("Session {} closing on fatal error: {}", id, e);
                        return Err(e);
                    }
                    warn!("Session {} batch error: {}", id, e);
                }
            }
            message = inbound.next() => {
                match message {
                    None | Some(Ok(Inbound::Close)) => {
                        if session.in_flight() > 0 {
                            debug!(
                                "Session {} closed with {} batches in flight, discarding",
                                id,
                                session.in_flight()
                            );
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        warn!("Session {} transport error: {}", id, e);
                        return Err(e);
                    }
                    Some(Ok(Inbound::Frame(frame))) => {
                        debug!("Session {} received frame ({} bytes)", id, frame.len());
                        session.append(frame);
                    }
                    Some(Ok(Inbound::Release)) => {
                        if session.release().is_none() {
                            debug!("Session {} release with nothing pending", id);
                        }
                    }
                    Some(Ok(Inbound::Configure(update))) => {
                        session.configure(&update);
                        if outbound.send(Outbound::Ack).is_err() {
                            return Err(SessionError::Transport(
                                "Outbound channel closed".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }
}

/// Log the end of a session
pub fn log_session_end(id: &str, result: &Result<(), SessionError>) {
    match result {
        Ok(()) => info!("Session {} ended", id),
        Err(e) => info!("Session {} ended with error: {}", id, e),
    }
}
