//! In-process bridge: board link, assembler and dispatcher in one owner
//!
//! Used when the protocol is decoded next to the serial port rather than
//! on the far side of a WebSocket.

use super::link::{BoardLink, ConnectOutcome, LinkEvent};
use crate::constants::SHUTDOWN_POLL_MS;
use crate::error::Result;
use crate::protocol::{ControlSink, ProtocolDispatcher, StreamAssembler, TaskSink};
use crate::transport::PortOpener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

pub struct BridgeInstance<O: PortOpener, S: TaskSink, C: ControlSink = ()> {
    link: BoardLink<O>,
    assembler: StreamAssembler,
    dispatcher: ProtocolDispatcher<S, C>,
}

impl<O: PortOpener, S: TaskSink, C: ControlSink> BridgeInstance<O, S, C> {
    pub fn new(
        link: BoardLink<O>,
        assembler: StreamAssembler,
        dispatcher: ProtocolDispatcher<S, C>,
    ) -> Self {
        Self {
            link,
            assembler,
            dispatcher,
        }
    }

    pub fn connect(&mut self, port: &str) -> Result<ConnectOutcome> {
        let outcome = self.link.connect(port)?;
        if outcome == ConnectOutcome::Connected {
            self.assembler.clear();
        }
        Ok(outcome)
    }

    pub fn disconnect(&mut self) -> Option<String> {
        self.assembler.clear();
        self.link.close()
    }

    pub fn register_task(&mut self, task_id: u8, owner: S::Owner) {
        self.dispatcher.register_task(task_id, owner);
    }

    /// Build a request and write it to the board
    ///
    /// Returns the number of bytes queued, zero when no board is open.
    pub fn send_message(&mut self, selector: &str, task_id: u8, payload: &[u8]) -> Result<usize> {
        let bytes = self.dispatcher.build(selector, task_id, payload)?;
        Ok(self.link.send(bytes))
    }

    pub fn link(&self) -> &BoardLink<O> {
        &self.link
    }

    pub fn dispatcher(&self) -> &ProtocolDispatcher<S, C> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut ProtocolDispatcher<S, C> {
        &mut self.dispatcher
    }

    /// Wait for one link event and apply it
    ///
    /// Board data is decoded and dispatched before returning. A buffer
    /// overflow is fatal to the connection: the link is closed, running
    /// tasks are reset and the error is returned.
    pub async fn step(&mut self) -> Result<LinkEvent> {
        let event = self.link.recv().await;
        match &event {
            LinkEvent::Data(data) => {
                let dispatcher = &mut self.dispatcher;
                let fed = self.assembler.feed(data, |frame| {
                    if let Err(e) = dispatcher.handle(frame) {
                        warn!("{}", e);
                    }
                });
                if let Err(e) = fed {
                    if let Some(port) = self.link.close() {
                        error!("Closing {}: {}", port, e);
                    }
                    self.dispatcher.reset_running();
                    return Err(e);
                }
            }
            LinkEvent::Unplugged(_) => self.assembler.clear(),
            LinkEvent::Reconnected(_) => {
                self.dispatcher.reset_running();
                self.assembler.clear();
            }
        }
        Ok(event)
    }

    /// Process link events until `shutdown` is set
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::Relaxed) {
            tokio::select! {
                biased;
                _ = tokio::time::sleep(Duration::from_millis(SHUTDOWN_POLL_MS)) => {}
                result = self.step() => {
                    if let Err(e) = result {
                        error!("{}", e);
                    }
                }
            }
        }
        self.disconnect();
    }
}
