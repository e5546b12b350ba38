//! JSON-lines bridge between a line-oriented caller and the command dispatcher
//!
//! Each input line is one request: a method call with an optional `id` that is
//! echoed on the response. Every output line is either a response or an event:
//!
//! ```text
//! > {"id":1,"method":"startServer","arguments":{"serviceName":"Pen"}}
//! < {"kind":"response","id":1,"response":{"status":"success","result":true}}
//! < {"kind":"event","type":"clientConnected","clientAddress":"7f:00:00:01:c3:50"}
//! ```

use std::future::Future;

use btserver_core::{
    CommandDispatcher, CommandError, EventRecord, MethodCall, MethodResponse, ServerEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::Result;

// ----------------------------------------------------------------------------
// Wire Types
// ----------------------------------------------------------------------------

/// One input line
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub call: MethodCall,
}

/// One output line
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutputLine {
    Response {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        response: MethodResponse,
    },
    Event(EventRecord),
}

/// Why the bridge stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The input reached end of file
    EndOfInput,
    /// The shutdown future resolved
    Shutdown,
}

// ----------------------------------------------------------------------------
// Bridge
// ----------------------------------------------------------------------------

/// Serves requests from `input` and writes responses and events to `output`
/// until the input ends or `shutdown` resolves, then stops the server and
/// flushes the events it produced while stopping.
pub struct Bridge<R, W> {
    dispatcher: CommandDispatcher,
    input: Lines<R>,
    output: W,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl<R, W> Bridge<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create the bridge and attach it as the controller's event subscriber
    pub fn new(dispatcher: CommandDispatcher, input: R, output: W) -> Self {
        let events = dispatcher.controller().subscribe_channel();
        Self {
            dispatcher,
            input: input.lines(),
            output,
            events,
        }
    }

    pub async fn run<F>(mut self, shutdown: F) -> Result<BridgeExit>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let exit = loop {
            tokio::select! {
                _ = &mut shutdown => break BridgeExit::Shutdown,

                Some(event) = self.events.recv() => {
                    self.write_line(&OutputLine::Event(event.to_record())).await?;
                }

                line = self.input.next_line() => {
                    let Some(line) = line? else {
                        break BridgeExit::EndOfInput;
                    };
                    let request = line.trim();
                    if !request.is_empty() {
                        let reply = self.handle(request).await;
                        self.write_line(&reply).await?;
                    }
                }
            }
        };

        info!("Bridge exiting ({:?}), stopping server", exit);
        self.dispatcher.controller().stop().await;

        // Disconnects emitted while stopping
        while let Ok(event) = self.events.try_recv() {
            self.write_line(&OutputLine::Event(event.to_record())).await?;
        }
        self.output.flush().await?;
        Ok(exit)
    }

    async fn handle(&self, line: &str) -> OutputLine {
        match serde_json::from_str::<Request>(line) {
            Ok(Request { id, call }) => {
                debug!("Dispatching {}", call.method);
                let response = self.dispatcher.dispatch(call).await;
                OutputLine::Response { id, response }
            }
            Err(e) => OutputLine::Response {
                id: None,
                response: CommandError::InvalidArgument(format!("Malformed request: {}", e))
                    .into(),
            },
        }
    }

    async fn write_line(&mut self, line: &OutputLine) -> Result<()> {
        let mut bytes = serde_json::to_vec(line)?;
        bytes.push(b'\n');
        self.output.write_all(&bytes).await?;
        self.output.flush().await?;
        Ok(())
    }
}
