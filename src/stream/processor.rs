// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Stream processor
//
// Drives a `LineHandler` over an upstream byte stream on its own task and
// exposes the handler's output as a byte stream. One read produces at most
// one downstream chunk, so nothing is held back beyond what the handler
// withholds. A failed send means the client went away; the task returns and
// the upstream stream is dropped with it.

use std::fmt::Display;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use super::sse::{error_event_lines, LineFramer, LineHandler};

/// Bounded so a slow client applies backpressure to the upstream read.
const CHANNEL_CAPACITY: usize = 64;

pub struct StreamProcessor {
    handler: Box<dyn LineHandler>,
}

impl StreamProcessor {
    pub fn new(handler: Box<dyn LineHandler>) -> Self {
        Self { handler }
    }

    /// Consume `input` on a spawned task, producing the handler's output.
    ///
    /// An upstream read error flushes whatever the handler can still emit and
    /// then terminates the stream with an SSE `error` event.
    pub fn process<E>(
        self,
        input: impl Stream<Item = Result<Bytes, E>> + Send + 'static,
    ) -> impl Stream<Item = Bytes>
    where
        E: Display + Send + 'static,
    {
        let mut handler = self.handler;
        let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut input = Box::pin(input);
            let mut framer = LineFramer::new();
            let mut chunks = 0usize;

            while let Some(item) = input.next().await {
                match item {
                    Ok(chunk) => {
                        chunks += 1;
                        let mut out = Vec::new();
                        for line in framer.push(&chunk) {
                            out.extend(handler.handle_line(&line));
                        }
                        if send_lines(&tx, out).await.is_err() {
                            tracing::debug!(chunks, "client disconnected; abandoning upstream stream");
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(chunks, error = %e, "upstream stream failed mid-response");
                        let mut out = drain(&mut framer, handler.as_mut());
                        out.extend(error_event_lines("api_error", &e.to_string()));
                        let _ = send_lines(&tx, out).await;
                        return;
                    }
                }
            }

            let out = drain(&mut framer, handler.as_mut());
            let _ = send_lines(&tx, out).await;
            tracing::debug!(chunks, "upstream stream complete");
        });

        ReceiverStream::new(rx)
    }
}

/// Flush the trailing partial line and the handler's end-of-stream output.
fn drain(framer: &mut LineFramer, handler: &mut dyn LineHandler) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(rest) = framer.finish() {
        out.extend(handler.handle_line(&rest));
    }
    out.extend(handler.finish());
    out
}

/// Join lines into one newline-terminated chunk. Empty batches send nothing.
async fn send_lines(tx: &mpsc::Sender<Bytes>, lines: Vec<String>) -> Result<(), ()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut buf = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        buf.push_str(&line);
        buf.push('\n');
    }
    tx.send(Bytes::from(buf)).await.map_err(|_| ())
}
