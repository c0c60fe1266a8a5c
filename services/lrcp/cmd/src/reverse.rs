//! Line reversal application.
//!
//! Every newline-terminated line received on a session is sent back with
//! its characters in reverse order.

use lrcp_session::{SessionAcceptor, SessionHandle};

use crate::{component_debug, component_info, component_warn};

/// Reverse the characters of `line`
pub fn reverse_line(line: &str) -> String {
    line.chars().rev().collect()
}

/// Acceptor that runs one reversal task per session
#[derive(Debug, Default, Clone, Copy)]
pub struct LineReverser;

impl SessionAcceptor for LineReverser {
    fn on_session(&self, handle: SessionHandle) {
        tokio::spawn(serve(handle));
    }
}

async fn serve(mut handle: SessionHandle) {
    let session = handle.id();
    component_debug!("app", "Reversing lines for session {} ({})", session, handle.peer());

    let mut lines = 0u64;
    while let Some(line) = handle.next_record().await {
        let mut reply = reverse_line(&line);
        reply.push('\n');
        if let Err(e) = handle.write(reply).await {
            component_warn!("app", "Session {} rejected reply: {}", session, e);
            break;
        }
        lines += 1;
    }

    component_info!("app", "Session {} finished after {} lines", session, lines);
}
